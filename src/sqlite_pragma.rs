use rusqlite::Connection;

/// Apply the connection PRAGMAs used by every writer
///
/// WAL journal, NORMAL sync, in-memory temp store, 256MB mmap, 64MB page cache
/// and a 1000-page autocheckpoint.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // These three report their new value as a row
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    let _: i64 = conn.query_row("PRAGMA mmap_size = 268435456", [], |row| row.get(0))?;
    let _: i64 = conn.query_row("PRAGMA wal_autocheckpoint = 1000", [], |row| row.get(0))?;

    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA cache_size = -64000;",
    )?;
    Ok(())
}
