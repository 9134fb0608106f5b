//! Asynchronous JSONL reader with tail mode and file rotation detection

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    poll_interval: Duration,
    /// Wait for new lines at end of file instead of stopping
    follow: bool,
}

impl TailReader {
    pub fn new(path: PathBuf, follow: bool) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            poll_interval: Duration::from_millis(100),
            follow,
        }
    }

    /// Open the file at its start
    pub async fn start(&mut self) -> std::io::Result<()> {
        self.open(SeekFrom::Start(0)).await?;
        log::info!("📖 Reading notifications: {}", self.path.display());
        Ok(())
    }

    /// Open the file at its end, only lines appended from now on are read
    pub async fn start_at_end(&mut self) -> std::io::Result<()> {
        self.open(SeekFrom::End(0)).await?;
        log::info!("📖 Started tailing: {}", self.path.display());
        Ok(())
    }

    async fn open(&mut self, position: SeekFrom) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;

        #[cfg(unix)]
        {
            self.inode = Some(metadata.ino());
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let mut reader = BufReader::new(file);
        reader.seek(position).await?;
        self.file = Some(reader);
        Ok(())
    }

    /// Read the next non-empty line; `None` at end of file when not following
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if self.follow && self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                // A rotated file is new, read it from the start
                self.open(SeekFrom::Start(0)).await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let mut line = String::new();
            match reader.read_line(&mut line).await? {
                0 if self.follow => {
                    // No new data, sleep and retry
                    sleep(self.poll_interval).await;
                }
                0 => return Ok(None),
                _ => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        return Ok(Some(trimmed.to_string()));
                    }
                }
            }
        }
    }

    /// Detect if the file has been rotated (inode changed)
    async fn detect_rotation(&mut self) -> std::io::Result<bool> {
        #[cfg(unix)]
        {
            let metadata = match tokio::fs::metadata(&self.path).await {
                Ok(m) => m,
                // Rotated away and not recreated yet
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e),
            };
            let current_inode = metadata.ino();
            Ok(self.inode.map_or(false, |old| old != current_inode))
        }

        #[cfg(not(unix))]
        {
            // On non-Unix systems, check file size decrease as heuristic
            if let Some(file) = self.file.as_mut() {
                let current_pos = file.stream_position().await?;
                let metadata = tokio::fs::metadata(&self.path).await?;
                Ok(metadata.len() < current_pos)
            } else {
                Ok(false)
            }
        }
    }
}
