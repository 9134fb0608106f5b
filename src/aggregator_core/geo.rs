//! Geometry reprojection for `geo:point` and `geo:json` attributes
//!
//! Converts notified geometries into the textual form the target store
//! understands natively. Failures are reported to the caller, which keeps the
//! original value and carries on.

use serde_json::Value;

pub const GEO_POINT: &str = "geo:point";
pub const GEO_JSON: &str = "geo:json";

/// WGS84 SRID used by PostGIS and Oracle Spatial
const SRID_WGS84: u32 = 4326;
/// WGS84 SRID under Oracle Locator
const SRID_ORACLE_LOCATOR: u32 = 8307;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoFormat {
    /// Plain well-known text (SQLite/SpatiaLite, generic stores)
    Wkt,
    PostGis,
    Oracle { locator: bool },
}

impl GeoFormat {
    pub fn from_str(s: &str, oracle_locator: bool) -> Option<Self> {
        match s {
            "wkt" => Some(GeoFormat::Wkt),
            "postgis" => Some(GeoFormat::PostGis),
            "oracle" => Some(GeoFormat::Oracle { locator: oracle_locator }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    InvalidPoint(String),
    InvalidGeoJson(String),
    UnsupportedGeometry(String),
}

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::InvalidPoint(v) => write!(f, "Invalid geo:point '{}'", v),
            GeoError::InvalidGeoJson(v) => write!(f, "Invalid geo:json: {}", v),
            GeoError::UnsupportedGeometry(t) => write!(f, "Unsupported geometry type '{}'", t),
        }
    }
}

impl std::error::Error for GeoError {}

pub fn is_geo_type(attr_type: &str) -> bool {
    attr_type == GEO_POINT || attr_type == GEO_JSON
}

/// Reproject a geo attribute value. Non-geo types are returned untouched.
pub fn reproject(value: &Value, attr_type: &str, format: GeoFormat) -> Result<Value, GeoError> {
    match attr_type {
        GEO_POINT => {
            let (lat, lon) = parse_point(value)?;
            Ok(Value::String(point_expression(lat, lon, format)))
        }
        GEO_JSON => {
            let geometry = as_geojson(value)?;
            Ok(Value::String(geojson_expression(&geometry, format)?))
        }
        _ => Ok(value.clone()),
    }
}

/// `geo:point` values are `"lat, lon"` strings
fn parse_point(value: &Value) -> Result<(f64, f64), GeoError> {
    let text = value
        .as_str()
        .ok_or_else(|| GeoError::InvalidPoint(value.to_string()))?;

    let mut parts = text.split(',').map(str::trim);
    let lat = parts.next().and_then(|p| p.parse::<f64>().ok());
    let lon = parts.next().and_then(|p| p.parse::<f64>().ok());

    match (lat, lon, parts.next()) {
        (Some(lat), Some(lon), None) => Ok((lat, lon)),
        _ => Err(GeoError::InvalidPoint(text.to_string())),
    }
}

fn point_expression(lat: f64, lon: f64, format: GeoFormat) -> String {
    match format {
        GeoFormat::Wkt => format!("POINT ({} {})", lon, lat),
        GeoFormat::PostGis => format!("ST_SetSRID(ST_MakePoint({},{}), {})", lon, lat, SRID_WGS84),
        GeoFormat::Oracle { locator } => format!(
            "SDO_GEOMETRY(2001, {}, SDO_POINT_TYPE({}, {}, NULL), NULL, NULL)",
            oracle_srid(locator),
            lon,
            lat
        ),
    }
}

/// `geo:json` values arrive either as objects or as serialized JSON text
fn as_geojson(value: &Value) -> Result<Value, GeoError> {
    let geometry = match value {
        Value::Object(_) => value.clone(),
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| GeoError::InvalidGeoJson(e.to_string()))?,
        other => return Err(GeoError::InvalidGeoJson(other.to_string())),
    };

    if geometry.get("type").and_then(Value::as_str).is_none() {
        return Err(GeoError::InvalidGeoJson("missing geometry type".to_string()));
    }
    Ok(geometry)
}

fn geojson_expression(geometry: &Value, format: GeoFormat) -> Result<String, GeoError> {
    match format {
        GeoFormat::Wkt => to_wkt(geometry),
        GeoFormat::PostGis => Ok(format!("ST_GeomFromGeoJSON('{}')", quoted(geometry))),
        GeoFormat::Oracle { locator: false } => {
            Ok(format!("SDO_UTIL.FROM_GEOJSON('{}')", quoted(geometry)))
        }
        GeoFormat::Oracle { locator: true } => Ok(format!(
            "SDO_UTIL.FROM_WKTGEOMETRY('{}', {})",
            to_wkt(geometry)?,
            SRID_ORACLE_LOCATOR
        )),
    }
}

fn oracle_srid(locator: bool) -> u32 {
    if locator {
        SRID_ORACLE_LOCATOR
    } else {
        SRID_WGS84
    }
}

fn quoted(geometry: &Value) -> String {
    geometry.to_string().replace('\'', "''")
}

/// GeoJSON geometry to WKT
pub fn to_wkt(geometry: &Value) -> Result<String, GeoError> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeoError::InvalidGeoJson("missing geometry type".to_string()))?;
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| GeoError::InvalidGeoJson("missing coordinates".to_string()))?;

    let body = match kind {
        "Point" => format!("({})", position(coords)?),
        "LineString" | "MultiPoint" => format!("({})", positions(coords)?),
        "Polygon" | "MultiLineString" => format!("({})", rings(coords)?),
        "MultiPolygon" => {
            let polygons = array(coords)?
                .iter()
                .map(|polygon| rings(polygon).map(|r| format!("({})", r)))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", polygons.join(", "))
        }
        other => return Err(GeoError::UnsupportedGeometry(other.to_string())),
    };

    Ok(format!("{} {}", kind.to_uppercase(), body))
}

fn array(value: &Value) -> Result<&Vec<Value>, GeoError> {
    value
        .as_array()
        .ok_or_else(|| GeoError::InvalidGeoJson(format!("expected array, got {}", value)))
}

fn position(value: &Value) -> Result<String, GeoError> {
    let items = array(value)?;
    let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    if numbers.len() < 2 || numbers.len() != items.len() {
        return Err(GeoError::InvalidGeoJson(format!("bad position {}", value)));
    }
    Ok(numbers
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" "))
}

fn positions(value: &Value) -> Result<String, GeoError> {
    Ok(array(value)?
        .iter()
        .map(position)
        .collect::<Result<Vec<_>, _>>()?
        .join(", "))
}

fn rings(value: &Value) -> Result<String, GeoError> {
    Ok(array(value)?
        .iter()
        .map(|ring| positions(ring).map(|p| format!("({})", p)))
        .collect::<Result<Vec<_>, _>>()?
        .join(", "))
}
