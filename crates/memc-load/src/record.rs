//! Record parser
//!
//! One input line is five tab-separated fields:
//!
//! ```text
//! category \t device id \t lat \t lon \t app,app,app
//! ```
//!
//! Only a short line or a missing identity rejects the line. Bad app ids and
//! bad coordinates are logged and repaired so the device is still written.

use thiserror::Error;
use tracing::info;

use crate::codec::UserApps;

pub const FIELD_DELIMITER: char = '\t';
pub const APP_DELIMITER: char = ',';
pub const FIELD_COUNT: usize = 5;

/// Substituted for a coordinate that does not parse.
///
/// It cannot be told apart from a real `0.0` in the written payload;
/// [`Record::has_valid_geo`] keeps the distinction on the in-memory record.
pub const GEO_SENTINEL: f64 = 0.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("not enough line parts: {found} < 5")]
    MalformedLine { found: usize },

    #[error("device category or device id is empty")]
    MissingIdentity,

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// A validated line: where to write and what to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub category: String,
    pub device_id: String,
    pub payload: UserApps,
    geo_valid: bool,
}

impl Record {
    pub fn new(category: impl Into<String>, device_id: impl Into<String>, payload: UserApps) -> Self {
        Self {
            category: category.into(),
            device_id: device_id.into(),
            payload,
            geo_valid: true,
        }
    }

    /// Store key, `<category>:<device id>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.category, self.device_id)
    }

    /// False when a coordinate was replaced by [`GEO_SENTINEL`].
    pub fn has_valid_geo(&self) -> bool {
        self.geo_valid
    }
}

/// Parse one line (without its line terminator).
pub fn parse_line(line: &str) -> Result<Record, ParseError> {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if parts.len() < FIELD_COUNT {
        return Err(ParseError::MalformedLine { found: parts.len() });
    }

    let (category, device_id) = (parts[0], parts[1]);
    if category.is_empty() || device_id.is_empty() {
        return Err(ParseError::MissingIdentity);
    }

    let mut apps = Vec::new();
    let mut faulty = Vec::new();
    for token in parts[4].split(APP_DELIMITER) {
        match token.trim().parse::<u32>() {
            Ok(app) => apps.push(app),
            Err(_) => faulty.push(token),
        }
    }
    if !faulty.is_empty() {
        info!(faulty = ?faulty, line, "not all user apps are digits");
    }

    let lat = parts[2].trim().parse::<f64>();
    let lon = parts[3].trim().parse::<f64>();
    let geo_valid = lat.is_ok() && lon.is_ok();
    if !geo_valid {
        info!(line, "invalid geo coords");
    }

    Ok(Record {
        category: category.to_string(),
        device_id: device_id.to_string(),
        payload: UserApps {
            apps,
            lat: lat.unwrap_or(GEO_SENTINEL),
            lon: lon.unwrap_or(GEO_SENTINEL),
        },
        geo_valid,
    })
}

/// Parse a raw line as read from the batch.
pub fn parse_bytes(raw: &[u8]) -> Result<Record, ParseError> {
    let line = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8)?;
    parse_line(line)
}
