//! UserApps payload codec
//!
//! The value written for every device is a protobuf `UserApps` message:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1 [packed=true];
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```
//!
//! The struct below carries the `prost` field attributes for that schema, so
//! no build-time code generation is needed.

use prost::Message;
use serde::Serialize;
use thiserror::Error;

use crate::record::{parse_line, ParseError};

/// Lines used by [`self_check`].
pub const SAMPLE_LINES: &str = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424";

/// Installed applications and last known position of one device.
#[derive(Clone, PartialEq, Message, Serialize)]
pub struct UserApps {
    /// Application ids, packed on the wire
    #[prost(uint32, repeated, tag = "1")]
    pub apps: Vec<u32>,

    #[prost(double, tag = "2")]
    pub lat: f64,

    #[prost(double, tag = "3")]
    pub lon: f64,
}

impl UserApps {
    /// Single-line text rendering, as logged by dry runs.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for app in &self.apps {
            out.push_str(&format!("apps: {} ", app));
        }
        out.push_str(&format!("lat: {} lon: {}", self.lat, self.lon));
        out
    }
}

#[derive(Error, Debug)]
pub enum SelfCheckError {
    /// A sample line did not parse
    #[error("sample line rejected: {0}")]
    Parse(#[from] ParseError),

    /// An encoded sample did not decode
    #[error("sample payload failed to decode: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Decoding gave back a different payload
    #[error("round trip changed the payload of {key}")]
    Mismatch { key: String },
}

/// Encode and decode the built-in sample lines. Returns how many were checked.
pub fn self_check() -> Result<usize, SelfCheckError> {
    let mut checked = 0;
    for line in SAMPLE_LINES.lines() {
        let record = parse_line(line)?;
        let encoded = record.payload.encode_to_vec();
        let decoded = UserApps::decode(encoded.as_slice())?;
        if decoded != record.payload {
            return Err(SelfCheckError::Mismatch { key: record.key() });
        }
        checked += 1;
    }
    Ok(checked)
}
