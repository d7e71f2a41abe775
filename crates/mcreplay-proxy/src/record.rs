//! Persisted session records.
//!
//! A record is a JSON document holding the captured serverbound packets in
//! wire order, each with its offset from session start, and the position the
//! server first placed the player at:
//!
//! ```json
//! {
//!   "packets": [
//!     { "packet": { "id": 0, "data": [242, 5] }, "relative_time": { "secs": 0, "nanos": 1200 } }
//!   ],
//!   "login_position": { "x": 10.0, "y": 64.0, "z": -5.0 }
//! }
//! ```
//!
//! Payload bytes are stored verbatim, so replaying a record reproduces the
//! original packets byte for byte.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mcreplay_net::Packet;
use serde::{Deserialize, Serialize};

/// File name used when the configured record path has none.
const DEFAULT_FILE_NAME: &str = "packets.json";

/// A captured packet and when it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPacket {
    /// The packet exactly as the client sent it.
    pub packet: Packet,
    /// Time since session start.
    pub relative_time: Duration,
}

/// Position the server first teleported the player to after login.
///
/// All zeroes means "not captured yet", which cannot be told apart from a
/// genuine spawn at the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginPosition {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl LoginPosition {
    /// The "not captured" sentinel.
    pub const UNSET: LoginPosition = LoginPosition {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Whether this is still the sentinel.
    pub fn is_unset(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Everything captured from one client session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Serverbound packets in wire order.
    pub packets: Vec<RecordedPacket>,
    /// First server-assigned position in Play.
    pub login_position: LoginPosition,
}

/// Errors raised while loading or saving a record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The record file could not be read.
    #[error("failed to read record {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The record file could not be created or written.
    #[error("failed to write record {}: {source}", path.display())]
    Write {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The record file is not a valid record.
    #[error("failed to parse record {}: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl SessionRecord {
    /// Load a record from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let contents = std::fs::read(path).map_err(|source| RecordError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let record: SessionRecord =
            serde_json::from_slice(&contents).map_err(|source| RecordError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(
            "Loaded {} recorded packets from {}",
            record.packets.len(),
            path.display()
        );
        Ok(record)
    }

    /// Save the record as JSON, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        let encoded = serde_json::to_vec(self).map_err(RecordError::Encode)?;
        std::fs::write(path, encoded).map_err(|source| RecordError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Total time span covered by the captured packets.
    pub fn duration(&self) -> Duration {
        self.packets
            .iter()
            .map(|p| p.relative_time)
            .max()
            .unwrap_or_default()
    }
}

/// Path for the `index`-th session recorded in one run: the base file name
/// prefixed with the index, in the same directory.
///
/// `captures/packets.json` with index 2 becomes `captures/2packets.json`.
pub fn indexed_path(base: &Path, index: usize) -> PathBuf {
    match base.file_name() {
        Some(name) => base.with_file_name(format!("{index}{}", name.to_string_lossy())),
        None => base.join(format!("{index}{DEFAULT_FILE_NAME}")),
    }
}
