//! Types shared by the jump service crates: errors, configuration and
//! timestamps.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, JumpConfig, PeerSpec, SyncConfig, TransportKind};
pub use error::{JumpError, Result};
pub use types::Timestamp;
