//! subscription-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod connection;
pub mod console;
pub mod daemon;
pub mod downloads;
pub mod link;
pub mod message;
pub mod native_fs;
pub mod server;
pub mod shares;

// Re-export key types for convenience
pub use config::Config;
pub use connection::{ConnectionEvent, PeerConnection};
pub use daemon::Daemon;
pub use downloads::LoggedDownloads;
pub use link::WsPeerLink;
pub use message::{HostMessage, MAX_MESSAGE_SIZE};
pub use native_fs::NativeFs;
pub use server::{ServerEvent, WebSocketServer};
pub use shares::ConfiguredShares;
