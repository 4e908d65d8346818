//! Wire protocol for change-detection exchanges.
//!
//! Every message is one text frame, `<tag>=<json body>`:
//! - The tag names the message family, its version and the message kind, so
//!   a receiver can dispatch (or ignore) a frame without parsing the body
//! - The body is a JSON object with a fixed field order per kind
//!
//! Share-bases are identified by index only; local paths never leave a peer.

pub mod envelope;
pub mod messages;

pub use envelope::{MessageKind, PROTOCOL_NAMESPACE, PROTOCOL_VERSION};
pub use messages::{ChangeMessage, ChangesQuery, ChangesReply, DecodeError};
