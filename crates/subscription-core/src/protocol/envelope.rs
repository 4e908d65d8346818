//! Versioned message tags.
//!
//! A tag looks like `alliancep2p.friend-file-change-detector/1.changes.query`.
//! Frames from other plug-ins sharing the same channel, or from peers running
//! another protocol version, carry tags this module does not recognise and
//! are ignored by the receiver.

/// Fixed identifier of this message family.
pub const PROTOCOL_NAMESPACE: &str = "alliancep2p.friend-file-change-detector";

/// Current protocol version.
///
/// Increment when changing the body of either message.
pub const PROTOCOL_VERSION: u32 = 1;

/// Separator between tag and body.
pub const TAG_SEPARATOR: char = '=';

/// Kind of change-detection message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// "What changed since T?"
    Query,
    /// "These files changed; here is the new watermark."
    Reply,
}

impl MessageKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Query => "changes.query",
            Self::Reply => "changes.reply",
        }
    }

    /// Full tag for this kind at the current version.
    pub fn tag(&self) -> String {
        format!("{}/{}.{}", PROTOCOL_NAMESPACE, PROTOCOL_VERSION, self.suffix())
    }

    /// Recognise a tag produced by [`MessageKind::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        let rest = tag.strip_prefix(PROTOCOL_NAMESPACE)?.strip_prefix('/')?;
        let (version, suffix) = rest.split_once('.')?;
        if version.parse::<u32>().ok()? != PROTOCOL_VERSION {
            return None;
        }
        [Self::Query, Self::Reply]
            .into_iter()
            .find(|kind| kind.suffix() == suffix)
    }
}
