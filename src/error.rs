//! Error kinds for the document engine (spec §7).

use thiserror::Error;

use crate::time_ticket::TimeTicket;

/// All the ways a document operation can fail.
///
/// `Reference` and `Unsupported` surface from both local updates and remote
/// apply; the propagation policy differs (see `Document::apply_change_pack`,
/// which logs and continues past a `Reference` error on remote apply but
/// always surfaces it from a local `update`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocError {
    /// An operation targeted a `createdAt` that isn't in the root's index
    /// (e.g. the parent was concurrently removed).
    #[error("reference not found for operation target {0:?}")]
    Reference(TimeTicket),

    /// An operation was applied to an element of the wrong kind (e.g.
    /// `Increase` on a non-counter).
    #[error("unsupported operation on element {0:?}: {1}")]
    Unsupported(TimeTicket, String),

    /// An edit was attempted on a document whose status is `Removed`.
    #[error("document has been removed")]
    DocumentRemoved,

    /// An unknown wire type tag or element variant was encountered while
    /// decoding.
    #[error("unimplemented wire variant: {0}")]
    Unimplemented(String),

    /// An internal invariant was violated (no actor assigned, a subscribe
    /// path not rooted at `$`, etc).
    #[error("unexpected invariant violation: {0}")]
    Unexpected(String),

    /// A change pack or snapshot could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

pub type DocResult<T> = Result<T, DocError>;
