use thiserror::Error;

/// Primary error type for Xylem operations.
///
/// Structured variants for the misuse cases an embedder can hit, a single
/// `Io` escape hatch for the page layer, and an explicit invariant-violation
/// variant for consistency checks that trip at commit time.
#[derive(Error, Debug)]
pub enum XylemError {
    // === Page-layer errors ===
    /// I/O failure surfacing through the page layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Usage errors ===
    /// An attribute with the same qualified name and value already exists.
    #[error("duplicate attribute: {name}")]
    DuplicateAttribute { name: String },

    /// A namespace with the same prefix is already declared on this element.
    #[error("duplicate namespace prefix: {prefix}")]
    DuplicateNamespace { prefix: String },

    /// The document root cannot be removed.
    #[error("the document root can not be removed")]
    CannotRemoveRoot,

    /// Close was called while uncommitted modifications exist.
    #[error("must commit/abort transaction first ({modifications} pending modifications)")]
    DirtyClose { modifications: u64 },

    /// Operation on a transaction that has already been closed.
    #[error("transaction {trx_id} is closed")]
    TrxClosed { trx_id: u64 },

    /// Operation is not applicable to the current node kind.
    #[error("{op} is not allowed on a {kind} node")]
    WrongKind { op: &'static str, kind: &'static str },

    /// The resource already has a live write transaction.
    #[error("resource already has an open write transaction")]
    WriterAlreadyOpen,

    /// Rejected transaction configuration.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    // === Bad arguments ===
    /// A node key outside the allocated range, or a dead node.
    #[error("invalid node key: {key}")]
    InvalidNodeKey { key: u64 },

    /// A qualified name that fails the XML Name production.
    #[error("invalid qualified name: {name:?}")]
    InvalidQName { name: String },

    /// A subtree cannot be moved to a position inside itself.
    #[error("can not move a node relative to itself")]
    MoveToSelf,

    /// A subtree cannot be moved below one of its own descendants.
    #[error("can not move an ancestor below its descendant (node {key})")]
    MoveToAncestor { key: u64 },

    /// The requested revision has not been committed.
    #[error("revision {requested} is not accessible (newest is {newest})")]
    RevisionNotAccessible { requested: u64, newest: u64 },

    // === Internal consistency ===
    /// A tree invariant check tripped; the transaction must be aborted.
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },

    // === Threading ===
    /// The auto-commit worker did not stop within the shutdown grace period.
    #[error("interrupted while waiting for the auto-commit worker to stop")]
    ThreadInterrupted,
}

/// Coarse error classification, mirroring the taxonomy embedders dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Page-layer failure; the caller must abort before further use.
    Io,
    /// Semantic misuse; no observable state was changed.
    Usage,
    /// Invalid argument; no observable state was changed.
    BadArgument,
    /// Internal consistency check tripped; fatal for this transaction.
    InvariantViolation,
    /// Shutdown wait interrupted.
    Interrupted,
}

impl XylemError {
    /// Map this error onto the coarse taxonomy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::DuplicateAttribute { .. }
            | Self::DuplicateNamespace { .. }
            | Self::CannotRemoveRoot
            | Self::DirtyClose { .. }
            | Self::TrxClosed { .. }
            | Self::WrongKind { .. }
            | Self::WriterAlreadyOpen
            | Self::InvalidConfig { .. } => ErrorKind::Usage,
            Self::InvalidNodeKey { .. }
            | Self::InvalidQName { .. }
            | Self::MoveToSelf
            | Self::MoveToAncestor { .. }
            | Self::RevisionNotAccessible { .. } => ErrorKind::BadArgument,
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::ThreadInterrupted => ErrorKind::Interrupted,
        }
    }

    /// Whether the transaction is still usable after this error.
    ///
    /// Usage and argument errors run their checks before any page mutation,
    /// so the tree is untouched. `Io` may leave a node in the prepared state
    /// and `InvariantViolation` is fatal; both require an abort.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Usage | ErrorKind::BadArgument)
    }

    /// Create an invariant-violation error.
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Create a wrong-kind usage error.
    pub const fn wrong_kind(op: &'static str, kind: &'static str) -> Self {
        Self::WrongKind { op, kind }
    }
}

/// Result type alias using `XylemError`.
pub type Result<T> = std::result::Result<T, XylemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_duplicate_attribute() {
        let err = XylemError::DuplicateAttribute {
            name: "severity".to_owned(),
        };
        assert_eq!(err.to_string(), "duplicate attribute: severity");
    }

    #[test]
    fn display_dirty_close() {
        let err = XylemError::DirtyClose { modifications: 3 };
        assert_eq!(
            err.to_string(),
            "must commit/abort transaction first (3 pending modifications)"
        );
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(XylemError::CannotRemoveRoot.kind(), ErrorKind::Usage);
        assert_eq!(
            XylemError::InvalidNodeKey { key: 99 }.kind(),
            ErrorKind::BadArgument
        );
        assert_eq!(
            XylemError::invariant("root has 2 children").kind(),
            ErrorKind::InvariantViolation
        );
        assert_eq!(XylemError::ThreadInterrupted.kind(), ErrorKind::Interrupted);
        let io = XylemError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn recoverability() {
        assert!(XylemError::MoveToSelf.is_recoverable());
        assert!(XylemError::DuplicateNamespace {
            prefix: "ns".to_owned()
        }
        .is_recoverable());
        assert!(!XylemError::invariant("x").is_recoverable());
        assert!(!XylemError::ThreadInterrupted.is_recoverable());
    }

    #[test]
    fn convenience_constructors() {
        let err = XylemError::wrong_kind("insert_attribute", "text");
        assert!(matches!(
            err,
            XylemError::WrongKind {
                op: "insert_attribute",
                kind: "text"
            }
        ));
        let err = XylemError::config("auto-commit interval must be nonzero");
        assert!(matches!(err, XylemError::InvalidConfig { .. }));
    }
}
