/// Database access error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// A value in the given table failed to decode.
    #[error("failed to decode a value from the {0} table")]
    Decode(&'static str),
    /// A write was attempted through a read-only transaction.
    #[error("attempted to write through a read-only transaction")]
    ReadOnly,
    /// The backend reported a failure.
    #[error("database backend error: {0}")]
    Backend(String),
}
