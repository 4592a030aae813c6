//! Identifiers, error type and numeric helpers shared by every layer.

#![forbid(unsafe_code)]

use std::fmt;

/// Identifier of a node record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);
/// Identifier of a relationship record.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);
/// Identifier of a node label token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);
/// Identifier of a relationship type token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);
/// Identifier of a property key token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);
/// Identifier of a secondary index.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct IndexId(pub u32);

/// Errors surfaced by the store-scan subsystem.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data violates an invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Requested record or token does not exist.
    #[error("not found")]
    NotFound,
    /// The index backing a scan was dropped before the scan could pin it.
    #[error("index {0} was concurrently dropped")]
    IndexDropped(IndexId),
    /// Lifecycle misuse, e.g. running a scan twice.
    #[error("illegal state: {0}")]
    State(&'static str),
    /// Operation is not supported by this kind of object.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A count could not be represented as a 32-bit degree.
    #[error("value {value} does not fit in a 32-bit degree count")]
    SafeCastFailure {
        /// The raw value that overflowed.
        value: u64,
    },
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),
}

impl SombraError {
    /// Returns `true` for the expected race where a scan lost against an index drop.
    ///
    /// Callers may re-issue the scan (or give up) when this holds.
    pub fn is_concurrent_drop(&self) -> bool {
        matches!(self, SombraError::IndexDropped(_))
    }

    /// Returns `true` when the error reports inconsistent stored data.
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            SombraError::Corruption(_) | SombraError::SafeCastFailure { .. }
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

/// Narrows a raw count to a degree, failing instead of truncating.
pub fn safe_cast_u64_to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| SombraError::SafeCastFailure { value })
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}
