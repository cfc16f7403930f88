use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free block was large enough and the host refused to grant more
    /// memory, or the request could not be represented at all.
    OutOfMemory { requested: usize },
    InvalidSettings(&'static str),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: could not provide {requested} bytes")
            }
            Self::InvalidSettings(reason) => {
                write!(f, "invalid heap settings: {reason}")
            }
        }
    }
}

impl std::error::Error for HeapError {}

/// A broken structural invariant, as reported by [`crate::Heap::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation(pub String);

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap invariant violated: {}", self.0)
    }
}

impl std::error::Error for InvariantViolation {}
