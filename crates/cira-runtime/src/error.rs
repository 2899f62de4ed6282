use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

use cira_core::CoreReason;

/// Runtime-level error taxonomy: bootstrap/shutdown failures plus the two
/// reasons that can surface out of a tick without it being a bug —
/// a node fetch timing out and a fatal store/invariant failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("bootstrap error: {0}")]
    #[from(ignore)]
    Bootstrap(String),
    #[error("shutdown error")]
    Shutdown,
    /// Node unreachable, timed out, or returned unparseable JSON. Captured
    /// per-node; the tick proceeds with a sentinel payload for that node.
    #[error("fetch error: {0}")]
    #[from(ignore)]
    Fetch(String),
    /// Disk write failure or an invariant violated at the runtime layer.
    /// `cira-gateway`'s `main` exits with code 2 on this reason.
    #[error("fatal error: {0}")]
    #[from(ignore)]
    Fatal(String),
    #[error("{0}")]
    Core(CoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Bootstrap(_) => 2001,
            Self::Shutdown => 2002,
            Self::Fetch(_) => 2003,
            Self::Fatal(_) => 2004,
            Self::Core(c) => c.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
