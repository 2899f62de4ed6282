use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

/// Taxonomy from the core's error handling design, by kind rather than by
/// the language feature that raised it. Variant payloads all happen to be
/// `String`, so only `Uvs` gets a generated `From` impl — the others are
/// always constructed explicitly at the call site.
#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    /// Malformed rule id, invalid socket type, cyclic graph, schema
    /// violation. Reported to the caller of the mutating operation; never
    /// raised during a tick.
    #[error("validation error: {0}")]
    #[from(ignore)]
    Validation(String),
    /// Timeout, exception inside user code, malformed verdict. Captured on
    /// the corresponding `AtomicResult.error`; the tick proceeds.
    #[error("sandbox error: {0}")]
    #[from(ignore)]
    Sandbox(String),
    /// External alert/MODBUS/log failure. Logged, retried, never
    /// propagated out of a tick.
    #[error("effect error: {0}")]
    #[from(ignore)]
    Effect(String),
    /// Disk write failure on rule persistence, or an invariant violated in
    /// the core. Surfaces to the caller; `cira-gateway` exits with code 2.
    #[error("fatal error: {0}")]
    #[from(ignore)]
    Fatal(String),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1001,
            Self::Sandbox(_) => 1002,
            Self::Effect(_) => 1003,
            Self::Fatal(_) => 1004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
