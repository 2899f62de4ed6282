use thiserror::Error;

/// A syntax error raised while parsing rule source code.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("parse error: {0}")]
pub struct ParseError(pub String);

/// A runtime fault raised while evaluating a parsed [`crate::ast::Program`].
///
/// A sandbox violation or resource exhaustion: it is captured on the
/// caller's result object, never panics the process.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum EvalError {
    /// The fuel budget was exhausted before the program returned — the
    /// deterministic stand-in for a wall-clock timeout.
    #[error("timeout")]
    Timeout,
    /// Reference to a name that is neither `payload` nor a bound arrow
    /// parameter — this is how the sandbox refuses clock/fs/network access:
    /// those symbols are simply never defined.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    /// A type mismatch (e.g. comparing a string to a number, calling a
    /// non-array method, indexing a non-object).
    #[error("type error: {0}")]
    Type(String),
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivByZero,
    /// Program completed without reaching a `return` statement.
    #[error("no return value")]
    NoReturn,
}
