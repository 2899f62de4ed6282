/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. The domain is one of `sys`, `fetch`,
/// `rule`, `tick`, `alert`, `conf`.
///
/// # Usage
///
/// ```ignore
/// use crate::log_macros::*;
///
/// claw_info!(sys, nodes = 3, rules = 12, "runtime bootstrap complete");
/// claw_warn!(fetch, node = %node_id, error = %e, "node fetch failed");
/// claw_debug!(tick, tick_ms = elapsed, "tick complete");
/// ```
///
/// The macros accept any tracing-compatible field syntax after the domain
/// identifier. The domain identifier is **not** a string — it is a bare
/// identifier that the macro converts to a `&str` literal.

// ---------------------------------------------------------------------------
// Core macro — dispatches to the matching tracing level macro.
// ---------------------------------------------------------------------------

/// Internal helper. Do not call directly; use `claw_error!` … `claw_trace!`.
#[doc(hidden)]
macro_rules! claw_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

// ---------------------------------------------------------------------------
// Public per-level macros
// ---------------------------------------------------------------------------

/// Log at ERROR level with an automatic `domain` field.
macro_rules! claw_error {
    ($domain:ident, $($rest:tt)*) => {
        claw_log!(error, $domain, $($rest)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! claw_warn {
    ($domain:ident, $($rest:tt)*) => {
        claw_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! claw_info {
    ($domain:ident, $($rest:tt)*) => {
        claw_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! claw_debug {
    ($domain:ident, $($rest:tt)*) => {
        claw_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
#[allow(unused_macros)]
macro_rules! claw_trace {
    ($domain:ident, $($rest:tt)*) => {
        claw_log!(trace, $domain, $($rest)*)
    };
}

pub(crate) use claw_debug;
pub(crate) use claw_error;
pub(crate) use claw_info;
pub(crate) use claw_log;
pub(crate) use claw_trace;
pub(crate) use claw_warn;
