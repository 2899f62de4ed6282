//! Socket Registry (C11): the enumeration of [`SocketType`]s, the
//! compatibility predicate, and the `reads`-path inference function.
//!
//! Ported from the source's class-based Rete graph (shared singleton socket
//! objects compared by reference identity) as a pure function over a small
//! enum — no inheritance, no identity tricks.

use crate::types::SocketType;

/// `compatible(src, dst)` — is an edge from a `src`-typed output to a
/// `dst`-typed input allowed?
pub fn compatible(src: SocketType, dst: SocketType) -> bool {
    use SocketType::*;
    if src == dst {
        return true;
    }
    match (src, dst) {
        // any.boolean is a wildcard sink.
        (_, AnyBoolean) => true,
        // within the vision.* family, types interconnect
        (VisionConfidence, VisionDetection) | (VisionDetection, VisionConfidence) => true,
        // within the signal.* family, types interconnect
        (SignalRate, SignalThreshold) | (SignalThreshold, SignalRate) => true,
        // time.window carries a temporal truth, consumed as a boolean
        (TimeWindow, BooleanAny) => true,
        // pipeline.context is reserved and connects only to itself
        (PipelineContext, _) | (_, PipelineContext) => false,
        _ => false,
    }
}

/// Infer the best-fit [`SocketType`] for a rule from the `payload.*` access
/// paths its code performs. First match wins, per the decision procedure:
/// 1. any `payload.detections[*].confidence` path → `vision.confidence`
/// 2. any other `payload.detections` path, or `payload.stats.by_label` → `vision.detection`
/// 3. `payload.stats.defects_per_hour` or `payload.hourly` → `signal.rate`
/// 4. any other `payload.stats.*` path → `signal.threshold`
/// 5. `payload.node.*` or `payload.frame.*` → `system.health`
/// 6. otherwise → `any.boolean`
pub fn infer_socket_type(reads: &[String]) -> SocketType {
    if reads
        .iter()
        .any(|p| p.starts_with("payload.detections") && p.ends_with("confidence"))
    {
        return SocketType::VisionConfidence;
    }
    if reads
        .iter()
        .any(|p| p.starts_with("payload.detections") || p == "payload.stats.by_label")
    {
        return SocketType::VisionDetection;
    }
    if reads
        .iter()
        .any(|p| p == "payload.stats.defects_per_hour" || p.starts_with("payload.hourly"))
    {
        return SocketType::SignalRate;
    }
    if reads.iter().any(|p| p.starts_with("payload.stats")) {
        return SocketType::SignalThreshold;
    }
    if reads
        .iter()
        .any(|p| p.starts_with("payload.node") || p.starts_with("payload.frame"))
    {
        return SocketType::SystemHealth;
    }
    SocketType::AnyBoolean
}
