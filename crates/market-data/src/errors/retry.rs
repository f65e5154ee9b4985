/// Classification for fallback policy.
///
/// Used by the registry to decide what happens after a source fails.
///
/// # Behavior Summary
///
/// | Class | Try Next Source? | Back Off This Source? |
/// |-------|------------------|-----------------------|
/// | `Never` | No | No |
/// | `FailoverWithPenalty` | Yes | Yes (drains its rate-limit bucket) |
/// | `NextProvider` | Yes | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Terminal for the request. Never produced by a single source failure.
    Never,

    /// Failover to the next source and penalize this one.
    ///
    /// Used when the upstream itself reported rate limiting. The registry
    /// blocks the source's bucket for the reported retry-after, so later
    /// requests fall through without spending a network call.
    FailoverWithPenalty,

    /// Try the next source without any penalty.
    ///
    /// Used for timeouts, upstream errors, malformed payloads, validator
    /// rejections and unknown symbols. The same source is not retried
    /// within the request.
    NextProvider,
}
