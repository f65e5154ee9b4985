//! Provider registry module.
//!
//! This module provides orchestration for quote sources, including:
//! - Source registration and priority ordering
//! - Rate limiting per source
//! - Series validation
//! - Fetch diagnostics for the fallback chain

mod rate_limiter;
mod registry;
mod skip_reason;
mod validator;

pub use rate_limiter::{Permit, RateLimitConfig, RateLimiter};
pub use registry::{ProviderRegistry, RegistryConfig, SourceProbe};
pub use skip_reason::{FetchDiagnostics, ProviderAttempt, SkipReason};
pub use validator::{
    SeriesValidator, Validated, ValidationIssue, ValidationSeverity, ValidatorConfig,
};
