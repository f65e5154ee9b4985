//! Quote source abstractions and implementations.
//!
//! This module contains:
//! - The `QuoteSource` trait that all sources implement
//! - Source rate limiting defaults
//! - Concrete source implementations (Yahoo, Alpha Vantage, Finnhub)
//! - `SourceAdapter`, the closed enum the production registry dispatches over
//!
//! Sources are stateless with respect to caching and rate limiting; both
//! live in the registry.

mod adapter;
mod capabilities;
mod traits;

pub mod alpha_vantage;
pub mod finnhub;
pub mod yahoo;

// Re-exports
pub use adapter::SourceAdapter;
pub use capabilities::RateLimit;
pub use traits::QuoteSource;
