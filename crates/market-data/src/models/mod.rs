//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `symbol` - Normalized ticker symbol (Symbol)
//! - `period` - Lookback window and bar granularity (Period, Granularity)
//! - `quote` - Price data structures (PricePoint, Series, QuoteResult)

mod period;
mod quote;
mod symbol;
mod types;

pub use period::{Granularity, Period};
pub use quote::{PricePoint, QuoteResult, Series};
pub use symbol::{Symbol, MAX_SYMBOL_LEN};
pub use types::ProviderId;
