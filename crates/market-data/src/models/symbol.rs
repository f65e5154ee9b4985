use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::errors::MarketDataError;

/// Longest ticker accepted, including exchange or FX suffixes.
pub const MAX_SYMBOL_LEN: usize = 15;

/// Uppercase ticker symbol.
///
/// Immutable and cheap to clone. The only way to build one is [`Symbol::parse`]
/// (or `str::parse`), so every `Symbol` in the system is already normalized.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Normalize and validate user input.
    ///
    /// Trims whitespace and uppercases. Accepts `A-Z`, digits and `. - ^ =`
    /// so that share classes (`BRK.B`), indices (`^GSPC`) and FX pairs
    /// (`EURUSD=X`) pass.
    ///
    /// # Examples
    ///
    /// ```
    /// use finboard_market_data::Symbol;
    ///
    /// let symbol = Symbol::parse("  aapl ").unwrap();
    /// assert_eq!(symbol.as_str(), "AAPL");
    /// assert!(Symbol::parse("").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, MarketDataError> {
        let normalized = input.trim().to_ascii_uppercase();
        let reject = |reason: &str| MarketDataError::InvalidSymbol {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if normalized.is_empty() {
            return Err(reject("symbol is empty"));
        }
        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(reject("symbol is too long"));
        }

        let mut chars = normalized.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '^' => {}
            _ => return Err(reject("symbol must start with a letter or '^'")),
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')))
        {
            return Err(reject(&format!("unexpected character '{}'", bad)));
        }

        Ok(Self(Arc::from(normalized)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
