use std::collections::HashMap;

use alloy::primitives::Address;

use crate::error::PaymentError;

/// Maps token symbols to contract addresses for the configured chain.
///
/// Built once at startup and never mutated afterwards. Lookups are
/// case-insensitive so "usdc" and "USDC" resolve to the same address.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: HashMap<String, Address>,
}

impl TokenRegistry {
    /// Build a registry from symbol/address pairs.
    ///
    /// Rejects duplicate symbols and the zero address so a typo in
    /// configuration fails startup instead of settling into a burn address.
    pub fn new(
        entries: impl IntoIterator<Item = (String, Address)>,
    ) -> Result<Self, PaymentError> {
        let mut tokens = HashMap::new();
        for (symbol, address) in entries {
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return Err(PaymentError::Validation("empty token symbol".into()));
            }
            if address == Address::ZERO {
                return Err(PaymentError::Validation(format!(
                    "token {symbol} maps to the zero address"
                )));
            }
            if tokens.insert(symbol.clone(), address).is_some() {
                return Err(PaymentError::Validation(format!(
                    "duplicate token symbol: {symbol}"
                )));
            }
        }
        if tokens.is_empty() {
            return Err(PaymentError::Validation("token registry is empty".into()));
        }
        Ok(Self { tokens })
    }

    /// Parse a `SYMBOL=0xaddress,SYMBOL=0xaddress` configuration string.
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let mut entries = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (symbol, address) = pair.split_once('=').ok_or_else(|| {
                PaymentError::Validation(format!("malformed token entry: {pair}"))
            })?;
            let address: Address = address.trim().parse().map_err(|_| {
                PaymentError::Validation(format!("invalid address for token {symbol}"))
            })?;
            entries.push((symbol.to_string(), address));
        }
        Self::new(entries)
    }

    /// Resolve a symbol to its contract address.
    pub fn resolve(&self, symbol: &str) -> Result<Address, PaymentError> {
        self.tokens
            .get(&symbol.trim().to_uppercase())
            .copied()
            .ok_or_else(|| PaymentError::UnknownToken(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.tokens.contains_key(&symbol.trim().to_uppercase())
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.tokens.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
