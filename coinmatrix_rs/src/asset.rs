use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Trades every calendar day and carries volume.
    Crypto,
    /// Price-only series with non-trading days (equities, indices, rates).
    Other,
}

impl AssetClass {
    pub fn is_crypto(self) -> bool {
        matches!(self, AssetClass::Crypto)
    }
}

/// Top cryptocurrencies by market cap (April 2018) keyed by full name, with
/// their exchange short codes.
static CRYPTO_NAMES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("ripple", "xrp"),
        ("bitcoin", "btc"),
        ("ethereum", "eth"),
        ("litecoin", "ltc"),
        ("bitcoin-cash", "bch"),
        ("eos", "eos"),
        ("cardano", "ada"),
        ("stellar", "xlm"),
        ("neo", "neo"),
        ("iota", "miota"),
    ]
});

/// Classifies asset ids and converts between full names and short codes.
///
/// An id is crypto when it matches either a registered full name or a
/// registered short code; anything else is [`AssetClass::Other`].
#[derive(Clone, Debug)]
pub struct AssetRegistry {
    short_by_name: HashMap<String, String>,
    name_by_short: HashMap<String, String>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (name, code) in CRYPTO_NAMES.iter() {
            registry.insert_crypto(name, code);
        }
        registry
    }
}

impl AssetRegistry {
    pub fn empty() -> Self {
        Self {
            short_by_name: HashMap::new(),
            name_by_short: HashMap::new(),
        }
    }

    pub fn with_crypto(mut self, name: &str, code: &str) -> Self {
        self.insert_crypto(name, code);
        self
    }

    pub fn insert_crypto(&mut self, name: &str, code: &str) {
        self.short_by_name
            .insert(name.to_string(), code.to_string());
        self.name_by_short
            .insert(code.to_string(), name.to_string());
    }

    pub fn classify(&self, asset_id: &str) -> AssetClass {
        if self.short_by_name.contains_key(asset_id) || self.name_by_short.contains_key(asset_id)
        {
            AssetClass::Crypto
        } else {
            AssetClass::Other
        }
    }

    pub fn is_crypto(&self, asset_id: &str) -> bool {
        self.classify(asset_id).is_crypto()
    }

    /// Short code for a registered full name; other ids are returned as-is.
    pub fn short_name<'a>(&'a self, asset_id: &'a str) -> &'a str {
        self.short_by_name
            .get(asset_id)
            .map(String::as_str)
            .unwrap_or(asset_id)
    }

    /// Full name for a registered short code, used when talking to sources
    /// keyed by name.
    pub fn full_name<'a>(&'a self, asset_id: &'a str) -> &'a str {
        self.name_by_short
            .get(asset_id)
            .map(String::as_str)
            .unwrap_or(asset_id)
    }
}
