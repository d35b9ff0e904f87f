//! Instrument universe, read from the exchange-info document.
//!
//! The document is kept verbatim so a remote listing can be saved and reused
//! for later offline runs.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write universe file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse exchange info: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One listed instrument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<Instrument>,
}

#[derive(Debug, Clone)]
pub struct Universe {
    instruments: Vec<Instrument>,
    raw: String,
}

impl Universe {
    /// Load a universe from a saved exchange-info file.
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse an exchange-info JSON document.
    pub fn from_json(content: &str) -> Result<Self, UniverseError> {
        let info: ExchangeInfo = serde_json::from_str(content)?;
        Ok(Self {
            instruments: info.symbols,
            raw: content.to_string(),
        })
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Symbols quoted in `quote`, sorted.
    pub fn symbols_with_quote(&self, quote: &str) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .instruments
            .iter()
            .filter(|i| i.quote_asset.eq_ignore_ascii_case(quote))
            .map(|i| i.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Persist the document as received.
    pub fn save(&self, path: &Path) -> Result<(), UniverseError> {
        let write_err = |source| UniverseError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        std::fs::write(path, &self.raw).map_err(write_err)
    }
}
