//! DS-003c: Source units, files of named expressions.
//!
//! A source unit is a YAML mapping from symbol name to an inline expression:
//!
//! ```yaml
//! ok_response: '|response| response.text.includes("ok")'
//! positive: '|res| res > 0'
//! ```

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads the text of a source unit. Filesystem by default; hosts may embed units.
pub trait SourceReader: Send + Sync {
    fn read(&self, location: &Path) -> std::io::Result<String>;
}

/// Reads source units from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read(&self, location: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(location)
    }
}

/// Serves source units from memory, keyed by location.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceReader {
    units: HashMap<PathBuf, String>,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_unit(mut self, location: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.units.insert(location.into(), text.into());
        self
    }
}

impl SourceReader for MemorySourceReader {
    fn read(&self, location: &Path) -> std::io::Result<String> {
        self.units.get(location).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no source unit at {}", location.display()),
            )
        })
    }
}

/// A parsed source unit.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub location: PathBuf,
    pub symbols: IndexMap<String, serde_yaml_ng::Value>,
}

impl SourceUnit {
    /// Read and parse the unit at `location`.
    pub fn load(reader: &dyn SourceReader, location: &Path) -> Result<Self, String> {
        let text = reader
            .read(location)
            .map_err(|e| format!("cannot read {}: {}", location.display(), e))?;
        Self::parse(location, &text)
    }

    /// Parse unit text.
    pub fn parse(location: &Path, text: &str) -> Result<Self, String> {
        let symbols: IndexMap<String, serde_yaml_ng::Value> = serde_yaml_ng::from_str(text)
            .map_err(|e| format!("{} does not parse as a source unit: {}", location.display(), e))?;
        Ok(Self {
            location: location.to_path_buf(),
            symbols,
        })
    }

    /// Expression text bound to `symbol`.
    pub fn expression(&self, symbol: &str) -> Result<&str, String> {
        match self.symbols.get(symbol) {
            Some(serde_yaml_ng::Value::String(text)) => Ok(text),
            Some(_) => Err(format!(
                "symbol '{}' in {} is not invocable",
                symbol,
                self.location.display()
            )),
            None => Err(format!(
                "symbol '{}' not found in {}",
                symbol,
                self.location.display()
            )),
        }
    }
}
