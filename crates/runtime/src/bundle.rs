//! Schedule bundles
//!
//! A bundle is the on-disk form of a synthesized [`ScheduleTable`]: a magic
//! number, a format version and the [`CompiledTable`]. The binary encoding
//! is `bincode` (fixed-width little endian), so `.cqs` files are byte-stable
//! for a given table. JSON is available for inspection and hand-written
//! fixtures.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::schedule::{CompiledTable, ScheduleTable};

/// File magic: "CQS" followed by a NUL
pub const BUNDLE_MAGIC: [u8; 4] = *b"CQS\0";

/// Bundle format version (increment on breaking changes)
pub const BUNDLE_VERSION: u32 = 1;

/// Conventional extension for binary bundles
pub const BUNDLE_EXTENSION: &str = "cqs";

/// Serialized schedule table with header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBundle {
    pub magic: [u8; 4],
    pub version: u32,
    pub table: CompiledTable,
}

impl ScheduleBundle {
    pub fn new(table: &ScheduleTable) -> Self {
        Self {
            magic: BUNDLE_MAGIC,
            version: BUNDLE_VERSION,
            table: table.to_compiled(),
        }
    }

    /// Check the header and decode the table, validating every tape
    pub fn into_table(self) -> Result<ScheduleTable> {
        if self.magic != BUNDLE_MAGIC {
            error!(magic = ?self.magic, "not a schedule bundle");
            return Err(Error::Bundle(format!("bad magic {:?}", self.magic)));
        }
        if self.version != BUNDLE_VERSION {
            error!(version = self.version, expected = BUNDLE_VERSION, "unsupported bundle version");
            return Err(Error::Bundle(format!(
                "unsupported version {} (expected {})",
                self.version, BUNDLE_VERSION
            )));
        }
        ScheduleTable::from_compiled(&self.table)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Bundle(format!("encode: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Bundle(format!("decode: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Bundle(format!("encode json: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Bundle(format!("decode json: {}", e)))
    }
}

/// Write `table` to `path`; JSON if the extension is `.json`, bincode otherwise
pub fn write_table(path: &Path, table: &ScheduleTable) -> Result<()> {
    let bundle = ScheduleBundle::new(table);
    let bytes = if is_json(path) {
        bundle.to_json()?.into_bytes()
    } else {
        bundle.to_bytes()?
    };
    std::fs::write(path, &bytes)
        .map_err(|e| Error::Bundle(format!("write {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), bytes = bytes.len(), "bundle written");
    Ok(())
}

/// Read and validate a table written by [`write_table`]
pub fn read_table(path: &Path) -> Result<ScheduleTable> {
    let bytes =
        std::fs::read(path).map_err(|e| Error::Bundle(format!("read {}: {}", path.display(), e)))?;
    let bundle = if is_json(path) {
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| Error::Bundle(format!("{}: {}", path.display(), e)))?;
        ScheduleBundle::from_json(text)?
    } else {
        ScheduleBundle::from_bytes(&bytes)?
    };
    let table = bundle.into_table()?;
    info!(
        path = %path.display(),
        workers = table.worker_count,
        variants = table.variants.len(),
        "schedule table loaded"
    );
    Ok(table)
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}
