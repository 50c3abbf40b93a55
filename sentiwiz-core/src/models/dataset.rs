//! Imported spreadsheet preview

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Header row plus a bounded preview of an imported file
///
/// Immutable after creation. Only the preview is held in memory; full
/// column extraction re-reads the source file so arbitrarily large
/// spreadsheets stay cheap to import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnarDataset {
    /// Ordered header names (unique in practice, not enforced)
    pub columns: Vec<String>,
    /// First data rows, capped for display; each row length is at most
    /// `columns.len()`
    pub preview_rows: Vec<Vec<String>>,
    /// Originating file
    pub source_path: PathBuf,
}
