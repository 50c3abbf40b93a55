//! Result export
//!
//! Writes the two-column `Comment,Sentiment` file the summary view hands
//! to the user. Unlike the import side, the export writer escapes
//! embedded quotes by doubling, since downstream spreadsheet tools
//! expect standard quoting.

use crate::models::analysis::AnalysisResult;
use std::path::Path;

/// Render results as two-column CSV text
pub fn results_to_csv(results: &[AnalysisResult]) -> String {
    let mut out = String::from("Comment,Sentiment\n");
    for result in results {
        out.push('"');
        out.push_str(&result.text.replace('"', "\"\""));
        out.push_str("\",");
        out.push_str(result.sentiment.as_str());
        out.push('\n');
    }
    out
}

/// Write results as CSV to `path`
pub fn write_results_csv(path: &Path, results: &[AnalysisResult]) -> std::io::Result<()> {
    std::fs::write(path, results_to_csv(results))
}
