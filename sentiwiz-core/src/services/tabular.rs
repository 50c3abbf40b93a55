//! Tabular file ingestion
//!
//! Parses delimited-text (`.csv`) and spreadsheet-archive (`.xlsx`)
//! files into a header row plus data rows, and extracts a single
//! column's non-empty values. Only a bounded preview is ever cached;
//! full extraction re-scans the source file.
//!
//! CSV parsing is deliberately minimal: fields are comma-delimited and a
//! double quote toggles an inside-quotes mode in which commas are
//! literal. Doubled-quote escaping (`""`) is NOT supported; a quoted
//! field containing `""` parses as two adjacent quote toggles. This
//! limitation is part of the import contract and is preserved as-is.

use crate::models::dataset::ColumnarDataset;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of data rows kept in the preview
pub const PREVIEW_ROWS: usize = 5;

/// Tabular ingestion errors
#[derive(Debug, Error)]
pub enum TabularError {
    /// File extension is neither `csv` nor `xlsx`
    #[error("Unsupported file format: .{0}")]
    UnsupportedFormat(String),

    /// File bytes could not be decoded as text
    #[error("File is not valid UTF-8 text: {0}")]
    UnreadableEncoding(PathBuf),

    /// File contains no rows at all
    #[error("File contains no rows: {0}")]
    EmptyFile(PathBuf),

    /// Spreadsheet archive could not be read
    #[error("Unreadable spreadsheet archive: {0}")]
    BadArchive(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported source formats, decided by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Csv,
    Xlsx,
}

/// Tabular file reader
pub struct TabularReader;

impl TabularReader {
    /// Read the header row and up to [`PREVIEW_ROWS`] data rows
    ///
    /// Preview rows are truncated to the header width so every preview
    /// row length is at most `columns.len()`.
    pub fn read_header_and_preview(path: &Path) -> Result<ColumnarDataset, TabularError> {
        // header + preview rows
        let rows = Self::read_rows(path, Some(1 + PREVIEW_ROWS))?;

        let mut iter = rows.into_iter();
        let columns = iter.next().ok_or_else(|| TabularError::EmptyFile(path.to_path_buf()))?;
        let preview_rows = iter
            .map(|mut row| {
                row.truncate(columns.len());
                row
            })
            .collect();

        Ok(ColumnarDataset {
            columns,
            preview_rows,
            source_path: path.to_path_buf(),
        })
    }

    /// Re-scan the file and extract every non-empty, trimmed cell at
    /// `column_index`, skipping the header row
    ///
    /// Rows shorter than `column_index + 1` are skipped for that column.
    /// An index out of range for all rows yields an empty vec, not an
    /// error.
    pub fn extract_column(path: &Path, column_index: usize) -> Result<Vec<String>, TabularError> {
        let rows = Self::read_rows(path, None)?;

        Ok(rows
            .into_iter()
            .skip(1)
            .filter_map(|row| {
                row.get(column_index)
                    .map(|cell| cell.trim().to_string())
                    .filter(|cell| !cell.is_empty())
            })
            .collect())
    }

    /// Read up to `limit` rows (header included), dispatching on format
    fn read_rows(path: &Path, limit: Option<usize>) -> Result<Vec<Vec<String>>, TabularError> {
        let rows = match Self::detect_format(path)? {
            SourceFormat::Csv => Self::read_csv_rows(path, limit)?,
            SourceFormat::Xlsx => Self::read_xlsx_rows(path, limit)?,
        };

        if rows.is_empty() {
            return Err(TabularError::EmptyFile(path.to_path_buf()));
        }
        Ok(rows)
    }

    fn detect_format(path: &Path) -> Result<SourceFormat, TabularError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "xlsx" => Ok(SourceFormat::Xlsx),
            other => Err(TabularError::UnsupportedFormat(other.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // CSV
    // ------------------------------------------------------------------

    fn read_csv_rows(path: &Path, limit: Option<usize>) -> Result<Vec<Vec<String>>, TabularError> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8(bytes)
            .map_err(|_| TabularError::UnreadableEncoding(path.to_path_buf()))?;

        let mut rows = Vec::new();
        // Split on any newline variant; empty lines are dropped before parsing
        for line in content.split(['\r', '\n']) {
            if line.is_empty() {
                continue;
            }
            rows.push(parse_csv_line(line));
            if let Some(limit) = limit {
                if rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // XLSX
    // ------------------------------------------------------------------

    fn read_xlsx_rows(path: &Path, limit: Option<usize>) -> Result<Vec<Vec<String>>, TabularError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| TabularError::BadArchive(e.to_string()))?;

        // A missing shared-string table is not an error; string cells
        // without inline values then resolve to empty.
        let shared_strings = match read_archive_entry(&mut archive, "xl/sharedStrings.xml") {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        // First worksheet only
        let sheet_name = first_worksheet_name(&archive)
            .ok_or_else(|| TabularError::BadArchive("no worksheet found".to_string()))?;
        let sheet_xml = read_archive_entry(&mut archive, &sheet_name)
            .ok_or_else(|| TabularError::BadArchive(format!("missing entry {}", sheet_name)))?;

        parse_worksheet(&sheet_xml, &shared_strings, limit)
    }
}

/// Split one CSV line into fields
///
/// A double quote toggles in-quotes mode; commas inside quotes are
/// literal. Quote characters themselves are stripped from the output.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Read a zip entry into a string, or `None` if the entry is absent
fn read_archive_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut content = String::new();
    entry.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Name of the first worksheet entry in the archive
fn first_worksheet_name<R: Read + std::io::Seek>(archive: &zip::ZipArchive<R>) -> Option<String> {
    let preferred = "xl/worksheets/sheet1.xml";
    let mut candidates: Vec<&str> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml"))
        .collect();

    if candidates.iter().any(|n| *n == preferred) {
        return Some(preferred.to_string());
    }
    candidates.sort_unstable();
    candidates.first().map(|n| n.to_string())
}

/// Parse `xl/sharedStrings.xml` into the ordered string table
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, TabularError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader
            .read_event()
            .map_err(|e| TabularError::BadArchive(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"t" => in_text = true,
            Event::End(e) if e.name().as_ref() == b"t" => in_text = false,
            Event::Text(t) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| TabularError::BadArchive(e.to_string()))?;
                current.push_str(&text);
            }
            Event::End(e) if e.name().as_ref() == b"si" => {
                strings.push(std::mem::take(&mut current));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// Parse a worksheet XML into positional rows
///
/// Cells are ordered by their column reference; gaps resolve to empty
/// strings so positions stay aligned with the header.
fn parse_worksheet(
    xml: &str,
    shared_strings: &[String],
    limit: Option<usize>,
) -> Result<Vec<Vec<String>>, TabularError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut rows: Vec<Vec<String>> = Vec::new();

    // Per-row accumulation
    let mut cells: Vec<(usize, String)> = Vec::new();
    let mut next_column = 0usize;

    // Per-cell accumulation
    let mut cell_column = 0usize;
    let mut cell_is_shared = false;
    let mut cell_value = String::new();
    let mut in_value = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| TabularError::BadArchive(e.to_string()))?;

        match event {
            Event::Start(e) if e.name().as_ref() == b"row" => {
                cells.clear();
                next_column = 0;
            }
            Event::Start(e) if e.name().as_ref() == b"c" => {
                // Column from the cell reference; cells without one are
                // treated as following the previous cell.
                cell_column = cell_attr(&e, b"r")?
                    .and_then(|r| column_ref_to_index(&r))
                    .unwrap_or(next_column);
                cell_is_shared = cell_attr(&e, b"t")?.as_deref() == Some("s");
                cell_value.clear();
            }
            // <v> holds numeric/shared values, <t> holds inline strings
            Event::Start(e) if matches!(e.name().as_ref(), b"v" | b"t") => in_value = true,
            Event::End(e) if matches!(e.name().as_ref(), b"v" | b"t") => in_value = false,
            Event::Text(t) if in_value => {
                let text = t
                    .unescape()
                    .map_err(|e| TabularError::BadArchive(e.to_string()))?;
                cell_value.push_str(&text);
            }
            Event::End(e) if e.name().as_ref() == b"c" => {
                let text = if cell_is_shared {
                    cell_value
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    std::mem::take(&mut cell_value)
                };
                cells.push((cell_column, text));
                next_column = cell_column + 1;
            }
            Event::End(e) if e.name().as_ref() == b"row" => {
                cells.sort_by_key(|(col, _)| *col);
                let width = cells.last().map(|(col, _)| col + 1).unwrap_or(0);
                let mut row = vec![String::new(); width];
                for (col, text) in cells.drain(..) {
                    row[col] = text;
                }
                rows.push(row);
                if let Some(limit) = limit {
                    if rows.len() >= limit {
                        break;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

/// Read one attribute of a worksheet element as a string
fn cell_attr(
    e: &quick_xml::events::BytesStart<'_>,
    name: &[u8],
) -> Result<Option<String>, TabularError> {
    match e.try_get_attribute(name) {
        Ok(Some(attr)) => {
            let value = attr
                .unescape_value()
                .map_err(|err| TabularError::BadArchive(err.to_string()))?;
            Ok(Some(value.into_owned()))
        }
        Ok(None) => Ok(None),
        Err(err) => Err(TabularError::BadArchive(err.to_string())),
    }
}

/// Convert a cell reference like `B7` to a zero-based column index
///
/// Returns `None` when the reference has no letter prefix.
fn column_ref_to_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }

    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}
