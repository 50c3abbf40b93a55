// Integration tests for tabular file ingestion
//
// Fixtures are generated on the fly under a tempdir: CSV files as plain
// text, xlsx files as minimal zip archives containing just the entries
// the reader consumes.

use sentiwiz_core::services::tabular::{TabularError, TabularReader, PREVIEW_ROWS};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use zip::write::FileOptions;

fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Minimal xlsx: a worksheet entry plus an optional shared-string table
fn write_xlsx(
    dir: &Path,
    name: &str,
    sheet_xml: &str,
    shared_strings_xml: Option<&str>,
) -> PathBuf {
    let path = dir.join(name);
    let mut archive = zip::ZipWriter::new(File::create(&path).unwrap());
    let options = FileOptions::default();

    if let Some(sst) = shared_strings_xml {
        archive.start_file("xl/sharedStrings.xml", options).unwrap();
        archive.write_all(sst.as_bytes()).unwrap();
    }
    archive
        .start_file("xl/worksheets/sheet1.xml", options)
        .unwrap();
    archive.write_all(sheet_xml.as_bytes()).unwrap();
    archive.finish().unwrap();
    path
}

// ------------------------------------------------------------------
// CSV
// ------------------------------------------------------------------

#[test]
fn csv_header_and_preview() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        dir.path(),
        "comments.csv",
        "Name,Comment\nalice,great stuff\nbob,not for me\n",
    );

    let dataset = TabularReader::read_header_and_preview(&path).unwrap();
    assert_eq!(dataset.columns, vec!["Name", "Comment"]);
    assert_eq!(
        dataset.preview_rows,
        vec![
            vec!["alice".to_string(), "great stuff".to_string()],
            vec!["bob".to_string(), "not for me".to_string()],
        ]
    );
    assert_eq!(dataset.source_path, path);
}

#[test]
fn preview_is_capped() {
    let dir = tempdir().unwrap();
    let mut content = String::from("n\n");
    for i in 0..20 {
        content.push_str(&format!("{}\n", i));
    }
    let path = write_csv(dir.path(), "long.csv", &content);

    let dataset = TabularReader::read_header_and_preview(&path).unwrap();
    assert_eq!(dataset.preview_rows.len(), PREVIEW_ROWS);
}

#[test]
fn quoted_comma_round_trip() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "quoted.csv", "a,b,c\n1,\"hello, world\",3\n");

    let values = TabularReader::extract_column(&path, 1).unwrap();
    assert_eq!(values, vec!["hello, world"]);
}

#[test]
fn extraction_trims_and_drops_empty_cells() {
    let dir = tempdir().unwrap();
    let path = write_csv(
        dir.path(),
        "sparse.csv",
        "id,comment\n1,  spaced out  \n2,\n3,   \n4,kept\n",
    );

    let values = TabularReader::extract_column(&path, 1).unwrap();
    assert_eq!(values, vec!["spaced out", "kept"]);
    for value in &values {
        assert!(!value.is_empty());
        assert_eq!(value.trim(), value);
    }
}

#[test]
fn short_rows_are_skipped_not_errors() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "ragged.csv", "a,b,c\nonly-one\nx,y,z\n");

    let values = TabularReader::extract_column(&path, 2).unwrap();
    assert_eq!(values, vec!["z"]);
}

#[test]
fn out_of_range_column_yields_empty_not_error() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "narrow.csv", "a\n1\n2\n");

    let values = TabularReader::extract_column(&path, 7).unwrap();
    assert!(values.is_empty());
}

#[test]
fn mixed_newline_variants_and_blank_lines() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "newlines.csv", "h\r\n1\r2\n\n\r\n3\n");

    let values = TabularReader::extract_column(&path, 0).unwrap();
    assert_eq!(values, vec!["1", "2", "3"]);
}

// ------------------------------------------------------------------
// Error cases
// ------------------------------------------------------------------

#[test]
fn unsupported_extension_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "notes.txt", "a\n1\n");

    match TabularReader::read_header_and_preview(&path) {
        Err(TabularError::UnsupportedFormat(ext)) => assert_eq!(ext, "txt"),
        other => panic!("expected UnsupportedFormat, got {:?}", other.map(|d| d.columns)),
    }
}

#[test]
fn empty_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = write_csv(dir.path(), "empty.csv", "");

    assert!(matches!(
        TabularReader::read_header_and_preview(&path),
        Err(TabularError::EmptyFile(_))
    ));
}

#[test]
fn undecodable_bytes_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("binary.csv");
    std::fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

    assert!(matches!(
        TabularReader::read_header_and_preview(&path),
        Err(TabularError::UnreadableEncoding(_))
    ));
}

#[test]
fn garbage_xlsx_is_a_bad_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fake.xlsx");
    std::fs::write(&path, "this is not a zip archive").unwrap();

    assert!(matches!(
        TabularReader::read_header_and_preview(&path),
        Err(TabularError::BadArchive(_))
    ));
}

// ------------------------------------------------------------------
// XLSX
// ------------------------------------------------------------------

const SHARED_STRINGS: &str = r#"<?xml version="1.0"?>
<sst><si><t>Name</t></si><si><t>Comment</t></si><si><t>love it, would buy again</t></si></sst>"#;

const SHEET_WITH_SHARED: &str = r#"<?xml version="1.0"?>
<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>alice</t></is></c><c r="B2" t="s"><v>2</v></c></row>
<row r="3"><c r="A3"><v>42</v></c></row>
</sheetData></worksheet>"#;

#[test]
fn xlsx_header_preview_and_extraction() {
    let dir = tempdir().unwrap();
    let path = write_xlsx(dir.path(), "comments.xlsx", SHEET_WITH_SHARED, Some(SHARED_STRINGS));

    let dataset = TabularReader::read_header_and_preview(&path).unwrap();
    assert_eq!(dataset.columns, vec!["Name", "Comment"]);
    assert_eq!(dataset.preview_rows.len(), 2);
    assert_eq!(dataset.preview_rows[0][1], "love it, would buy again");

    // The quoted comma from the shared string survives extraction
    let values = TabularReader::extract_column(&path, 1).unwrap();
    assert_eq!(values, vec!["love it, would buy again"]);
}

#[test]
fn xlsx_without_shared_strings_resolves_to_empty_cells() {
    let dir = tempdir().unwrap();
    // Shared-string cells with no table resolve to empty; inline and
    // numeric cells still carry values
    let path = write_xlsx(dir.path(), "no-sst.xlsx", SHEET_WITH_SHARED, None);

    let dataset = TabularReader::read_header_and_preview(&path).unwrap();
    assert_eq!(dataset.columns.len(), 2);
    assert!(dataset.columns.iter().all(|c| c.is_empty()));

    let values = TabularReader::extract_column(&path, 0).unwrap();
    assert_eq!(values, vec!["alice", "42"]);
}

#[test]
fn xlsx_cells_are_positioned_by_column_reference() {
    let dir = tempdir().unwrap();
    // Row 2 lists C before A; extraction must still see column order
    let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>h1</t></is></c><c r="B1" t="inlineStr"><is><t>h2</t></is></c><c r="C1" t="inlineStr"><is><t>h3</t></is></c></row>
<row r="2"><c r="C2" t="inlineStr"><is><t>gamma</t></is></c><c r="A2" t="inlineStr"><is><t>alpha</t></is></c></row>
</sheetData></worksheet>"#;
    let path = write_xlsx(dir.path(), "ordered.xlsx", sheet, None);

    assert_eq!(
        TabularReader::extract_column(&path, 0).unwrap(),
        vec!["alpha"]
    );
    assert_eq!(
        TabularReader::extract_column(&path, 2).unwrap(),
        vec!["gamma"]
    );
    // B2 is absent entirely; the gap is skipped, not an error
    assert!(TabularReader::extract_column(&path, 1).unwrap().is_empty());
}
