//! CSV decoding with encoding and delimiter auto-detection.
//!
//! Turns uploaded bytes into a header list plus [`RawRow`]s. No schema logic
//! here: headers are kept verbatim and every cell stays a string.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;

use crate::error::{CsvError, CsvResult};
use crate::models::RawRow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A decoded upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// Column headers, made unique.
    pub headers: Vec<String>,
    /// Data rows in file order, blank lines dropped.
    pub rows: Vec<RawRow>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }

    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

/// Detect the delimiter by counting occurrences in the header line.
///
/// Comma wins ties, since it is the documented format.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse uploaded bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes(bytes: &[u8]) -> CsvResult<ParsedFile> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(CsvError::new(1, "CSV file is empty"));
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);

    parse_str(&content, delimiter, encoding)
}

/// Parse a CSV file from disk with auto-detection.
pub fn parse_file<P: AsRef<Path>>(path: P) -> CsvResult<ParsedFile> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| {
        CsvError::new(0, format!("Cannot read file '{}': {}", path.as_ref().display(), e))
    })?;
    parse_bytes(&bytes)
}

/// Parse decoded CSV text with an explicit delimiter.
pub fn parse_str(content: &str, delimiter: char, encoding: String) -> CsvResult<ParsedFile> {
    let delimiter_byte = u8::try_from(delimiter)
        .map_err(|_| CsvError::new(1, format!("Unsupported delimiter '{}'", delimiter)))?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let mut records = reader.records();

    let header_record = match records.next() {
        Some(record) => record.map_err(|e| to_csv_error(e, 1))?,
        None => return Err(CsvError::new(1, "CSV file is empty")),
    };
    if header_record.iter().all(|h| h.trim().is_empty()) {
        return Err(CsvError::new(1, "No headers found in CSV"));
    }
    let headers = unique_headers(&header_record);

    let mut rows = Vec::new();
    for result in records {
        let record = result.map_err(|e| to_csv_error(e, 0))?;
        let row_number = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(rows.len() + 2);

        let cells: Vec<(String, String)> = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();

        let row = RawRow::new(row_number, cells);
        if row.is_blank() {
            continue;
        }
        rows.push(row);
    }

    Ok(ParsedFile {
        headers,
        rows,
        encoding,
        delimiter,
    })
}

/// Suffix repeated header names so each column stays addressable.
fn unique_headers(record: &StringRecord) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(record.len());
    for raw in record.iter() {
        let base = raw.trim().trim_matches('"').to_string();
        let mut candidate = base.clone();
        let mut n = 2;
        while headers.contains(&candidate) {
            candidate = format!("{} ({})", base, n);
            n += 1;
        }
        headers.push(candidate);
    }
    headers
}

fn to_csv_error(err: csv::Error, fallback_line: usize) -> CsvError {
    let line = err
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or(fallback_line);
    CsvError::new(line, format!("Invalid CSV format: {}", err))
}
