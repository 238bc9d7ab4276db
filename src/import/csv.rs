//! Minimal CSV reading and writing (RFC 4180 quoting, quoted newlines).

use std::collections::HashMap;

use super::ImportError;

/// One logical record and the physical line it starts on (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    pub line: usize,
    pub fields: Vec<String>,
}

impl CsvRecord {
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.trim().is_empty())
    }
}

pub fn parse_records(text: &str) -> Vec<CsvRecord> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut buf));
                records.push(CsvRecord {
                    line: record_line,
                    fields: std::mem::take(&mut fields),
                });
                line += 1;
                record_line = line;
            }
            '\n' => {
                buf.push(ch);
                line += 1;
            }
            _ => buf.push(ch),
        }
    }

    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push(CsvRecord {
            line: record_line,
            fields,
        });
    }

    records
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Serialize one row, terminated by CRLF
pub fn write_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

/// Column positions by lowercased header name
#[derive(Debug, Clone)]
pub struct Header {
    columns: HashMap<String, usize>,
}

impl Header {
    /// Map the header record, failing if any `required` column is absent
    pub fn resolve(record: &CsvRecord, required: &[&str]) -> Result<Self, ImportError> {
        let columns: HashMap<String, usize> = record
            .fields
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_lowercase(), i))
            .collect();

        let missing: Vec<String> = required
            .iter()
            .filter(|name| !columns.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }

        Ok(Self { columns })
    }

    /// Trimmed value of `column` in `record`, empty when absent
    pub fn get<'a>(&self, record: &'a CsvRecord, column: &str) -> &'a str {
        self.columns
            .get(column)
            .and_then(|&i| record.fields.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

/// Split text into its header and the non-blank data records
pub fn split_header(text: &str, required: &[&str]) -> Result<(Header, Vec<CsvRecord>), ImportError> {
    let mut records = parse_records(text).into_iter().filter(|r| !r.is_blank());
    let header_record = records.next().ok_or(ImportError::EmptyInput)?;
    let header = Header::resolve(&header_record, required)?;
    Ok((header, records.collect()))
}
