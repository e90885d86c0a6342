//! Parsing and rendering litestream output.
//!
//! Litestream prints either logfmt lines (`level=INFO msg="..." db=...`) or a
//! whitespace-aligned table whose first row holds the column names.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{VerifyError, VerifyResult};

/// One parsed row or log line. Keys keep their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(field) => field.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A litestream log line at `level=ERROR`.
    pub fn is_error(&self) -> bool {
        self.get("level")
            .is_some_and(|level| level.eq_ignore_ascii_case("ERROR"))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Parse a whitespace-aligned table. Missing trailing cells are left out.
pub fn parse_table(stdout: &str) -> Vec<Record> {
    let mut lines = stdout.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let keys: Vec<&str> = header.split_whitespace().collect();

    lines
        .map(|line| {
            let mut record = Record::new();
            for (key, value) in keys.iter().zip(line.split_whitespace()) {
                record.insert(*key, value);
            }
            record
        })
        .collect()
}

/// Parse logfmt lines. Double-quoted values may contain spaces and `\"`.
pub fn parse_logfmt(stdout: &str) -> Vec<Record> {
    stdout
        .lines()
        .map(parse_logfmt_line)
        .filter(|record| !record.is_empty())
        .collect()
}

fn parse_logfmt_line(line: &str) -> Record {
    let mut record = Record::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            key.push(c);
        }

        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    value.push(c);
                }
            }
        }

        if !key.is_empty() {
            record.insert(key, value);
        }
    }

    record
}

/// Fail with `CommandFailed` when the output is a single `level=ERROR` record.
pub fn check_for_error(command: &str, records: &[Record]) -> VerifyResult<()> {
    match records {
        [record] if record.is_error() => {
            let reason = record
                .get("error")
                .or_else(|| record.get("msg"))
                .unwrap_or("unknown error");
            Err(VerifyError::command_failed(command, reason))
        }
        _ => Ok(()),
    }
}

/// Render records as a left-aligned table with two-space column gaps.
///
/// Columns come from the first record.
pub fn format_table(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let headers: Vec<&str> = first.keys().collect();
    let cell = |record: &Record, key: &str| record.get(key).unwrap_or("").to_string();

    let widths: Vec<usize> = headers
        .iter()
        .map(|header| {
            records
                .iter()
                .map(|r| cell(r, header).chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(text, width)| format!("{:<width$}", text, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    std::iter::once(render(headers.iter().map(|h| h.to_string()).collect()))
        .chain(
            records
                .iter()
                .map(|r| render(headers.iter().map(|h| cell(r, h)).collect())),
        )
        .collect::<Vec<_>>()
        .join("\n")
}
