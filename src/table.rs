//! Delimited text tables with a header line.
//!
//! The delimiter is taken from the header: tab, semicolon or comma when
//! present, otherwise runs of spaces. Empty lines and lines starting with `#`
//! are skipped and surrounding double quotes are removed from values.

use std::fs;
use std::path::Path;

use crate::error::InitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Tab,
    Semicolon,
    Comma,
    Whitespace,
}

impl Delimiter {
    fn detect(header: &str) -> Self {
        if header.contains('\t') {
            Delimiter::Tab
        } else if header.contains(';') {
            Delimiter::Semicolon
        } else if header.contains(',') {
            Delimiter::Comma
        } else {
            Delimiter::Whitespace
        }
    }

    fn split<'a>(self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Tab => line.split('\t').collect(),
            Delimiter::Semicolon => line.split(';').collect(),
            Delimiter::Comma => line.split(',').collect(),
            Delimiter::Whitespace => line.split_whitespace().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

/// Values of one data line plus its 1-based line number in the source.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub line: usize,
    pub values: Vec<String>,
}

impl Table {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InitError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| InitError::Table(format!("cannot read {}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, InitError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim_end_matches('\r')))
            .filter(|(_, line)| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            });

        let (_, header) = lines
            .next()
            .ok_or_else(|| InitError::Table("table is empty".into()))?;
        let delimiter = Delimiter::detect(header);
        let columns: Vec<String> = delimiter
            .split(header)
            .into_iter()
            .map(clean_value)
            .collect();

        let mut rows = Vec::new();
        for (line, text) in lines {
            let values: Vec<String> = delimiter.split(text).into_iter().map(clean_value).collect();
            if values.len() != columns.len() {
                return Err(InitError::Table(format!(
                    "line {line} has {} values but the header has {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            rows.push(TableRow { line, values });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index of a column, ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn clean_value(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
