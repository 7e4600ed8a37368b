//! Table detection over extracted page text.
//!
//! A table is a run of consecutive lines that split into the same number
//! (two or more) of cells, where cells are separated by tabs or by runs of at
//! least two spaces.

use crate::error::IngestError;
use regex::Regex;

pub const DEFAULT_MIN_TABLE_ROWS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn to_csv(&self) -> Result<String, IngestError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|error| IngestError::InvalidArgument(error.to_string()))?;
        String::from_utf8(bytes).map_err(|error| IngestError::InvalidArgument(error.to_string()))
    }

    /// Flat text used to encode the table.
    pub fn to_text(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct TableDetector {
    separator: Regex,
    min_rows: usize,
}

impl TableDetector {
    pub fn new(min_rows: usize) -> Result<Self, IngestError> {
        if min_rows < 2 {
            return Err(IngestError::InvalidArgument(format!(
                "a table needs at least 2 rows, got min_rows={min_rows}"
            )));
        }
        Ok(Self {
            separator: Regex::new(r"\t+|\s{2,}").map_err(|error| {
                IngestError::InvalidArgument(format!("cell separator: {error}"))
            })?,
            min_rows,
        })
    }

    pub fn split_cells(&self, line: &str) -> Vec<String> {
        self.separator
            .split(line.trim())
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn detect(&self, page_text: &str) -> Vec<Table> {
        let mut tables = Vec::new();
        let mut current: Vec<Vec<String>> = Vec::new();

        for line in page_text.lines() {
            let cells = self.split_cells(line);
            let continues = cells.len() >= 2
                && current
                    .first()
                    .map_or(true, |first| first.len() == cells.len());

            if continues {
                current.push(cells);
                continue;
            }

            self.flush(&mut current, &mut tables);
            if cells.len() >= 2 {
                current.push(cells);
            }
        }
        self.flush(&mut current, &mut tables);

        tables
    }

    fn flush(&self, current: &mut Vec<Vec<String>>, tables: &mut Vec<Table>) {
        if current.len() >= self.min_rows {
            tables.push(Table {
                rows: std::mem::take(current),
            });
        } else {
            current.clear();
        }
    }
}
