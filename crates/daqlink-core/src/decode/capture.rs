//! Capture block sanitizing
//!
//! Data-capture dumps (e.g. the spin-test `DMO` report) are CRLF separated
//! records of tab separated fields:
//!
//! ```text
//! record 0..N-1   metadata (kept verbatim)
//! record H        column names
//! other records   numeric samples, fixed column count
//! ```
//!
//! Records that do not have the expected column count, or that contain a field
//! that is not a finite number, are dropped and counted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DecodeError;

/// Where things live inside a capture dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLayout {
    /// Number of leading metadata records
    pub metadata_rows: usize,
    /// Record index holding the column names
    pub header_row: usize,
    /// Field count every data record must have
    pub expected_columns: usize,
    /// Separator between records
    pub record_separator: &'static str,
    /// Separator between fields of a record
    pub field_separator: char,
}

impl CaptureLayout {
    /// DSM spin-test driver `DMO` dump
    pub const SPIN_TEST: CaptureLayout = CaptureLayout {
        metadata_rows: 8,
        header_row: 9,
        expected_columns: 6,
        record_separator: "\r\n",
        field_separator: '\t',
    };

    /// Layout with CRLF records and tab separated fields
    pub fn new(metadata_rows: usize, header_row: usize, expected_columns: usize) -> Self {
        Self {
            metadata_rows,
            header_row,
            expected_columns,
            record_separator: "\r\n",
            field_separator: '\t',
        }
    }
}

/// One all-numeric capture record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow(pub Vec<f64>);

impl DataRow {
    /// Field values in column order
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Value of one column
    pub fn get(&self, column: usize) -> Option<f64> {
        self.0.get(column).copied()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed capture dump
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureBlock {
    /// Metadata records split into fields, unparsed
    pub metadata: Vec<Vec<String>>,
    /// Column names from the header record
    pub columns: Vec<String>,
    /// Retained data rows in arrival order
    pub rows: Vec<DataRow>,
    /// Number of non-empty records discarded as malformed
    pub dropped: usize,
}

impl CaptureBlock {
    /// Parse a capture dump according to `layout`
    pub fn parse(raw: &str, layout: &CaptureLayout) -> Result<Self, DecodeError> {
        let records: Vec<&str> = raw.split(layout.record_separator).collect();
        if records.len() <= layout.header_row {
            return Err(DecodeError::MissingHeader {
                records: records.len(),
                header_row: layout.header_row,
            });
        }

        let metadata = records
            .iter()
            .take(layout.metadata_rows)
            .map(|record| {
                record
                    .split(layout.field_separator)
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        let columns = records[layout.header_row]
            .split(layout.field_separator)
            .map(|name| name.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        let mut dropped = 0;
        for (index, record) in records.iter().enumerate().skip(layout.metadata_rows) {
            if index == layout.header_row || record.trim().is_empty() {
                continue;
            }
            match parse_row(record, layout) {
                Some(row) => rows.push(row),
                None => dropped += 1,
            }
        }

        debug!(
            "capture parsed: {} rows kept, {} dropped, {} metadata records",
            rows.len(),
            dropped,
            layout.metadata_rows
        );

        Ok(Self {
            metadata,
            columns,
            rows,
            dropped,
        })
    }

    /// Samples of a named column
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }

    /// Drop outlier rows in place, returning how many were removed
    pub fn retain_inliers(&mut self, filter: &OutlierFilter) -> usize {
        let before = self.rows.len();
        self.rows = filter_outliers(&self.rows, filter);
        before - self.rows.len()
    }
}

fn parse_row(record: &str, layout: &CaptureLayout) -> Option<DataRow> {
    let fields: Vec<&str> = record.split(layout.field_separator).collect();
    if fields.len() != layout.expected_columns {
        return None;
    }

    fields
        .iter()
        .map(|field| field.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()
        .map(DataRow)
}

/// Parse a capture dump with CRLF records and tab fields
pub fn parse_capture(
    raw: &str,
    metadata_rows: usize,
    header_row: usize,
    expected_columns: usize,
) -> Result<CaptureBlock, DecodeError> {
    CaptureBlock::parse(raw, &CaptureLayout::new(metadata_rows, header_row, expected_columns))
}

/// Spike rejection thresholds over an index/speed column pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierFilter {
    /// Column holding the sample index
    pub index_column: usize,
    /// Column holding the speed reading
    pub speed_column: usize,
    /// Largest accepted index jump between neighbouring samples
    pub max_index_delta: f64,
    /// Largest accepted speed jump between neighbouring samples
    pub max_speed_delta: f64,
}

impl OutlierFilter {
    /// Thresholds used for spin-test captures
    pub const SPIN_TEST: OutlierFilter = OutlierFilter {
        index_column: 0,
        speed_column: 5,
        max_index_delta: 1000.0,
        max_speed_delta: 5.0,
    };

    fn accepts(&self, anchor: &DataRow, candidate: &DataRow) -> bool {
        let delta = |column: usize| -> Option<f64> {
            Some((candidate.get(column)? - anchor.get(column)?).abs())
        };

        match (delta(self.index_column), delta(self.speed_column)) {
            (Some(index), Some(speed)) => {
                index <= self.max_index_delta && speed <= self.max_speed_delta
            }
            _ => false,
        }
    }
}

/// Remove anomalous spikes from a row sequence
///
/// The first row is always kept and becomes the anchor. Each following row is
/// compared with the most recently kept row: if either delta exceeds its limit
/// the row is skipped and the anchor stays put, otherwise the row is kept and
/// becomes the new anchor.
pub fn filter_outliers(rows: &[DataRow], filter: &OutlierFilter) -> Vec<DataRow> {
    let mut iter = rows.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };

    let mut kept = vec![first.clone()];
    let mut anchor = first;
    for candidate in iter {
        if filter.accepts(anchor, candidate) {
            kept.push(candidate.clone());
            anchor = candidate;
        } else {
            debug!("outlier rejected: {:?} (anchor {:?})", candidate.values(), anchor.values());
        }
    }

    kept
}
