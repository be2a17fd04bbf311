// Record Source Port - forward-only streams of structured records

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured formats the importer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    #[serde(rename = "jsonl", alias = "jsonlines", alias = "ndjson")]
    JsonLines,
}

impl SourceFormat {
    /// Infer the format from a location's extension
    pub fn infer(location: &str) -> Option<Self> {
        let ext = location.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SourceFormat::Csv),
            "jsonl" | "ndjson" => Some(SourceFormat::JsonLines),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Csv => f.write_str("csv"),
            SourceFormat::JsonLines => f.write_str("jsonl"),
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "jsonl" | "ndjson" | "jsonlines" => Ok(SourceFormat::JsonLines),
            other => Err(AppError::Validation(format!(
                "unsupported source format '{}'",
                other
            ))),
        }
    }
}

/// What to open and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub location: String,
    pub format: SourceFormat,
    /// Count records in a pre-pass so progress can show a total
    pub count_total: bool,
    /// Records buffered between the parser and the importer
    pub channel_capacity: usize,
}

/// One parsed record; values are aligned with the source headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 0-based record ordinal in the source
    pub index: u64,
    /// Byte position just past this record
    pub byte_offset: u64,
    pub values: Vec<Option<String>>,
}

/// Item yielded by a record source
///
/// Both variants consume one record index, so resume positions stay stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Record(RawRecord),
    Malformed {
        index: u64,
        byte_offset: u64,
        reason: String,
    },
}

impl SourceEvent {
    pub fn index(&self) -> u64 {
        match self {
            SourceEvent::Record(r) => r.index,
            SourceEvent::Malformed { index, .. } => *index,
        }
    }

    pub fn byte_offset(&self) -> u64 {
        match self {
            SourceEvent::Record(r) => r.byte_offset,
            SourceEvent::Malformed { byte_offset, .. } => *byte_offset,
        }
    }
}

/// Record-level failures; counted by the importer, never job failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record could not be parsed at all
    #[error("record {index}: malformed: {reason}")]
    Malformed { index: u64, reason: String },

    /// The record parsed but violates the term schema
    #[error("record {index}: invalid: {reason}")]
    Invalid { index: u64, reason: String },
}

#[async_trait]
pub trait RecordSource: Send {
    /// Header row (CSV) or the first object's keys (JSON Lines)
    fn headers(&self) -> &[String];

    /// Total number of records, when the source could determine it cheaply
    fn total_records(&self) -> Option<u64>;

    /// Next record; `Ok(None)` at end of stream
    ///
    /// # Errors
    /// Fatal I/O failures only. Unparseable records arrive as `SourceEvent::Malformed`.
    async fn next(&mut self) -> Result<Option<SourceEvent>>;
}

#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Source over a fixed list of events
    pub struct VecRecordSource {
        headers: Vec<String>,
        events: std::vec::IntoIter<SourceEvent>,
        total: Option<u64>,
        /// Fail with an I/O error when this many events have been yielded
        fail_after: Option<usize>,
        yielded: usize,
    }

    impl VecRecordSource {
        pub fn new(headers: Vec<String>, events: Vec<SourceEvent>) -> Self {
            let total = Some(events.len() as u64);
            Self {
                headers,
                events: events.into_iter(),
                total,
                fail_after: None,
                yielded: 0,
            }
        }
    }

    #[async_trait]
    impl RecordSource for VecRecordSource {
        fn headers(&self) -> &[String] {
            &self.headers
        }

        fn total_records(&self) -> Option<u64> {
            self.total
        }

        async fn next(&mut self) -> Result<Option<SourceEvent>> {
            if self.fail_after == Some(self.yielded) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "scripted read failure",
                )));
            }
            self.yielded += 1;
            Ok(self.events.next())
        }
    }

    #[derive(Clone)]
    struct Fixture {
        headers: Vec<String>,
        events: Vec<SourceEvent>,
        fail_after: Option<usize>,
    }

    /// Opener serving in-memory fixtures by location
    #[derive(Clone, Default)]
    pub struct StaticSourceOpener {
        fixtures: Arc<Mutex<HashMap<String, Fixture>>>,
        opens: Arc<AtomicUsize>,
    }

    impl StaticSourceOpener {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register rows of plain cells; empty cells become `None`
        pub fn insert_rows(&self, location: &str, headers: &[&str], rows: Vec<Vec<&str>>) {
            let events = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| {
                    SourceEvent::Record(RawRecord {
                        index: i as u64,
                        byte_offset: (i as u64 + 1) * 64,
                        values: row
                            .into_iter()
                            .map(|v| (!v.is_empty()).then(|| v.to_string()))
                            .collect(),
                    })
                })
                .collect();
            self.insert_events(location, headers, events);
        }

        pub fn insert_events(&self, location: &str, headers: &[&str], events: Vec<SourceEvent>) {
            self.fixtures.lock().unwrap().insert(
                location.to_string(),
                Fixture {
                    headers: headers.iter().map(|h| h.to_string()).collect(),
                    events,
                    fail_after: None,
                },
            );
        }

        /// Make reads of `location` fail after `count` events
        pub fn fail_after(&self, location: &str, count: Option<usize>) {
            if let Some(f) = self.fixtures.lock().unwrap().get_mut(location) {
                f.fail_after = count;
            }
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceOpener for StaticSourceOpener {
        async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let fixture = self
                .fixtures
                .lock()
                .unwrap()
                .get(&spec.location)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("source {}", spec.location)))?;
            let mut source = VecRecordSource::new(fixture.headers, fixture.events);
            source.fail_after = fixture.fail_after;
            if !spec.count_total {
                source.total = None;
            }
            Ok(Box::new(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_format_from_extension() {
        assert_eq!(SourceFormat::infer("/data/terms.CSV"), Some(SourceFormat::Csv));
        assert_eq!(
            SourceFormat::infer("dump.ndjson"),
            Some(SourceFormat::JsonLines)
        );
        assert_eq!(SourceFormat::infer("terms.xlsx"), None);
        assert!("parquet".parse::<SourceFormat>().is_err());
    }
}
