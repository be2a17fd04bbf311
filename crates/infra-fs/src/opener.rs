// SourceOpener for local files

use crate::stream::{Producer, StreamingSource};
use crate::{csv_format, jsonl_format};
use async_trait::async_trait;
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{RecordSource, SourceFormat, SourceOpener, SourceSpec};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::info;

/// Opens `file://` URIs and plain paths
#[derive(Debug, Clone, Default)]
pub struct FileSourceOpener;

impl FileSourceOpener {
    pub fn new() -> Self {
        Self
    }

    /// Stream records from any reader; the total is unknown
    pub async fn open_reader<R>(
        input: R,
        format: SourceFormat,
        capacity: usize,
    ) -> Result<StreamingSource>
    where
        R: Read + Send + 'static,
    {
        StreamingSource::spawn(capacity, move |out| produce(input, format, None, out)).await
    }
}

fn resolve(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

/// A missing file is a payload problem, not an I/O hiccup worth retrying
fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            AppError::Validation(format!("source {} does not exist", path.display()))
        }
        _ => AppError::Io(e),
    })
}

fn produce<R: Read>(
    input: R,
    format: SourceFormat,
    total: Option<u64>,
    out: &mut Producer,
) -> Result<()> {
    match format {
        SourceFormat::Csv => csv_format::produce(input, total, out),
        SourceFormat::JsonLines => jsonl_format::produce(input, total, out),
    }
}

fn count(path: &Path, format: SourceFormat) -> Result<u64> {
    let file = open_file(path)?;
    match format {
        SourceFormat::Csv => csv_format::count(file),
        SourceFormat::JsonLines => jsonl_format::count(file),
    }
}

#[async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>> {
        let path = resolve(&spec.location);
        let format = spec.format;
        let count_total = spec.count_total;

        let source = StreamingSource::spawn(spec.channel_capacity, move |out| {
            // Bounded-memory pre-pass over the same file
            let total = if count_total {
                Some(count(&path, format)?)
            } else {
                None
            };
            produce(open_file(&path)?, format, total, out)
        })
        .await?;

        info!(
            location = %spec.location,
            format = %format,
            columns = source.headers().len(),
            total_records = ?source.total_records(),
            "Opened record source"
        );
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_core::port::{RawRecord, SourceEvent};
    use std::io::{Cursor, Write};

    fn spec(path: &Path, format: SourceFormat, count_total: bool) -> SourceSpec {
        SourceSpec {
            location: path.display().to_string(),
            format,
            count_total,
            channel_capacity: 2,
        }
    }

    async fn drain(source: &mut dyn RecordSource) -> Vec<SourceEvent> {
        let mut events = Vec::new();
        while let Some(event) = source.next().await.unwrap() {
            events.push(event);
        }
        events
    }

    fn write_file(suffix: &str, contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_csv_file_with_malformed_row() {
        let file = write_file(
            ".csv",
            b"Term,How It Works - Core Principles\nTensor,Indices\nBroken,a,b\nVector,,\nGraph,Nodes\n",
        );
        let mut source = FileSourceOpener::new()
            .open(&spec(file.path(), SourceFormat::Csv, true))
            .await
            .unwrap();

        assert_eq!(source.headers(), ["Term", "How It Works - Core Principles"]);
        assert_eq!(source.total_records(), Some(4));

        let events = drain(source.as_mut()).await;
        assert_eq!(events.len(), 4);
        match &events[0] {
            SourceEvent::Record(RawRecord { index, values, .. }) => {
                assert_eq!(*index, 0);
                assert_eq!(values, &vec![Some("Tensor".to_string()), Some("Indices".to_string())]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(events[1], SourceEvent::Malformed { index: 1, .. }));
        // "Vector,," has three fields against two headers
        assert!(matches!(events[2], SourceEvent::Malformed { index: 2, .. }));
        assert_eq!(events[3].index(), 3);
        assert!(events
            .windows(2)
            .all(|pair| pair[0].byte_offset() < pair[1].byte_offset()));
    }

    #[tokio::test]
    async fn test_jsonl_file_preserves_key_order() {
        let file = write_file(
            ".jsonl",
            br#"{"term": "Tensor", "Definition and Overview": "An array", "tags": ["math", "ml"]}

{"tags": "solo", "term": "Vector"}
not json
"#,
        );
        let mut source = FileSourceOpener::new()
            .open(&spec(file.path(), SourceFormat::JsonLines, false))
            .await
            .unwrap();

        assert_eq!(source.headers(), ["term", "Definition and Overview", "tags"]);
        assert_eq!(source.total_records(), None);

        let events = drain(source.as_mut()).await;
        assert_eq!(events.len(), 3);
        match &events[1] {
            SourceEvent::Record(record) => {
                assert_eq!(record.index, 1);
                assert_eq!(
                    record.values,
                    vec![Some("Vector".to_string()), None, Some("solo".to_string())]
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[0] {
            SourceEvent::Record(record) => {
                assert_eq!(record.values[2].as_deref(), Some("math, ml"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(events[2], SourceEvent::Malformed { index: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSourceOpener::new()
            .open(&spec(&dir.path().join("absent.csv"), SourceFormat::Csv, false))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_file_uri_and_reader_sources() {
        let file = write_file(".csv", b"term\nA\nB\n");
        let uri = format!("file://{}", file.path().display());
        let mut source = FileSourceOpener::new()
            .open(&SourceSpec {
                location: uri,
                format: SourceFormat::Csv,
                count_total: true,
                channel_capacity: 1,
            })
            .await
            .unwrap();
        assert_eq!(drain(source.as_mut()).await.len(), 2);

        let mut reader = FileSourceOpener::open_reader(
            Cursor::new(b"term\nC\n".to_vec()),
            SourceFormat::Csv,
            8,
        )
        .await
        .unwrap();
        assert_eq!(reader.total_records(), None);
        assert_eq!(drain(&mut reader).await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_jsonl_has_no_headers() {
        let file = write_file(".jsonl", b"\n\n");
        let mut source = FileSourceOpener::new()
            .open(&spec(file.path(), SourceFormat::JsonLines, true))
            .await
            .unwrap();
        assert!(source.headers().is_empty());
        assert_eq!(source.total_records(), Some(0));
        assert!(drain(source.as_mut()).await.is_empty());
    }
}
