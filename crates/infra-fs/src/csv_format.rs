// CSV with a header row

use crate::stream::Producer;
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{RawRecord, SourceEvent};
use std::io::Read;

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(input)
}

/// I/O failures are fatal; everything else is confined to one record
fn is_fatal(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

fn map_csv_error(err: csv::Error) -> AppError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => AppError::Io(io),
        _ => AppError::Validation(format!("csv: {}", message)),
    }
}

fn decode(record: &csv::ByteRecord) -> std::result::Result<Vec<Option<String>>, String> {
    record
        .iter()
        .enumerate()
        .map(|(column, field)| match std::str::from_utf8(field) {
            Ok("") => Ok(None),
            Ok(text) => Ok(Some(text.to_string())),
            Err(e) => Err(format!("column {}: invalid UTF-8: {}", column, e)),
        })
        .collect()
}

pub(crate) fn produce<R: Read>(input: R, total: Option<u64>, out: &mut Producer) -> Result<()> {
    let mut reader = reader(input);

    let headers = reader
        .byte_headers()
        .map_err(map_csv_error)?
        .iter()
        .map(|h| {
            std::str::from_utf8(h)
                .map(|s| s.trim_start_matches('\u{feff}').trim().to_string())
                .map_err(|e| AppError::Validation(format!("csv header is not UTF-8: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    if !out.start(headers, total) {
        return Ok(());
    }

    let mut record = csv::ByteRecord::new();
    let mut index = 0u64;
    loop {
        let event = match reader.read_byte_record(&mut record) {
            Ok(false) => return Ok(()),
            Ok(true) => {
                let byte_offset = reader.position().byte();
                match decode(&record) {
                    Ok(values) => SourceEvent::Record(RawRecord {
                        index,
                        byte_offset,
                        values,
                    }),
                    Err(reason) => SourceEvent::Malformed {
                        index,
                        byte_offset,
                        reason,
                    },
                }
            }
            Err(err) if is_fatal(&err) => return Err(map_csv_error(err)),
            Err(err) => SourceEvent::Malformed {
                index,
                byte_offset: reader.position().byte(),
                reason: err.to_string(),
            },
        };

        if !out.emit(event) {
            return Ok(());
        }
        index += 1;
    }
}

/// Number of data records, malformed ones included
pub(crate) fn count<R: Read>(input: R) -> Result<u64> {
    let mut reader = reader(input);
    let mut record = csv::ByteRecord::new();
    let mut records = 0u64;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => return Ok(records),
            Ok(true) => records += 1,
            Err(err) if is_fatal(&err) => return Err(map_csv_error(err)),
            Err(_) => records += 1,
        }
    }
}
