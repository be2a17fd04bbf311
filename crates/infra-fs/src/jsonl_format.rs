// JSON Lines: one object per line, the first object's keys are the header

use crate::stream::Producer;
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{RawRecord, SourceEvent};
use serde_json::{Map, Value};
use std::io::{BufRead, BufReader, Read};

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_object(line: &[u8]) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(format!("expected a JSON object, found {}", kind(&other))),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Flatten a JSON value into a cell; arrays become comma-separated lists
fn cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(cell).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => Some(other.to_string()),
    }
}

pub(crate) fn produce<R: Read>(input: R, total: Option<u64>, out: &mut Producer) -> Result<()> {
    let mut reader = BufReader::new(input);
    let mut line = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u64;
    let mut headers: Option<Vec<String>> = None;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        offset += read as u64;
        if is_blank(&line) {
            continue;
        }

        let parsed = parse_object(&line);
        if headers.is_none() {
            let object = parsed.as_ref().map_err(|reason| {
                AppError::Validation(format!("first JSON Lines record: {}", reason))
            })?;
            let keys: Vec<String> = object.keys().cloned().collect();
            if !out.start(keys.clone(), total) {
                return Ok(());
            }
            headers = Some(keys);
        }
        let columns = headers.as_deref().unwrap_or_default();

        let event = match parsed {
            Ok(object) => SourceEvent::Record(RawRecord {
                index,
                byte_offset: offset,
                values: columns
                    .iter()
                    .map(|key| object.get(key).and_then(cell))
                    .collect(),
            }),
            Err(reason) => SourceEvent::Malformed {
                index,
                byte_offset: offset,
                reason,
            },
        };

        if !out.emit(event) {
            return Ok(());
        }
        index += 1;
    }

    if headers.is_none() {
        out.start(Vec::new(), total);
    }
    Ok(())
}

/// Number of non-blank lines
pub(crate) fn count<R: Read>(input: R) -> Result<u64> {
    let mut reader = BufReader::new(input);
    let mut line = Vec::new();
    let mut records = 0u64;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(records);
        }
        if !is_blank(&line) {
            records += 1;
        }
    }
}
