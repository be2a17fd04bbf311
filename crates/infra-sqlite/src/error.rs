// sqlx::Error -> AppError
//
// The orphan rule keeps `From<sqlx::Error> for AppError` out of this crate, so every query
// maps its error through here.

use jobflow_core::error::AppError;

/// SQLite extended result codes for UNIQUE / PRIMARY KEY violations
const UNIQUE_CODES: [&str; 2] = ["2067", "1555"];

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => match code.as_ref() {
                c if UNIQUE_CODES.contains(&c) => AppError::Conflict(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    c
                )),
                "787" | "3850" => AppError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        sqlx::Error::ColumnDecode { index, source } => {
            AppError::Database(format!("Cannot decode column {}: {}", index, source))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// Message of a UNIQUE violation, if that is what `err` is
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|c| UNIQUE_CODES.contains(&c.as_ref()))
                .unwrap_or(false) =>
        {
            Some(db_err.message().to_string())
        }
        _ => None,
    }
}

/// Store a u64 counter in an INTEGER column
pub(crate) fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
