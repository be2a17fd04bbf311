// Row mapping: raw record cells -> glossary Term

use crate::domain::term::{MAX_CATEGORY_LEN, MAX_TERM_NAME_LEN};
use crate::domain::Term;
use crate::error::{AppError, Result};
use crate::port::{RawRecord, RecordError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnRole {
    Term,
    Definition,
    ShortDefinition,
    Category,
    Subcategories,
    Section {
        section: String,
        subsection: Option<String>,
    },
    Ignored,
}

/// Maps records of one source (fixed header) into terms
#[derive(Debug, Clone)]
pub struct RowMapper {
    roles: Vec<ColumnRole>,
}

impl RowMapper {
    /// Build the column layout; the first column is always the term name
    pub fn from_headers(headers: &[String]) -> Result<Self> {
        if headers.is_empty() {
            return Err(AppError::Validation(
                "source has no header row; the first column must hold the term".into(),
            ));
        }

        let roles = headers
            .iter()
            .enumerate()
            .map(|(i, h)| if i == 0 { ColumnRole::Term } else { classify(h) })
            .collect();
        Ok(Self { roles })
    }

    pub fn column_count(&self) -> usize {
        self.roles.len()
    }

    /// Map one record
    ///
    /// `Ok(None)` means the term cell is blank: a benign skip.
    pub fn map(&self, record: &RawRecord) -> std::result::Result<Option<Term>, RecordError> {
        if record.values.len() != self.roles.len() {
            return Err(RecordError::Malformed {
                index: record.index,
                reason: format!(
                    "expected {} fields, found {}",
                    self.roles.len(),
                    record.values.len()
                ),
            });
        }

        let name = match record.values[0].as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(None),
        };
        let mut term = Term::new(name);

        for (role, value) in self.roles.iter().zip(&record.values).skip(1) {
            let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            match role {
                ColumnRole::Definition if term.definition.is_none() => {
                    term.definition = Some(value.to_string())
                }
                ColumnRole::ShortDefinition if term.short_definition.is_none() => {
                    term.short_definition = Some(value.to_string())
                }
                ColumnRole::Category if term.category.is_none() => {
                    term.category = Some(value.to_string())
                }
                ColumnRole::Subcategories => {
                    for sub in split_list(value) {
                        if !term.subcategories.contains(&sub) {
                            term.subcategories.push(sub);
                        }
                    }
                }
                ColumnRole::Section {
                    section,
                    subsection,
                } => {
                    let position = term.sections.len() as u32;
                    term.sections.push(crate::domain::ContentSection {
                        position,
                        section: section.clone(),
                        subsection: subsection.clone(),
                        content: value.to_string(),
                    });
                }
                _ => {}
            }
        }

        validate(&term, record.index)?;
        term.rehash();
        Ok(Some(term))
    }
}

fn classify(header: &str) -> ColumnRole {
    let header = header.trim();
    if header.is_empty() {
        return ColumnRole::Ignored;
    }

    match header.to_ascii_lowercase().as_str() {
        "definition" | "overview" | "description" => return ColumnRole::Definition,
        "short_definition" | "short definition" | "summary" => {
            return ColumnRole::ShortDefinition
        }
        _ => {}
    }

    let (section, subsection) = split_header(header);
    match subsection.as_deref() {
        Some(sub) if sub.contains("Definition and Overview") => ColumnRole::Definition,
        Some(sub) if sub.contains("Main Category") => ColumnRole::Category,
        Some(sub) if sub.contains("Sub-category") => ColumnRole::Subcategories,
        _ => ColumnRole::Section {
            section,
            subsection,
        },
    }
}

/// "Section – Subsection": split on the first en dash, else the first hyphen
fn split_header(header: &str) -> (String, Option<String>) {
    let parts = header
        .split_once('–')
        .or_else(|| header.split_once('-'));
    match parts {
        Some((section, subsection)) => {
            let subsection = subsection.trim();
            (
                section.trim().to_string(),
                (!subsection.is_empty()).then(|| subsection.to_string()),
            )
        }
        None => (header.to_string(), None),
    }
}

/// Comma-separated when a comma is present, else semicolon-separated
fn split_list(value: &str) -> Vec<String> {
    let sep = if value.contains(',') { ',' } else { ';' };
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate(term: &Term, index: u64) -> std::result::Result<(), RecordError> {
    let invalid = |reason: String| Err(RecordError::Invalid { index, reason });

    if term.name.chars().count() > MAX_TERM_NAME_LEN {
        return invalid(format!(
            "term name longer than {} characters",
            MAX_TERM_NAME_LEN
        ));
    }
    if let Some(category) = &term.category {
        if category.chars().count() > MAX_CATEGORY_LEN {
            return invalid(format!(
                "category longer than {} characters",
                MAX_CATEGORY_LEN
            ));
        }
    }
    if !term.has_content() {
        return invalid(format!("term '{}' has no content", term.name));
    }
    Ok(())
}
