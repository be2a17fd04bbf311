// Glossary Term - the entity produced by imports and generation jobs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAX_TERM_NAME_LEN: usize = 200;
pub const MAX_CATEGORY_LEN: usize = 100;

/// Named block of content attached to a term, ordered by position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSection {
    pub position: u32,
    pub section: String,
    pub subsection: Option<String>,
    pub content: String,
}

/// Glossary term keyed by its trimmed name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub definition: Option<String>,
    pub short_definition: Option<String>,
    pub category: Option<String>,
    pub subcategories: Vec<String>,
    pub sections: Vec<ContentSection>,
    pub content_hash: String,
}

impl Term {
    pub fn new(name: impl Into<String>) -> Self {
        let mut term = Self {
            name: name.into().trim().to_string(),
            definition: None,
            short_definition: None,
            category: None,
            subcategories: Vec::new(),
            sections: Vec::new(),
            content_hash: String::new(),
        };
        term.rehash();
        term
    }

    pub fn has_content(&self) -> bool {
        self.definition.is_some()
            || self.short_definition.is_some()
            || self.category.is_some()
            || !self.subcategories.is_empty()
            || !self.sections.is_empty()
    }

    /// Insert or replace the section with the same (section, subsection) pair
    pub fn put_section(
        &mut self,
        section: impl Into<String>,
        subsection: Option<String>,
        content: impl Into<String>,
    ) {
        let section = section.into();
        let content = content.into();
        match self
            .sections
            .iter_mut()
            .find(|s| s.section == section && s.subsection == subsection)
        {
            Some(existing) => existing.content = content,
            None => {
                let position = self.sections.iter().map(|s| s.position + 1).max().unwrap_or(0);
                self.sections.push(ContentSection {
                    position,
                    section,
                    subsection,
                    content,
                });
            }
        }
        self.rehash();
    }

    /// Recompute `content_hash` from the mapped fields
    pub fn rehash(&mut self) {
        const FIELD: &[u8] = &[0x1f];
        const RECORD: &[u8] = &[0x1e];

        fn opt(hasher: &mut Sha256, value: &Option<String>) {
            if let Some(v) = value {
                hasher.update(v.as_bytes());
            }
            hasher.update(FIELD);
        }

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(FIELD);
        opt(&mut hasher, &self.definition);
        opt(&mut hasher, &self.short_definition);
        opt(&mut hasher, &self.category);
        for sub in &self.subcategories {
            hasher.update(sub.as_bytes());
            hasher.update(FIELD);
        }
        for s in &self.sections {
            hasher.update(RECORD);
            hasher.update(s.position.to_be_bytes());
            hasher.update(s.section.as_bytes());
            hasher.update(FIELD);
            opt(&mut hasher, &s.subsection);
            hasher.update(s.content.as_bytes());
        }
        self.content_hash = hex_digest(hasher);
    }
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    hex::encode(hasher.finalize())
}
