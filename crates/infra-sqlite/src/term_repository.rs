// SQLite TermRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use jobflow_core::domain::{ContentSection, Term};
use jobflow_core::error::Result;
use jobflow_core::port::TermRepository;
use sqlx::{SqliteConnection, SqlitePool};

pub struct SqliteTermRepository {
    pool: SqlitePool,
}

impl SqliteTermRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Upsert one term on an open connection or transaction
///
/// The row is rewritten only when the content hash differs; its sections are replaced with
/// it. Returns whether anything was written.
pub(crate) async fn upsert_term(
    conn: &mut SqliteConnection,
    term: &Term,
    source_job_id: &str,
) -> Result<bool> {
    let subcategories = serde_json::to_string(&term.subcategories)?;

    let written = sqlx::query(
        r#"
        INSERT INTO terms (
            name, definition, short_definition, category, subcategories,
            content_hash, source_job_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (name) DO UPDATE SET
            definition = excluded.definition,
            short_definition = excluded.short_definition,
            category = excluded.category,
            subcategories = excluded.subcategories,
            content_hash = excluded.content_hash,
            source_job_id = excluded.source_job_id
        WHERE terms.content_hash <> excluded.content_hash
        "#,
    )
    .bind(&term.name)
    .bind(&term.definition)
    .bind(&term.short_definition)
    .bind(&term.category)
    .bind(subcategories)
    .bind(&term.content_hash)
    .bind(source_job_id)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?
    .rows_affected()
        > 0;

    if !written {
        return Ok(false);
    }

    sqlx::query("DELETE FROM term_sections WHERE term_name = ?")
        .bind(&term.name)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    for section in &term.sections {
        sqlx::query(
            r#"
            INSERT INTO term_sections (term_name, position, section, subsection, content)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&term.name)
        .bind(section.position)
        .bind(&section.section)
        .bind(&section.subsection)
        .bind(&section.content)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    }

    Ok(true)
}

#[derive(sqlx::FromRow)]
struct TermRow {
    name: String,
    definition: Option<String>,
    short_definition: Option<String>,
    category: Option<String>,
    subcategories: String,
    content_hash: String,
}

#[derive(sqlx::FromRow)]
struct SectionRow {
    position: u32,
    section: String,
    subsection: Option<String>,
    content: String,
}

#[async_trait]
impl TermRepository for SqliteTermRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Term>> {
        let row: Option<TermRow> = sqlx::query_as(
            r#"
            SELECT name, definition, short_definition, category, subcategories, content_hash
            FROM terms WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let sections: Vec<SectionRow> = sqlx::query_as(
            r#"
            SELECT position, section, subsection, content
            FROM term_sections WHERE term_name = ?
            ORDER BY position ASC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(Some(Term {
            name: row.name,
            definition: row.definition,
            short_definition: row.short_definition,
            category: row.category,
            subcategories: serde_json::from_str(&row.subcategories)?,
            sections: sections
                .into_iter()
                .map(|s| ContentSection {
                    position: s.position,
                    section: s.section,
                    subsection: s.subsection,
                    content: s.content,
                })
                .collect(),
            content_hash: row.content_hash,
        }))
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM terms")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn upsert(&self, term: &Term, source_job_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let written = upsert_term(&mut tx, term, source_job_id).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(written)
    }
}
