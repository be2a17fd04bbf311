use crate::error::map_sqlx_error;
use jobflow_core::error::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

struct Migration {
    version: i64,
    label: &'static str,
    script: &'static str,
}

/// Ordered schema history; each script records its own version in `schema_version`
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        label: "jobs",
        script: include_str!("../migrations/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        label: "import checkpoints and terms",
        script: include_str!("../migrations/002_import_tables.sql"),
    },
];

/// Bring the schema up to date. Safe to call on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let applied = applied_version(pool).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        info!(
            from = applied,
            version = migration.version,
            label = migration.label,
            "Applying migration"
        );
        apply(pool, migration.script).await?;
    }
    Ok(())
}

async fn applied_version(pool: &SqlitePool) -> Result<i64> {
    let tracked: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
    )
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;
    if tracked.is_none() {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// Statements in a script are separated by `;` and none may contain one.
fn statements(script: &str) -> impl Iterator<Item = String> + '_ {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|stmt| !stmt.trim().is_empty())
}

async fn apply(pool: &SqlitePool, script: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    for stmt in statements(script) {
        sqlx::query(stmt.trim())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }
    tx.commit().await.map_err(map_sqlx_error)
}
