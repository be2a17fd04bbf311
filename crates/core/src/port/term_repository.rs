// Term Repository Port

use crate::domain::Term;
use crate::error::Result;
use async_trait::async_trait;

/// Read and single-term write access to imported glossary terms
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TermRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Term>>;

    async fn count(&self) -> Result<i64>;

    /// Upsert one term (replacing its sections); returns false when the content hash matched
    async fn upsert(&self, term: &Term, source_job_id: &str) -> Result<bool>;
}
