// Content generation handler
//
// Asks the content generator for one section of a term and stores it on the term.

use super::{parse_payload, require_non_empty};
use crate::domain::{JobPayload, JobType, Term};
use crate::error::Result;
use crate::port::{
    ContentGenerator, GenerationRequest, HandlerError, JobContext, JobHandler, TermRepository,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Generated text shorter than this is treated as a failed (retryable) generation
pub const MIN_GENERATED_LEN: usize = 10;

pub struct GenerationHandler {
    generator: Arc<dyn ContentGenerator>,
    terms: Arc<dyn TermRepository>,
}

impl GenerationHandler {
    pub fn new(generator: Arc<dyn ContentGenerator>, terms: Arc<dyn TermRepository>) -> Self {
        Self { generator, terms }
    }
}

#[async_trait]
impl JobHandler for GenerationHandler {
    fn job_type(&self) -> JobType {
        JobType::generation()
    }

    fn validate(&self, payload: &JobPayload) -> Result<()> {
        let request: GenerationRequest = parse_payload(payload, "generation")?;
        require_non_empty(&request.term, "term")?;
        require_non_empty(&request.section, "section")
    }

    async fn handle(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, HandlerError> {
        let request: GenerationRequest = parse_payload(&ctx.job().payload, "generation")?;
        let content = self.generator.generate(&request).await?;
        let content = content.trim();

        if content.chars().count() < MIN_GENERATED_LEN {
            warn!(
                job_id = %ctx.job().id,
                term = %request.term,
                section = %request.section,
                length = content.len(),
                "Generated content too short"
            );
            return Err(HandlerError::transient(format!(
                "generated content for '{}' is shorter than {} characters",
                request.term, MIN_GENERATED_LEN
            )));
        }

        let mut term = self
            .terms
            .find_by_name(request.term.trim())
            .await?
            .unwrap_or_else(|| Term::new(request.term.as_str()));
        term.put_section(
            request.section.trim(),
            request.subsection.clone(),
            content,
        );
        let written = self.terms.upsert(&term, &ctx.job().id).await?;

        info!(
            job_id = %ctx.job().id,
            term = %term.name,
            section = %request.section,
            written = written,
            "Section generated"
        );
        Ok(json!({
            "term": term.name,
            "section": request.section,
            "subsection": request.subsection,
            "chars": content.chars().count(),
            "written": written,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::test_support::context;
    use crate::port::outbound::MockContentGenerator;
    use crate::port::term_repository::MockTermRepository;

    fn payload() -> serde_json::Value {
        json!({"term": "Tensor", "section": "How It Works", "subsection": "Core Principles"})
    }

    #[tokio::test]
    async fn test_stores_generated_section_on_new_term() {
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Ok("  Tensors generalize matrices to n dimensions. ".to_string()));
        let mut terms = MockTermRepository::new();
        terms.expect_find_by_name().returning(|_| Ok(None));
        terms
            .expect_upsert()
            .withf(|term, _| {
                term.name == "Tensor"
                    && term.sections.len() == 1
                    && term.sections[0].section == "How It Works"
                    && term.sections[0].subsection.as_deref() == Some("Core Principles")
                    && term.sections[0].content == "Tensors generalize matrices to n dimensions."
            })
            .times(1)
            .returning(|_, _| Ok(true));
        let handler = GenerationHandler::new(Arc::new(generator), Arc::new(terms));

        let result = handler
            .handle(&context(JobType::generation(), payload()))
            .await
            .unwrap();
        assert_eq!(result["written"], true);
    }

    #[tokio::test]
    async fn test_replaces_existing_section() {
        let mut existing = Term::new("Tensor");
        existing.definition = Some("A multi-dimensional array".into());
        existing.put_section("How It Works", Some("Core Principles".into()), "old text here");

        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Ok("Fresh generated explanation".to_string()));
        let mut terms = MockTermRepository::new();
        terms
            .expect_find_by_name()
            .returning(move |_| Ok(Some(existing.clone())));
        terms
            .expect_upsert()
            .withf(|term, _| {
                term.sections.len() == 1
                    && term.sections[0].content == "Fresh generated explanation"
                    && term.definition.as_deref() == Some("A multi-dimensional array")
            })
            .returning(|_, _| Ok(true));
        let handler = GenerationHandler::new(Arc::new(generator), Arc::new(terms));

        assert!(handler
            .handle(&context(JobType::generation(), payload()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_short_content_is_transient() {
        let mut generator = MockContentGenerator::new();
        generator.expect_generate().returning(|_| Ok("too short".to_string()));
        let mut terms = MockTermRepository::new();
        terms.expect_upsert().never();
        let handler = GenerationHandler::new(Arc::new(generator), Arc::new(terms));

        let err = handler
            .handle(&context(JobType::generation(), payload()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));
    }

    #[test]
    fn test_validate_requires_term_and_section() {
        let handler = GenerationHandler::new(
            Arc::new(MockContentGenerator::new()),
            Arc::new(MockTermRepository::new()),
        );
        assert!(handler
            .validate(&JobPayload::new(json!({"term": "Tensor"})))
            .is_err());
        assert!(handler
            .validate(&JobPayload::new(json!({"term": "", "section": "Intro"})))
            .is_err());
        assert!(handler.validate(&JobPayload::new(payload())).is_ok());
    }
}
