// Batch Importer - resumable, checkpointed ingestion of structured sources
//
// Each batch of mapped terms is committed in one transaction together with the checkpoint
// that describes it. A retry re-reads the source from the start, skips `rows_processed`
// records, and continues; upserts keyed by term name keep the final state exactly-once.

pub mod mapping;
pub mod payload;

pub use mapping::RowMapper;
pub use payload::ImportPayload;

use crate::domain::term::hex_digest;
use crate::domain::{BatchTally, Checkpoint, ImportConfig, ImportSummary, JobPayload, JobType, Term};
use crate::error::{AppError, Result};
use crate::port::{
    BatchCommit, CheckpointStore, HandlerError, JobContext, JobHandler, RecordError, RecordSource,
    SourceEvent, SourceOpener, SourceSpec, TimeProvider,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Handler for the `import` job type
pub struct BatchImporter {
    opener: Arc<dyn SourceOpener>,
    checkpoints: Arc<dyn CheckpointStore>,
    time_provider: Arc<dyn TimeProvider>,
    config: ImportConfig,
}

struct Batch {
    terms: Vec<Term>,
    tally: BatchTally,
    exhausted: bool,
}

impl BatchImporter {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        checkpoints: Arc<dyn CheckpointStore>,
        time_provider: Arc<dyn TimeProvider>,
        config: ImportConfig,
    ) -> Self {
        Self {
            opener,
            checkpoints,
            time_provider,
            config,
        }
    }

    /// Run (or resume) the import described by the job's payload
    pub async fn run(&self, ctx: &JobContext) -> std::result::Result<ImportSummary, HandlerError> {
        let job = ctx.job();
        let payload = ImportPayload::from_payload(&job.payload)?;
        payload.validate(&self.config)?;
        let batch_size = payload.batch_size(&self.config);

        let stored = self.checkpoints.load(&job.id).await?;
        if let Some(cp) = &stored {
            if cp.terminal {
                info!(job_id = %job.id, "Checkpoint already terminal; returning stored summary");
                return Ok(cp.summary(cp.rows_processed));
            }
            if cp.source_ref != payload.source {
                return Err(self.consistency(
                    &job.id,
                    format!(
                        "checkpoint source '{}' does not match payload source '{}'",
                        cp.source_ref, payload.source
                    ),
                ));
            }
        }

        let known_total = payload
            .total_rows
            .or_else(|| stored.as_ref().and_then(|cp| cp.total_rows));
        let spec = SourceSpec {
            location: payload.source.clone(),
            format: payload.resolve_format()?,
            count_total: self.config.count_total_rows && known_total.is_none(),
            channel_capacity: batch_size,
        };
        let mut source = self.opener.open(&spec).await?;
        let nothing_committed = stored.as_ref().map_or(true, |cp| cp.rows_processed == 0);
        if source.headers().is_empty() && nothing_committed && source.next().await?.is_none() {
            self.checkpoints
                .finish(&job.id, None, self.time_provider.now_millis())
                .await?;
            info!(job_id = %job.id, source = %payload.source, "Source is empty; nothing to import");
            return Ok(ImportSummary::default());
        }
        let digest = header_digest(source.headers());
        let mapper = RowMapper::from_headers(source.headers())?;

        let mut checkpoint = match stored {
            Some(cp) if cp.header_digest != digest => {
                return Err(self.consistency(
                    &job.id,
                    "source header changed since the last committed batch".to_string(),
                ));
            }
            Some(cp) => cp,
            None => Checkpoint::begin(
                job.id.clone(),
                payload.source.clone(),
                digest,
                known_total.or_else(|| source.total_records()),
                self.time_provider.now_millis(),
            ),
        };

        let resumed_from = checkpoint.rows_processed;
        if resumed_from > 0 {
            info!(
                job_id = %job.id,
                resumed_from = resumed_from,
                last_batch_id = checkpoint.last_batch_id,
                "Resuming import from checkpoint"
            );
            self.skip_committed(source.as_mut(), resumed_from, &job.id)
                .await?;
        } else {
            info!(
                job_id = %job.id,
                source = %payload.source,
                format = %spec.format,
                batch_size = batch_size,
                total_rows = ?checkpoint.total_rows,
                "Starting import"
            );
        }

        loop {
            if ctx.is_cancelled().await {
                self.checkpoints
                    .finish(&job.id, Some("cancelled"), self.time_provider.now_millis())
                    .await?;
                info!(
                    job_id = %job.id,
                    rows_processed = checkpoint.rows_processed,
                    "Import cancelled at batch boundary"
                );
                return Err(HandlerError::Cancelled);
            }

            let Batch {
                terms,
                tally,
                exhausted,
            } = self
                .read_batch(source.as_mut(), &mapper, batch_size, &job.id)
                .await?;
            if tally.records > 0 {
                checkpoint = self.commit(ctx, checkpoint, terms, tally).await?;
            }
            if exhausted {
                break;
            }
        }

        self.checkpoints
            .finish(&job.id, None, self.time_provider.now_millis())
            .await?;
        let summary = checkpoint.summary(resumed_from);
        info!(
            job_id = %job.id,
            rows_processed = summary.rows_processed,
            rows_imported = summary.rows_imported,
            rows_unchanged = summary.rows_unchanged,
            rows_skipped = summary.rows_skipped,
            rows_errored = summary.rows_errored,
            batches = summary.batches_committed,
            "Import completed"
        );
        Ok(summary)
    }

    /// Re-read and discard records already covered by the checkpoint
    async fn skip_committed(
        &self,
        source: &mut dyn RecordSource,
        count: u64,
        job_id: &str,
    ) -> std::result::Result<(), HandlerError> {
        let mut consumed = 0u64;
        while consumed < count {
            match source.next().await? {
                Some(_) => consumed += 1,
                None => {
                    return Err(self.consistency(
                        job_id,
                        format!(
                            "source ended after {} records but the checkpoint covers {}",
                            consumed, count
                        ),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn read_batch(
        &self,
        source: &mut dyn RecordSource,
        mapper: &RowMapper,
        batch_size: usize,
        job_id: &str,
    ) -> std::result::Result<Batch, HandlerError> {
        let mut batch = Batch {
            terms: Vec::with_capacity(batch_size),
            tally: BatchTally::default(),
            exhausted: false,
        };

        while (batch.tally.records as usize) < batch_size {
            let Some(event) = source.next().await? else {
                batch.exhausted = true;
                break;
            };
            batch.tally.records += 1;
            batch.tally.byte_offset = batch.tally.byte_offset.max(event.byte_offset());

            let mapped = match event {
                SourceEvent::Record(record) => mapper.map(&record),
                SourceEvent::Malformed { index, reason, .. } => {
                    Err(RecordError::Malformed { index, reason })
                }
            };
            match mapped {
                Ok(Some(term)) => batch.terms.push(term),
                Ok(None) => batch.tally.skipped += 1,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "Skipping record");
                    match err {
                        RecordError::Malformed { .. } => batch.tally.skipped += 1,
                        RecordError::Invalid { .. } => batch.tally.errored += 1,
                    }
                    batch.tally.last_error = Some(err.to_string());
                }
            }
        }
        Ok(batch)
    }

    async fn commit(
        &self,
        ctx: &JobContext,
        checkpoint: Checkpoint,
        terms: Vec<Term>,
        tally: BatchTally,
    ) -> std::result::Result<Checkpoint, HandlerError> {
        let job_id = &ctx.job().id;
        let next = checkpoint
            .advance(&tally, self.time_provider.now_millis())
            .map_err(|e| self.consistency(job_id, e.to_string()))?;
        let batch_id = next.last_batch_id;

        let committed = self
            .checkpoints
            .commit_batch(BatchCommit {
                checkpoint: next,
                expected_batch_id: checkpoint.last_batch_id,
                terms,
            })
            .await
            .map_err(|e| {
                match &e {
                    AppError::Consistency(_) => {}
                    other => warn!(
                        job_id = %job_id,
                        batch_id = batch_id,
                        error = %other,
                        "Batch commit failed; checkpoint stays at the last committed batch"
                    ),
                }
                match e {
                    AppError::Consistency(msg) => self.consistency(job_id, msg),
                    other => HandlerError::from(other),
                }
            })?;

        info!(
            job_id = %job_id,
            batch_id = batch_id,
            rows_processed = committed.checkpoint.rows_processed,
            written = committed.written,
            unchanged = committed.unchanged,
            "Batch committed"
        );
        ctx.report_progress(committed.checkpoint.progress());
        Ok(committed.checkpoint)
    }

    fn consistency(&self, job_id: &str, msg: String) -> HandlerError {
        error!(job_id = %job_id, error = %msg, "Import consistency check failed");
        HandlerError::Consistency(msg)
    }
}

#[async_trait]
impl JobHandler for BatchImporter {
    fn job_type(&self) -> JobType {
        JobType::import()
    }

    fn validate(&self, payload: &JobPayload) -> Result<()> {
        ImportPayload::from_payload(payload)?.validate(&self.config)
    }

    async fn handle(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, HandlerError> {
        let summary = self.run(ctx).await?;
        serde_json::to_value(summary).map_err(|e| HandlerError::Permanent(e.to_string()))
    }
}

/// SHA-256 of the header row
pub fn header_digest(headers: &[String]) -> String {
    let mut hasher = Sha256::new();
    for h in headers {
        hasher.update(h.as_bytes());
        hasher.update([0x1f]);
    }
    hex_digest(hasher)
}
