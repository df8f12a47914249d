use crate::config::GenerationOptions;
use crate::extract::{self, ExtractionError};
use crate::http::build_client;
use crate::image::{self, ImageError};
use crate::llm::{self, BackendConfig, BackendError, ListingClient};
use crate::models::{ListingResult, ProductRecord, ValidationError};
use crate::prompt;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use uuid::Uuid;

/// Only fatal misconfiguration escapes `run`; everything else becomes a
/// per-item failure entry.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch cannot start: {0}")]
    Misconfigured(String),
}

/// Per-item failure with the stage it died in. The stage name plus message is
/// what lands in the report's failure mapping.
#[derive(Debug, Error)]
#[error("{stage}: {message}")]
pub struct ItemError {
    stage: &'static str,
    message: String,
    kind: ItemErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemErrorKind {
    Validation,
    Image,
    Backend,
    Quota,
    Extraction,
    Cancelled,
}

impl ItemError {
    fn cancelled() -> Self {
        Self {
            stage: "batch",
            message: "cancelled before processing".into(),
            kind: ItemErrorKind::Cancelled,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> ItemErrorKind {
        self.kind
    }
}

impl From<ValidationError> for ItemError {
    fn from(err: ValidationError) -> Self {
        Self {
            stage: "validate",
            message: err.to_string(),
            kind: ItemErrorKind::Validation,
        }
    }
}

impl From<ImageError> for ItemError {
    fn from(err: ImageError) -> Self {
        Self {
            stage: "image",
            message: err.to_string(),
            kind: ItemErrorKind::Image,
        }
    }
}

impl From<BackendError> for ItemError {
    fn from(err: BackendError) -> Self {
        let kind = match err {
            BackendError::Quota => ItemErrorKind::Quota,
            _ => ItemErrorKind::Backend,
        };
        Self {
            stage: "request",
            message: err.to_string(),
            kind,
        }
    }
}

impl From<ExtractionError> for ItemError {
    fn from(err: ExtractionError) -> Self {
        Self {
            stage: "extract",
            message: err.to_string(),
            kind: ItemErrorKind::Extraction,
        }
    }
}

/// Cooperative cancellation flag, checked between items only so an in-flight
/// item always settles into the report before the batch stops.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenStats {
    pub total: u64,
    pub mean: f64,
    pub min: u32,
    pub max: u32,
}

impl TokenStats {
    fn over(results: &[ListingResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let counts: Vec<u32> = results.iter().map(|r| r.tokens_used).collect();
        let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        Some(Self {
            total,
            mean: total as f64 / counts.len() as f64,
            min: counts.iter().copied().min().unwrap_or(0),
            max: counts.iter().copied().max().unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of inputs that produced a listing.
    pub success_rate: f64,
    /// Token accounting over successful items only.
    pub tokens: Option<TokenStats>,
    pub estimated_cost_usd: Option<f64>,
    pub quota_failures: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub model_used: String,
}

/// The complete outcome of one batch. Every input record appears exactly once,
/// either in `results` or in `failures`.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub results: Vec<ListingResult>,
    pub failures: BTreeMap<String, String>,
    pub stats: BatchStats,
    /// Raw backend replies by product id, kept only when raw capture is on.
    /// Persisted separately from the summary, never serialized with it.
    #[serde(skip)]
    pub raw_responses: BTreeMap<String, String>,
}

impl BatchReport {
    /// Quota rejections signal systemic rate pressure rather than per-item
    /// defects, so they earn a pacing suggestion for the next run.
    pub fn quota_advice(&self) -> Option<String> {
        (self.stats.quota_failures > 0).then(|| {
            format!(
                "{} item(s) were rate limited by the backend; consider raising \
                 BATCH_DELAY_SECS for the next run",
                self.stats.quota_failures
            )
        })
    }
}

pub struct BatchOrchestrator {
    client: ListingClient,
    http: Client,
    options: GenerationOptions,
    cancel: CancelToken,
    keep_raw_responses: bool,
}

impl BatchOrchestrator {
    pub fn new(backend: BackendConfig, options: GenerationOptions) -> Self {
        Self {
            client: ListingClient::new(backend),
            http: build_client(),
            options,
            cancel: CancelToken::default(),
            keep_raw_responses: false,
        }
    }

    pub fn with_raw_capture(mut self, keep: bool) -> Self {
        self.keep_raw_responses = keep;
        self
    }

    /// Handle for cooperative cancellation from outside the run loop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Processes every record in input order, isolating per-item failures.
    /// One bad product never aborts the run; only a fatal misconfiguration
    /// detected before the first item does.
    pub async fn run(&self, products: &[ProductRecord]) -> Result<BatchReport, BatchError> {
        self.client
            .preflight()
            .map_err(|err| BatchError::Misconfigured(err.to_string()))?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Utc::now();
        let total = products.len();
        info!(
            target = "listforge.batch",
            run_id = %run_id,
            total = total,
            model = %self.options.model,
            "batch started"
        );

        let mut results: Vec<ListingResult> = Vec::new();
        let mut failures: BTreeMap<String, String> = BTreeMap::new();
        let mut raw_responses: BTreeMap<String, String> = BTreeMap::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut quota_failures = 0usize;

        for (index, product) in products.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    target = "listforge.batch",
                    run_id = %run_id,
                    remaining = total - index,
                    "cancellation requested, recording remaining items as failures"
                );
                for (offset, remaining) in products[index..].iter().enumerate() {
                    let key = failure_key(&remaining.id, index + offset, &results, &failures);
                    failures.insert(key, ItemError::cancelled().to_string());
                }
                break;
            }

            info!(
                target = "listforge.batch",
                run_id = %run_id,
                product = %product.id,
                position = index + 1,
                total = total,
                "processing product"
            );

            let (outcome, raw_text) = if !seen_ids.insert(product.id.clone()) {
                (
                    Err(ValidationError::DuplicateId(product.id.clone()).into()),
                    None,
                )
            } else {
                self.process_one(product).await
            };

            if self.keep_raw_responses {
                if let Some(raw) = raw_text {
                    raw_responses.insert(product.id.clone(), raw);
                }
            }

            match outcome {
                Ok(listing) => {
                    info!(
                        target = "listforge.batch",
                        run_id = %run_id,
                        product = %product.id,
                        tokens = listing.tokens_used,
                        "product succeeded"
                    );
                    results.push(listing);
                }
                Err(err) => {
                    if err.kind() == ItemErrorKind::Quota {
                        quota_failures += 1;
                    }
                    warn!(
                        target = "listforge.batch",
                        run_id = %run_id,
                        product = %product.id,
                        stage = err.stage(),
                        error = %err,
                        "product failed"
                    );
                    let key = failure_key(&product.id, index, &results, &failures);
                    failures.insert(key, err.to_string());
                }
            }

            // Throttle against backend rate limits; a failed request still
            // consumed backend capacity, so the pause happens either way.
            if index + 1 < total {
                sleep(Duration::from_secs_f64(self.options.batch_delay_secs)).await;
            }
        }

        let finished_at = Utc::now();
        let tokens = TokenStats::over(&results);
        let estimated_cost_usd = tokens
            .as_ref()
            .and_then(|stats| llm::estimate_cost(stats.total, &self.options.model));
        let stats = BatchStats {
            total,
            succeeded: results.len(),
            failed: failures.len(),
            success_rate: if total == 0 {
                0.0
            } else {
                results.len() as f64 / total as f64 * 100.0
            },
            tokens,
            estimated_cost_usd,
            quota_failures,
            duration_ms: started.elapsed().as_millis() as u64,
            started_at,
            finished_at,
            model_used: self.options.model.clone(),
        };

        info!(
            target = "listforge.batch",
            run_id = %run_id,
            succeeded = stats.succeeded,
            failed = stats.failed,
            duration_ms = stats.duration_ms,
            "batch finished"
        );

        Ok(BatchReport {
            run_id,
            results,
            failures,
            stats,
            raw_responses,
        })
    }

    /// One product's full pipeline: validate → image → prompt → request →
    /// extract. The raw reply text comes back alongside the outcome so failed
    /// extractions can still be persisted for inspection.
    async fn process_one(
        &self,
        product: &ProductRecord,
    ) -> (Result<ListingResult, ItemError>, Option<String>) {
        if let Err(err) = product.validate() {
            return (Err(err.into()), None);
        }

        let encoded = match image::normalize(&self.http, &product.image_source, &self.options).await
        {
            Ok(encoded) => encoded,
            Err(err) => return (Err(err.into()), None),
        };

        let prompt = prompt::detailed_prompt(product, &self.options);

        let raw = match self.client.generate(&encoded, &prompt, &self.options).await {
            Ok(raw) => raw,
            Err(err) => return (Err(err.into()), None),
        };
        let raw_text = raw.text.clone();

        match extract::extract(&raw.text, self.options.max_extraction_attempts) {
            Ok(data) => (
                Ok(ListingResult::from_extracted(product, &data, &raw)),
                Some(raw_text),
            ),
            Err(err) => (Err(err.into()), Some(raw_text)),
        }
    }
}

// Identifiers are expected to be unique within a run; when a caller breaks that,
// later occurrences get a position-suffixed key so no input is ever silently
// merged out of the report.
fn failure_key(
    id: &str,
    position: usize,
    results: &[ListingResult],
    failures: &BTreeMap<String, String>,
) -> String {
    let taken = failures.contains_key(id) || results.iter().any(|r| r.product_id == id);
    if taken {
        format!("{id}#{position}")
    } else {
        id.to_string()
    }
}
