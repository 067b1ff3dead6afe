//! One pipeline run: collect, deduplicate, analyze, deliver.
//!
//! Each stage can also be invoked on its own. Re-running a stage is safe:
//! collection skips known links, analysis only picks unprocessed articles,
//! and delivery skips recipients with a successful send for the date.

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alert::{dispatch, Alert, Alerter, Severity};
use crate::classifier::Classifier;
use crate::collector::Collector;
use crate::dedup::FingerprintStore;
use crate::delivery::{DeliveryCoordinator, DeliveryReport};
use crate::error::{PipelineError, Stage};
use crate::llm::Embedder;
use crate::model::{Analysis, NewArticle, RawArticle};
use crate::scoring::ImportanceScorer;
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Collecting,
    Deduplicating,
    Analyzing,
    Delivering,
    Done,
    Failed(Stage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub fetched: usize,
    pub stored: usize,
    pub duplicates: usize,
    /// Links already in the store.
    pub known_links: usize,
    pub failed_keywords: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeReport {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub report_date: NaiveDate,
    pub collect: CollectReport,
    pub analyze: AnalyzeReport,
    pub delivery: DeliveryReport,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub keywords: Vec<String>,
    pub display_per_keyword: u32,
    pub window_days: i64,
    pub similarity_threshold: f32,
    pub batch_limit: i64,
}

impl PipelineSettings {
    pub fn from_config(config: &common::Config) -> Self {
        Self {
            keywords: config.collector.keywords.clone(),
            display_per_keyword: config.collector.display_per_keyword(),
            window_days: config.dedup.window_days(),
            similarity_threshold: config.dedup.similarity_threshold(),
            batch_limit: config.analysis.batch_limit(),
        }
    }
}

pub struct Pipeline {
    pool: SqlitePool,
    settings: PipelineSettings,
    collector: Option<Arc<dyn Collector>>,
    embedder: Option<Arc<dyn Embedder>>,
    classifier: Classifier,
    scorer: ImportanceScorer,
    delivery: DeliveryCoordinator,
    alerter: Arc<dyn Alerter>,
    state: RunState,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        settings: PipelineSettings,
        classifier: Classifier,
        scorer: ImportanceScorer,
        delivery: DeliveryCoordinator,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            pool,
            settings,
            collector: None,
            embedder: None,
            classifier,
            scorer,
            delivery,
            alerter,
            state: RunState::Idle,
        }
    }

    /// Without a collector, collection fails with `MissingCredentials`.
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    async fn abort(&mut self, stage: Stage, source: anyhow::Error) -> PipelineError {
        error!(%stage, error = %format!("{:#}", source), "pipeline stage failed");
        self.state = RunState::Failed(stage);
        let alert = match stage {
            Stage::Collecting | Stage::Deduplicating => {
                Alert::collection_failure(&format!("{:#}", source), None, false)
            }
            _ => Alert::new(
                format!("Pipeline {} stage failed", stage),
                format!("{:#}", source),
                Severity::Error,
            ),
        };
        dispatch(self.alerter.as_ref(), alert).await;
        PipelineError::stage(stage, source)
    }

    /// Fetch every keyword, then store new articles and flag duplicates.
    pub async fn collect(&mut self) -> Result<CollectReport, PipelineError> {
        self.state = RunState::Collecting;
        let collector = match &self.collector {
            Some(c) => c.clone(),
            None => {
                let err = PipelineError::MissingCredentials("news search API credentials".to_string());
                error!(%err, "cannot collect");
                self.state = RunState::Failed(Stage::Collecting);
                dispatch(
                    self.alerter.as_ref(),
                    Alert::collection_failure(&err.to_string(), None, true),
                )
                .await;
                return Err(err);
            }
        };

        let mut report = CollectReport::default();
        let mut fetched: Vec<RawArticle> = Vec::new();
        for keyword in self.settings.keywords.clone() {
            match collector.search(&keyword, self.settings.display_per_keyword).await {
                Ok(items) => fetched.extend(items),
                Err(e) => {
                    warn!(%keyword, error = %format!("{:#}", e), "keyword collection failed");
                    report.failed_keywords += 1;
                    dispatch(
                        self.alerter.as_ref(),
                        Alert::collection_failure(&format!("{:#}", e), Some(&keyword), false),
                    )
                    .await;
                }
            }
        }
        report.fetched = fetched.len();
        info!(fetched = report.fetched, failed_keywords = report.failed_keywords, "collection done");

        self.state = RunState::Deduplicating;
        let persisted = self.persist_new(fetched, &mut report).await;
        match persisted {
            Ok(()) => {
                info!(
                    stored = report.stored,
                    duplicates = report.duplicates,
                    known_links = report.known_links,
                    "deduplication done"
                );
                Ok(report)
            }
            Err(e) => Err(self.abort(Stage::Deduplicating, e).await),
        }
    }

    async fn persist_new(&self, fetched: Vec<RawArticle>, report: &mut CollectReport) -> anyhow::Result<()> {
        let since = Utc::now() - chrono::Duration::days(self.settings.window_days);
        let recent_hashes = storage::recent_fingerprints(&self.pool, since).await?;
        let recent_embeddings = if self.embedder.is_some() {
            storage::recent_embeddings(&self.pool, since).await?
        } else {
            HashMap::new()
        };

        let mut store = FingerprintStore::new(self.settings.similarity_threshold, self.embedder.clone());
        for raw in fetched {
            if storage::article_exists_by_link(&self.pool, &raw.link).await? {
                report.known_links += 1;
                continue;
            }

            let check = store
                .check(&raw.title, &raw.description, &recent_hashes, &recent_embeddings)
                .await;
            let is_duplicate = check.is_duplicate;
            let article = NewArticle {
                raw,
                fingerprint: check.fingerprint,
                embedding: check.embedding,
                is_duplicate,
                collected_at: Utc::now(),
            };

            match storage::insert_article(&self.pool, &article).await? {
                Some(_) if is_duplicate => report.duplicates += 1,
                Some(_) => report.stored += 1,
                None => report.known_links += 1,
            }
        }
        Ok(())
    }

    /// Classify, score and summarize a batch of unprocessed articles.
    pub async fn analyze(&mut self) -> Result<AnalyzeReport, PipelineError> {
        self.state = RunState::Analyzing;
        let pending = storage::unprocessed_articles(&self.pool, self.settings.batch_limit).await;
        let articles = match pending {
            Ok(a) => a,
            Err(e) => return Err(self.abort(Stage::Analyzing, e).await),
        };
        info!(count = articles.len(), "analyzing articles");

        let mut report = AnalyzeReport::default();
        let mut last_error = None;
        for article in &articles {
            let analysis = Analysis {
                category: self.classifier.classify(&article.title, &article.description).await,
                importance: self.scorer.score(&article.title, &article.description).await,
                summary: self.scorer.summarize(&article.title, &article.description).await,
            };
            match storage::update_analysis(&self.pool, article.id, &analysis).await {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    warn!(article_id = article.id, error = %format!("{:#}", e), "failed to store analysis");
                    report.failed += 1;
                    last_error = Some(e);
                }
            }
        }

        // every write failing means the store is gone, not a bad item
        if report.processed == 0 {
            if let Some(e) = last_error {
                return Err(self.abort(Stage::Analyzing, e).await);
            }
        }
        info!(processed = report.processed, failed = report.failed, "analysis done");
        Ok(report)
    }

    pub async fn deliver(&mut self, report_date: NaiveDate) -> Result<DeliveryReport, PipelineError> {
        self.state = RunState::Delivering;
        let delivered = self.delivery.deliver(report_date).await;
        match delivered {
            Ok(report) => Ok(report),
            Err(e) => Err(self.abort(Stage::Delivering, e).await),
        }
    }

    /// Full run. Any stage failure ends the run in `Failed(stage)`.
    pub async fn run_all(&mut self, report_date: NaiveDate) -> Result<RunReport, PipelineError> {
        info!(%report_date, "pipeline run starting");
        let collect = self.collect().await?;
        let analyze = self.analyze().await?;
        let delivery = self.deliver(report_date).await?;
        self.state = RunState::Done;

        dispatch(
            self.alerter.as_ref(),
            Alert::run_summary(
                report_date,
                collect.stored,
                analyze.processed,
                delivery.succeeded,
                delivery.failed,
            ),
        )
        .await;

        info!(%report_date, "pipeline run finished");
        Ok(RunReport {
            report_date,
            collect,
            analyze,
            delivery,
        })
    }
}
