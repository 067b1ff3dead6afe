use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use newsbrief::alert::{Alert, Alerter, Severity};
use newsbrief::classifier::Classifier;
use newsbrief::collector::Collector;
use newsbrief::delivery::DeliveryCoordinator;
use newsbrief::error::{PipelineError, Stage};
use newsbrief::llm::Embedder;
use newsbrief::model::{Category, RawArticle};
use newsbrief::pipeline::{Pipeline, PipelineSettings, RunState};
use newsbrief::scoring::ImportanceScorer;
use newsbrief::storage;
use newsbrief::transport::{SendOutcome, Transport};

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    storage::ensure_schema(&pool).await.unwrap();
    pool
}

fn raw(link: &str, title: &str, description: &str, keyword: &str) -> RawArticle {
    RawArticle {
        title: title.to_string(),
        description: description.to_string(),
        link: link.to_string(),
        original_link: link.to_string(),
        published_at: None,
        source: "Example".to_string(),
        keyword: keyword.to_string(),
    }
}

/// Returns canned results per keyword; unknown keywords fail.
struct ScriptedCollector {
    results: HashMap<String, Vec<RawArticle>>,
}

#[async_trait::async_trait]
impl Collector for ScriptedCollector {
    async fn search(&self, keyword: &str, _display: u32) -> anyhow::Result<Vec<RawArticle>> {
        match self.results.get(keyword) {
            Some(items) => Ok(items.clone()),
            None => anyhow::bail!("news search returned 503 Service Unavailable"),
        }
    }
}

struct OkTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Transport for OkTransport {
    async fn send(&self, to: &str, _subject: &str, _html_body: &str) -> SendOutcome {
        self.sent.lock().unwrap().push(to.to_string());
        SendOutcome::ok()
    }
}

#[derive(Default)]
struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait::async_trait]
impl Alerter for RecordingAlerter {
    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Bag-of-characters embedding: reworded text with the same letters scores close to 1.
struct CharEmbedder;

#[async_trait::async_trait]
impl Embedder for CharEmbedder {
    async fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0_f32; 64];
        for c in text.to_lowercase().chars().filter(|c| !c.is_whitespace()) {
            v[(c as usize) % 64] += 1.0;
        }
        Ok(v)
    }
}

fn settings(keywords: &[&str]) -> PipelineSettings {
    PipelineSettings {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        display_per_keyword: 30,
        window_days: 7,
        similarity_threshold: 0.85,
        batch_limit: 100,
    }
}

struct Harness {
    pool: SqlitePool,
    transport: Arc<OkTransport>,
    alerter: Arc<RecordingAlerter>,
}

impl Harness {
    async fn new() -> Self {
        let pool = memory_pool().await;
        storage::add_recipient(&pool, "reader@example.com", Some("Reader"), &[]).await.unwrap();
        Self {
            pool,
            transport: Arc::new(OkTransport {
                sent: Mutex::new(Vec::new()),
            }),
            alerter: Arc::new(RecordingAlerter::default()),
        }
    }

    fn pipeline(&self, keywords: &[&str]) -> Pipeline {
        let delivery = DeliveryCoordinator::new(self.pool.clone(), self.transport.clone(), self.alerter.clone());
        Pipeline::new(
            self.pool.clone(),
            settings(keywords),
            Classifier::keyword_only(),
            ImportanceScorer::heuristic_only(200),
            delivery,
            self.alerter.clone(),
        )
    }

    fn severities(&self) -> Vec<Severity> {
        self.alerts().iter().map(|a| a.severity).collect()
    }

    fn alerts(&self) -> Vec<Alert> {
        self.alerter.alerts.lock().unwrap().clone()
    }
}

fn two_keyword_collector() -> Arc<dyn Collector> {
    let mut results = HashMap::new();
    results.insert(
        "진단".to_string(),
        vec![
            raw("https://news.example/1", "식약처, 진단키트 승인", "품목허가 완료", "진단"),
            raw("https://news.example/2", "Startup funding round", "Investors back a wearable maker", "진단"),
        ],
    );
    results.insert(
        "체외진단".to_string(),
        vec![
            // same story under another outlet's link
            raw("https://other.example/9", "식약처,  진단키트 승인", "품목허가 완료", "체외진단"),
            raw("https://news.example/2", "Startup funding round", "Investors back a wearable maker", "체외진단"),
        ],
    );
    Arc::new(ScriptedCollector { results })
}

#[tokio::test]
async fn full_run_collects_analyzes_and_delivers_once() {
    let harness = Harness::new().await;
    let mut pipeline = harness
        .pipeline(&["진단", "체외진단"])
        .with_collector(two_keyword_collector());
    let today = Utc::now().date_naive();

    let report = pipeline.run_all(today).await.unwrap();
    assert_eq!(pipeline.state(), RunState::Done);
    assert_eq!(report.collect.fetched, 4);
    assert_eq!(report.collect.stored, 2);
    assert_eq!(report.collect.duplicates, 1);
    assert_eq!(report.collect.known_links, 1);
    assert_eq!(report.analyze.processed, 2);
    assert_eq!(report.delivery.article_count, 2);
    assert_eq!(report.delivery.succeeded, 1);

    let articles = storage::articles_for_day(&harness.pool, today).await.unwrap();
    assert_eq!(articles.len(), 2);
    let regulatory = articles.iter().find(|a| a.link == "https://news.example/1").unwrap();
    assert_eq!(regulatory.category, Category::Regulatory);
    assert!(regulatory.importance > 0.5);
    assert_eq!(regulatory.summary.as_deref(), Some("품목허가 완료"));
    assert!(articles.iter().all(|a| a.is_sent));

    assert_eq!(harness.severities(), vec![Severity::Info]);

    // a second run finds nothing new and sends nothing
    let again = pipeline.run_all(today).await.unwrap();
    assert_eq!(again.collect.stored, 0);
    assert_eq!(again.collect.known_links, 4);
    assert_eq!(again.analyze.processed, 0);
    assert_eq!(again.delivery.attempted, 0);
    assert_eq!(again.delivery.skipped, 1);
    assert_eq!(harness.transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_collector_fails_collecting_stage() {
    let harness = Harness::new().await;
    let mut pipeline = harness.pipeline(&["진단"]);

    let err = pipeline.run_all(Utc::now().date_naive()).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingCredentials(_)));
    assert_eq!(pipeline.state(), RunState::Failed(Stage::Collecting));
    assert_eq!(harness.severities(), vec![Severity::Critical]);
    assert!(harness.transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_keyword_does_not_abort_collection() {
    let harness = Harness::new().await;
    let mut results = HashMap::new();
    results.insert(
        "진단".to_string(),
        vec![raw("https://news.example/1", "Rapid test launch", "New kit", "진단")],
    );
    let mut pipeline = harness
        .pipeline(&["진단", "unreachable"])
        .with_collector(Arc::new(ScriptedCollector { results }));

    let report = pipeline.collect().await.unwrap();
    assert_eq!(report.failed_keywords, 1);
    assert_eq!(report.stored, 1);

    let alerts = harness.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Warning);
    assert!(alerts[0]
        .details
        .contains(&("keyword".to_string(), "unreachable".to_string())));
}

#[tokio::test]
async fn near_duplicate_from_earlier_run_is_flagged() {
    let harness = Harness::new().await;

    let mut first = HashMap::new();
    first.insert(
        "kit".to_string(),
        vec![raw(
            "https://news.example/1",
            "Regulator approves home test kit",
            "The home test kit was approved today.",
            "kit",
        )],
    );
    let mut pipeline = harness
        .pipeline(&["kit"])
        .with_collector(Arc::new(ScriptedCollector { results: first }))
        .with_embedder(Arc::new(CharEmbedder));
    assert_eq!(pipeline.collect().await.unwrap().stored, 1);

    let mut second = HashMap::new();
    second.insert(
        "kit".to_string(),
        vec![raw(
            "https://other.example/7",
            "Home test kit approved by regulator",
            "Today the home test kit was approved.",
            "kit",
        )],
    );
    let mut pipeline = harness
        .pipeline(&["kit"])
        .with_collector(Arc::new(ScriptedCollector { results: second }))
        .with_embedder(Arc::new(CharEmbedder));
    let report = pipeline.collect().await.unwrap();
    assert_eq!(report.stored, 0);
    assert_eq!(report.duplicates, 1);

    // duplicates are kept for audit but never analyzed
    let analyzed = pipeline.analyze().await.unwrap();
    assert_eq!(analyzed.processed, 1);
}

#[tokio::test]
async fn stages_can_run_separately() {
    let harness = Harness::new().await;
    let mut pipeline = harness
        .pipeline(&["진단", "체외진단"])
        .with_collector(two_keyword_collector());
    let today = Utc::now().date_naive();

    // nothing analyzed yet, so nothing to deliver
    assert_eq!(pipeline.deliver(today).await.unwrap().attempted, 0);

    pipeline.collect().await.unwrap();
    assert_eq!(pipeline.state(), RunState::Deduplicating);
    assert_eq!(pipeline.analyze().await.unwrap().processed, 2);
    assert_eq!(pipeline.analyze().await.unwrap().processed, 0);

    let delivered = pipeline.deliver(today).await.unwrap();
    assert_eq!(delivered.succeeded, 1);
    assert_eq!(pipeline.state(), RunState::Delivering);
}
