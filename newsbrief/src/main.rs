/*
newsbrief - single-binary main.rs
Runs the collection / analysis / delivery pipeline once or on a daily schedule.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgGroup, Parser};
use common::Config;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::select;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;
use newsbrief::alert::{Alerter, EmailAlerter, LogAlerter};
use newsbrief::classifier::Classifier;
use newsbrief::collector::NaverNewsCollector;
use newsbrief::delivery::DeliveryCoordinator;
use newsbrief::llm::remote::RemoteLlmProvider;
use newsbrief::llm::{Embedder, LlmProvider};
use newsbrief::pipeline::{Pipeline, PipelineSettings};
use newsbrief::scoring::ImportanceScorer;
use newsbrief::transport::{SmtpTransport, Transport};
use newsbrief::{schedule, storage};

#[derive(Parser, Debug)]
#[command(name = "newsbrief", about = "News monitoring pipeline with daily digest delivery")]
#[command(group(ArgGroup::new("mode").args(["run_once", "collect_only", "process_only", "send_only"])))]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run collect, analyze and deliver once, then exit
    #[arg(long)]
    run_once: bool,

    /// Only collect and deduplicate new articles
    #[arg(long)]
    collect_only: bool,

    /// Only analyze unprocessed articles
    #[arg(long)]
    process_only: bool,

    /// Only deliver today's digest
    #[arg(long)]
    send_only: bool,

    /// Subscribe (or re-activate) a recipient and exit
    #[arg(long, value_name = "EMAIL")]
    add_recipient: Option<String>,

    /// Display name for --add-recipient
    #[arg(long, requires = "add_recipient")]
    name: Option<String>,

    /// Comma-separated interest keywords for --add-recipient
    #[arg(long, requires = "add_recipient")]
    keywords: Option<String>,

    /// Deactivate the recipient owning this management token and exit
    #[arg(long, value_name = "TOKEN", conflicts_with = "add_recipient")]
    unsubscribe: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config.clone() {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    storage::ensure_schema(&db_pool).await?;
    storage::sync_recipients(&config, &db_pool).await?;
    info!("configuration recipients synchronized into database");

    if let Some(email) = args.add_recipient.as_deref() {
        let keywords: Vec<String> = args
            .keywords
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let recipient = storage::add_recipient(&db_pool, email, args.name.as_deref(), &keywords).await?;
        info!(email = %recipient.email, token = %recipient.token, "recipient subscribed");
        return Ok(());
    }

    if let Some(token) = args.unsubscribe.as_deref() {
        if storage::deactivate_recipient_by_token(&db_pool, token).await? {
            info!("recipient unsubscribed");
        } else {
            warn!("no active recipient for that token");
        }
        return Ok(());
    }

    let today = Utc::now().date_naive();
    if args.run_once {
        let mut pipeline = build_pipeline(&config, &db_pool).await?;
        let report = pipeline.run_all(today).await?;
        info!(?report, "run complete");
    } else if args.collect_only {
        let report = build_pipeline(&config, &db_pool).await?.collect().await?;
        info!(?report, "collection complete");
    } else if args.process_only {
        let report = build_pipeline(&config, &db_pool).await?.analyze().await?;
        info!(?report, "analysis complete");
    } else if args.send_only {
        let report = build_pipeline(&config, &db_pool).await?.deliver(today).await?;
        info!(?report, "delivery complete");
    } else {
        run_scheduler(db_pool, config).await?;
    }

    Ok(())
}

/// Create the generation backend from `[llm]`. `None` means keyword and
/// heuristic fallbacks only.
fn create_llm_provider(llm_config: Option<&common::LlmConfig>) -> Result<Option<RemoteLlmProvider>> {
    let llm_config = match llm_config {
        Some(c) => c,
        None => return Ok(None),
    };
    let adapter = llm_config.adapter.as_deref().unwrap_or("none");
    match adapter {
        "remote" => {
            let remote_config = llm_config
                .remote
                .as_ref()
                .context("Remote adapter selected but no [llm.remote] section found")?;
            Ok(Some(remote_provider(remote_config, "qwen2.5:7b")))
        }
        "none" => Ok(None),
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

fn remote_provider(remote_config: &common::RemoteLlmConfig, default_model: &str) -> RemoteLlmProvider {
    // local servers such as Ollama need no key
    let api_key = common::secret_from_env(remote_config.api_key_env.as_deref()).unwrap_or_default();
    let model = remote_config.model.clone().unwrap_or_else(|| default_model.to_string());
    let api_url = remote_config
        .api_url
        .clone()
        .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
    let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
    let max_tokens = remote_config.max_tokens.unwrap_or(500);

    RemoteLlmProvider::new(api_url, api_key, model).with_defaults(timeout_secs, max_tokens, 0.3)
}

/// Embedding backend from `[llm.embedding]`, kept only if it serves its model.
async fn create_embedder(llm_config: Option<&common::LlmConfig>) -> Option<Arc<dyn Embedder>> {
    let embedding_config = llm_config.and_then(|c| c.embedding.as_ref())?;
    let provider = remote_provider(embedding_config, "nomic-embed-text");
    if provider.is_available().await {
        info!(model = %provider.model(), "embedding backend available, near-duplicate matching enabled");
        Some(Arc::new(provider))
    } else {
        warn!("embedding backend unavailable, using exact fingerprint matching only");
        None
    }
}

/// Wire a pipeline from configuration. Backends are probed here, so each
/// scheduled run picks up a backend that came back since the last one.
async fn build_pipeline(config: &Config, pool: &SqlitePool) -> Result<Pipeline> {
    let llm_config = config.llm.as_ref();
    let call_timeout = Duration::from_secs(
        llm_config
            .and_then(|c| c.remote.as_ref())
            .and_then(|r| r.timeout_seconds)
            .unwrap_or(30),
    );

    let generation: Option<Arc<dyn LlmProvider>> = match create_llm_provider(llm_config) {
        Ok(Some(provider)) => {
            info!(model = %provider.model(), "LLM provider initialized");
            Some(Arc::new(provider))
        }
        Ok(None) => {
            info!("no LLM configured, using keyword classification and heuristic scoring");
            None
        }
        Err(e) => {
            error!(%e, "failed to initialize LLM provider");
            None
        }
    };

    let classifier = Classifier::new(generation.clone(), call_timeout).await;
    let scorer = ImportanceScorer::new(generation, call_timeout, config.analysis.summary_chars()).await;

    let transport: Arc<dyn Transport> = Arc::new(SmtpTransport::from_config(&config.delivery));
    let alerter: Arc<dyn Alerter> = match (config.alerts.enabled.unwrap_or(false), &config.alerts.admin_email) {
        (true, Some(admin)) => Arc::new(EmailAlerter::new(
            transport.clone(),
            admin.clone(),
            config.delivery.subject_prefix(),
        )),
        _ => Arc::new(LogAlerter),
    };

    let delivery = DeliveryCoordinator::from_config(pool.clone(), &config.delivery, transport, alerter.clone());
    let mut pipeline = Pipeline::new(
        pool.clone(),
        PipelineSettings::from_config(config),
        classifier,
        scorer,
        delivery,
        alerter,
    );

    match NaverNewsCollector::from_config(&config.collector) {
        Ok(collector) => pipeline = pipeline.with_collector(Arc::new(collector)),
        Err(e) => warn!(%e, "news collector unavailable"),
    }
    if let Some(embedder) = create_embedder(llm_config).await {
        pipeline = pipeline.with_embedder(embedder);
    }
    Ok(pipeline)
}

/// Sleep until the next configured time, run the full pipeline, repeat until Ctrl-C.
/// A failed run is logged and the loop keeps going.
async fn run_scheduler(db_pool: SqlitePool, config: Config) -> Result<()> {
    let times = schedule::parse_times(&config.scheduler.times)?;
    if times.is_empty() {
        anyhow::bail!("no [scheduler] times configured; use --run-once for a single run");
    }
    info!("scheduler: run times (UTC) {:?}", config.scheduler.times);

    loop {
        let now = Utc::now();
        let next = match schedule::next_run_after(now, &times) {
            Some(next) => next,
            None => break,
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next = %next, "scheduler: next run");

        select! {
            _ = tokio::time::sleep(wait) => {
                let report_date = Utc::now().date_naive();
                match build_pipeline(&config, &db_pool).await {
                    Ok(mut pipeline) => match pipeline.run_all(report_date).await {
                        Ok(report) => info!(?report, "scheduler: run complete"),
                        Err(e) => error!(%e, "scheduler: run failed"),
                    },
                    Err(e) => error!(%e, "scheduler: failed to build pipeline"),
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, stopping scheduler");
                break;
            }
        }
    }

    info!("scheduler: shutdown complete");
    Ok(())
}
