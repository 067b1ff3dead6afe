use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::model::{Analysis, Article, Category, NewArticle, Recipient, SendRecord};

/// Create tables and indexes if they do not exist yet.
/// Safe to call on every start.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("storage: ensuring DB schema");
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            link TEXT NOT NULL UNIQUE,
            original_link TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            keyword TEXT NOT NULL DEFAULT '',
            published_at TIMESTAMP,
            collected_at TIMESTAMP NOT NULL,
            fingerprint TEXT NOT NULL,
            embedding TEXT,
            category TEXT NOT NULL DEFAULT 'general',
            summary TEXT,
            importance REAL NOT NULL DEFAULT 0.0,
            is_processed BOOLEAN NOT NULL DEFAULT FALSE,
            is_duplicate BOOLEAN NOT NULL DEFAULT FALSE,
            is_sent BOOLEAN NOT NULL DEFAULT FALSE,
            processed_at TIMESTAMP
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_articles_collected ON articles(collected_at);",
        "CREATE INDEX IF NOT EXISTS idx_articles_fingerprint ON articles(fingerprint);",
        r#"
        CREATE TABLE IF NOT EXISTS recipients (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            keywords TEXT NOT NULL DEFAULT '[]',
            token TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS send_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id INTEGER NOT NULL,
            report_date DATE NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            article_count INTEGER NOT NULL DEFAULT 0,
            is_success BOOLEAN NOT NULL,
            error_message TEXT,
            sent_at TIMESTAMP NOT NULL,
            FOREIGN KEY(recipient_id) REFERENCES recipients(id)
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_send_records_recipient_date ON send_records(recipient_id, report_date);",
    ];

    for stmt in stmts {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .context("failed to apply schema statement")?;
    }
    Ok(())
}

/// UTC instants bounding a calendar day: `[start, end)`.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
    (start, start + chrono::Duration::days(1))
}

/// Serialize an embedding for the `articles.embedding` column.
pub fn embedding_to_json(embedding: &[f32]) -> Result<String> {
    serde_json::to_string(embedding).context("failed to serialize embedding")
}

/// Inverse of [`embedding_to_json`]. Empty or malformed input yields `None`.
pub fn embedding_from_json(json: &str) -> Option<Vec<f32>> {
    if json.trim().is_empty() {
        return None;
    }
    serde_json::from_str(json).ok()
}

const ARTICLE_COLUMNS: &str = "id, title, description, link, original_link, source, keyword, \
     published_at, collected_at, fingerprint, category, summary, importance, \
     is_processed, is_duplicate, is_sent";

#[derive(Debug, sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    title: String,
    description: String,
    link: String,
    original_link: String,
    source: String,
    keyword: String,
    published_at: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
    fingerprint: String,
    category: String,
    summary: Option<String>,
    importance: f64,
    is_processed: bool,
    is_duplicate: bool,
    is_sent: bool,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        let category = row.category.parse().unwrap_or_else(|_| {
            warn!(article_id = row.id, category = %row.category, "unknown stored category, using general");
            Category::General
        });
        Article {
            id: row.id,
            title: row.title,
            description: row.description,
            link: row.link,
            original_link: row.original_link,
            source: row.source,
            keyword: row.keyword,
            published_at: row.published_at,
            collected_at: row.collected_at,
            fingerprint: row.fingerprint,
            category,
            summary: row.summary,
            importance: row.importance,
            is_processed: row.is_processed,
            is_duplicate: row.is_duplicate,
            is_sent: row.is_sent,
        }
    }
}

pub async fn article_exists_by_link(pool: &SqlitePool, link: &str) -> Result<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM articles WHERE link = ?")
        .bind(link)
        .fetch_optional(pool)
        .await
        .context("failed to check existing article")?;
    Ok(existing.is_some())
}

pub async fn find_article_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<Article>> {
    let row = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {} FROM articles WHERE fingerprint = ? ORDER BY id LIMIT 1",
        ARTICLE_COLUMNS
    ))
    .bind(fingerprint)
    .fetch_optional(pool)
    .await
    .context("failed to look up article by fingerprint")?;
    Ok(row.map(Article::from))
}

pub async fn get_article(pool: &SqlitePool, id: i64) -> Result<Option<Article>> {
    let row = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {} FROM articles WHERE id = ?",
        ARTICLE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch article")?;
    Ok(row.map(Article::from))
}

/// Insert a collected article. Returns `None` when the link is already stored.
pub async fn insert_article(pool: &SqlitePool, article: &NewArticle) -> Result<Option<i64>> {
    let embedding_json = match &article.embedding {
        Some(e) => Some(embedding_to_json(e)?),
        None => None,
    };

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO articles
            (title, description, link, original_link, source, keyword,
             published_at, collected_at, fingerprint, embedding, is_duplicate)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&article.raw.title)
    .bind(&article.raw.description)
    .bind(&article.raw.link)
    .bind(&article.raw.original_link)
    .bind(&article.raw.source)
    .bind(&article.raw.keyword)
    .bind(article.raw.published_at)
    .bind(article.collected_at)
    .bind(&article.fingerprint)
    .bind(embedding_json)
    .bind(article.is_duplicate)
    .execute(pool)
    .await
    .context("failed to insert article")?;

    if result.rows_affected() == 0 {
        debug!(link = %article.raw.link, "article link already stored");
        return Ok(None);
    }
    Ok(Some(result.last_insert_rowid()))
}

/// Fingerprints of everything collected since `since`, duplicates included.
pub async fn recent_fingerprints(pool: &SqlitePool, since: DateTime<Utc>) -> Result<HashSet<String>> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT fingerprint FROM articles WHERE collected_at >= ? AND fingerprint != ''",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent fingerprints")?;
    Ok(rows.into_iter().collect())
}

/// Persisted embeddings of non-duplicate articles collected since `since`, keyed by fingerprint.
pub async fn recent_embeddings(pool: &SqlitePool, since: DateTime<Utc>) -> Result<HashMap<String, Vec<f32>>> {
    let rows = sqlx::query(
        "SELECT fingerprint, embedding FROM articles \
         WHERE collected_at >= ? AND embedding IS NOT NULL AND is_duplicate = FALSE",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent embeddings")?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let fingerprint: String = row.get("fingerprint");
        let json: String = row.get("embedding");
        match embedding_from_json(&json) {
            Some(vector) => {
                out.insert(fingerprint, vector);
            }
            None => warn!(%fingerprint, "skipping undecodable stored embedding"),
        }
    }
    Ok(out)
}

/// Articles awaiting analysis, newest first.
pub async fn unprocessed_articles(pool: &SqlitePool, limit: i64) -> Result<Vec<Article>> {
    let rows = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {} FROM articles WHERE is_processed = FALSE AND is_duplicate = FALSE \
         ORDER BY collected_at DESC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch unprocessed articles")?;
    Ok(rows.into_iter().map(Article::from).collect())
}

pub async fn update_analysis(pool: &SqlitePool, article_id: i64, analysis: &Analysis) -> Result<()> {
    sqlx::query(
        "UPDATE articles SET category = ?, summary = ?, importance = ?, \
         is_processed = TRUE, processed_at = ? WHERE id = ?",
    )
    .bind(analysis.category.as_str())
    .bind(&analysis.summary)
    .bind(analysis.importance)
    .bind(Utc::now())
    .bind(article_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store analysis for article {}", article_id))?;
    Ok(())
}

/// Digest content for a reporting date: processed, non-duplicate articles
/// collected that day, most important first.
pub async fn articles_for_day(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<Article>> {
    let (start, end) = day_bounds(date);
    let rows = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {} FROM articles \
         WHERE is_processed = TRUE AND is_duplicate = FALSE \
         AND collected_at >= ? AND collected_at < ? \
         ORDER BY importance DESC, id ASC",
        ARTICLE_COLUMNS
    ))
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("failed to fetch articles for report date")?;
    Ok(rows.into_iter().map(Article::from).collect())
}

pub async fn mark_articles_sent(pool: &SqlitePool, article_ids: &[i64]) -> Result<()> {
    for id in article_ids {
        sqlx::query("UPDATE articles SET is_sent = TRUE WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .with_context(|| format!("failed to mark article {} as sent", id))?;
    }
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    id: i64,
    email: String,
    name: Option<String>,
    is_active: bool,
    keywords: String,
    token: String,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        Recipient {
            id: row.id,
            email: row.email,
            name: row.name,
            is_active: row.is_active,
            keywords: serde_json::from_str(&row.keywords).unwrap_or_default(),
            token: row.token,
        }
    }
}

pub async fn active_recipients(pool: &SqlitePool) -> Result<Vec<Recipient>> {
    let rows = sqlx::query_as::<_, RecipientRow>(
        "SELECT id, email, name, is_active, keywords, token FROM recipients \
         WHERE is_active = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch active recipients")?;
    Ok(rows.into_iter().map(Recipient::from).collect())
}

pub async fn get_recipient_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Recipient>> {
    let row = sqlx::query_as::<_, RecipientRow>(
        "SELECT id, email, name, is_active, keywords, token FROM recipients WHERE email = ?",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await
    .context("failed to fetch recipient")?;
    Ok(row.map(Recipient::from))
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Subscribe a recipient. An existing (possibly deactivated) recipient with
/// the same email is re-activated and its name/keywords refreshed; its token
/// is kept.
pub async fn add_recipient(
    pool: &SqlitePool,
    email: &str,
    name: Option<&str>,
    keywords: &[String],
) -> Result<Recipient> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        anyhow::bail!("invalid recipient email: {:?}", email);
    }
    let keywords_json = serde_json::to_string(keywords).context("failed to serialize keywords")?;

    sqlx::query(
        r#"
        INSERT INTO recipients (email, name, keywords, token, is_active)
        VALUES (?, ?, ?, ?, TRUE)
        ON CONFLICT(email) DO UPDATE SET
            name = COALESCE(excluded.name, recipients.name),
            keywords = excluded.keywords,
            is_active = TRUE,
            updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
        "#,
    )
    .bind(&email)
    .bind(name)
    .bind(&keywords_json)
    .bind(new_token())
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert recipient {}", email))?;

    get_recipient_by_email(pool, &email)
        .await?
        .with_context(|| format!("recipient {} missing after upsert", email))
}

/// Soft-delete: the row stays so send history keeps its referent.
pub async fn deactivate_recipient_by_token(pool: &SqlitePool, token: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE recipients SET is_active = FALSE, \
         updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') \
         WHERE token = ? AND is_active = TRUE",
    )
    .bind(token)
    .execute(pool)
    .await
    .context("failed to deactivate recipient")?;
    Ok(result.rows_affected() > 0)
}

/// Ensure recipients listed in the config exist. Existing rows are left untouched,
/// so a recipient who unsubscribed is not silently re-activated on restart.
pub async fn sync_recipients(config: &common::Config, pool: &SqlitePool) -> Result<()> {
    for r in &config.recipients {
        let keywords_json = serde_json::to_string(&r.keywords).context("failed to serialize keywords")?;
        sqlx::query(
            "INSERT OR IGNORE INTO recipients (email, name, keywords, token) VALUES (?, ?, ?, ?)",
        )
        .bind(r.email.trim().to_lowercase())
        .bind(r.name.clone())
        .bind(keywords_json)
        .bind(new_token())
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert or ignore recipient {}", r.email))?;
    }
    Ok(())
}

/// Whether the recipient already has a successful send for `date`.
pub async fn already_sent(pool: &SqlitePool, recipient_id: i64, date: NaiveDate) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM send_records WHERE recipient_id = ? AND report_date = ? AND is_success = TRUE",
    )
    .bind(recipient_id)
    .bind(date)
    .fetch_one(pool)
    .await
    .context("failed to check send history")?;
    Ok(count > 0)
}

/// Append one delivery attempt to the audit log.
pub async fn record_send(
    pool: &SqlitePool,
    recipient_id: i64,
    report_date: NaiveDate,
    subject: &str,
    article_count: usize,
    is_success: bool,
    error_message: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO send_records
            (recipient_id, report_date, subject, article_count, is_success, error_message, sent_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(recipient_id)
    .bind(report_date)
    .bind(subject)
    .bind(article_count as i64)
    .bind(is_success)
    .bind(error_message)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to record send for recipient {}", recipient_id))?;
    Ok(result.last_insert_rowid())
}

#[derive(Debug, sqlx::FromRow)]
struct SendRecordRow {
    id: i64,
    recipient_id: i64,
    report_date: NaiveDate,
    subject: String,
    article_count: i64,
    is_success: bool,
    error_message: Option<String>,
    sent_at: DateTime<Utc>,
}

pub async fn send_records_for_day(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<SendRecord>> {
    let rows = sqlx::query_as::<_, SendRecordRow>(
        "SELECT id, recipient_id, report_date, subject, article_count, is_success, error_message, sent_at \
         FROM send_records WHERE report_date = ? ORDER BY id",
    )
    .bind(date)
    .fetch_all(pool)
    .await
    .context("failed to fetch send records")?;

    Ok(rows
        .into_iter()
        .map(|r| SendRecord {
            id: r.id,
            recipient_id: r.recipient_id,
            report_date: r.report_date,
            subject: r.subject,
            article_count: r.article_count,
            is_success: r.is_success,
            error_message: r.error_message,
            sent_at: r.sent_at,
        })
        .collect())
}
