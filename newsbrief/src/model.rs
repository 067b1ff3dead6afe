use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed article taxonomy. Declaration order is the tie-break priority
/// used by the keyword classifier and the section order of a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Regulatory,
    Market,
    Technology,
    Competitor,
    Product,
    General,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Regulatory,
        Category::Market,
        Category::Technology,
        Category::Competitor,
        Category::Product,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Regulatory => "regulatory",
            Category::Market => "market",
            Category::Technology => "technology",
            Category::Competitor => "competitor",
            Category::Product => "product",
            Category::General => "general",
        }
    }

    /// Numeric code used in AI classification prompts (1-6).
    pub fn from_code(code: char) -> Option<Category> {
        match code {
            '1' => Some(Category::Regulatory),
            '2' => Some(Category::Market),
            '3' => Some(Category::Technology),
            '4' => Some(Category::Competitor),
            '5' => Some(Category::Product),
            '6' => Some(Category::General),
            _ => None,
        }
    }

    /// Human-readable section heading for digests.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Regulatory => "Regulatory & Policy",
            Category::Market => "Market & Industry",
            Category::Technology => "Technology & R&D",
            Category::Competitor => "Competitors",
            Category::Product => "Products & Services",
            Category::General => "General",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::General
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("unknown category: {}", s))
    }
}

/// An article as delivered by the collector, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    pub title: String,
    pub description: String,
    pub link: String,
    pub original_link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub keyword: String,
}

/// Insert payload for a newly collected article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub raw: RawArticle,
    pub fingerprint: String,
    pub embedding: Option<Vec<f32>>,
    pub is_duplicate: bool,
    pub collected_at: DateTime<Utc>,
}

/// A persisted article.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub original_link: String,
    pub source: String,
    pub keyword: String,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub fingerprint: String,
    pub category: Category,
    pub summary: Option<String>,
    pub importance: f64,
    pub is_processed: bool,
    pub is_duplicate: bool,
    pub is_sent: bool,
}

/// Result of classifying, scoring and summarizing one article.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub category: Category,
    pub summary: String,
    pub importance: f64,
}

/// A digest recipient. Never physically deleted; unsubscribing clears `is_active`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub keywords: Vec<String>,
    pub token: String,
}

impl Recipient {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

/// Append-only audit entry for one delivery attempt.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub id: i64,
    pub recipient_id: i64,
    pub report_date: NaiveDate,
    pub subject: String,
    pub article_count: i64,
    pub is_success: bool,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_cover_taxonomy() {
        let decoded: Vec<Category> = "123456".chars().filter_map(Category::from_code).collect();
        assert_eq!(decoded, Category::ALL.to_vec());
        assert_eq!(Category::from_code('7'), None);
    }

    #[test]
    fn category_parses_its_own_name() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert!("sports".parse::<Category>().is_err());
    }
}
