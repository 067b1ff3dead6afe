use anyhow::Result;
use chrono::NaiveDate;
use std::fmt::Write;

use crate::model::{Article, Category, Recipient};

/// One reporting date's content, shared by every recipient.
#[derive(Debug, Clone)]
pub struct Digest {
    pub report_date: NaiveDate,
    /// Importance descending.
    pub articles: Vec<Article>,
    /// Condensed variant: the first `top_n` of `articles`.
    pub top: Vec<Article>,
    /// Non-empty groups, in taxonomy order.
    pub by_category: Vec<(Category, Vec<Article>)>,
}

impl Digest {
    pub fn build(report_date: NaiveDate, mut articles: Vec<Article>, top_n: usize) -> Self {
        // stable: equal scores keep the store's order
        articles.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        let top = articles.iter().take(top_n).cloned().collect();
        let by_category = Category::ALL
            .iter()
            .filter_map(|category| {
                let group: Vec<Article> = articles
                    .iter()
                    .filter(|a| a.category == *category)
                    .cloned()
                    .collect();
                (!group.is_empty()).then(|| (*category, group))
            })
            .collect();

        Self {
            report_date,
            articles,
            top,
            by_category,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn article_ids(&self) -> Vec<i64> {
        self.articles.iter().map(|a| a.id).collect()
    }

    pub fn subject(&self, prefix: &str) -> String {
        format!("[{}] {} Daily News Brief", prefix, self.report_date.format("%Y-%m-%d"))
    }
}

/// Formats a digest for one recipient.
pub trait DigestRenderer: Send + Sync {
    fn render(&self, digest: &Digest, recipient: &Recipient) -> Result<String>;
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain HTML layout: top stories, then one section per category.
#[derive(Debug, Default, Clone)]
pub struct HtmlDigestRenderer;

impl HtmlDigestRenderer {
    fn article_item(out: &mut String, article: &Article) -> std::fmt::Result {
        let summary = article.summary.as_deref().unwrap_or(&article.description);
        write!(
            out,
            "<li><a href=\"{}\">{}</a>",
            escape_html(&article.link),
            escape_html(&article.title)
        )?;
        if !article.source.is_empty() {
            write!(out, " <small>({})</small>", escape_html(&article.source))?;
        }
        if !summary.is_empty() {
            write!(out, "<p>{}</p>", escape_html(summary))?;
        }
        out.push_str("</li>\n");
        Ok(())
    }
}

impl DigestRenderer for HtmlDigestRenderer {
    fn render(&self, digest: &Digest, recipient: &Recipient) -> Result<String> {
        let mut out = String::new();
        let date = digest.report_date.format("%Y-%m-%d");

        write!(
            out,
            "<html><body>\n<h1>News Brief {}</h1>\n<p>Hello {}, {} articles today.</p>\n",
            date,
            escape_html(recipient.display_name()),
            digest.len()
        )?;

        if !digest.top.is_empty() {
            out.push_str("<h2>Top stories</h2>\n<ol>\n");
            for article in &digest.top {
                Self::article_item(&mut out, article)?;
            }
            out.push_str("</ol>\n");
        }

        for (category, articles) in &digest.by_category {
            write!(
                out,
                "<h2>{} ({})</h2>\n<ul>\n",
                escape_html(category.label()),
                articles.len()
            )?;
            for article in articles {
                Self::article_item(&mut out, article)?;
            }
            out.push_str("</ul>\n");
        }

        write!(
            out,
            "<hr><p><small>Unsubscribe token: {}</small></p>\n</body></html>\n",
            escape_html(&recipient.token)
        )?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(id: i64, title: &str, category: Category, importance: f64) -> Article {
        Article {
            id,
            title: title.to_string(),
            description: String::new(),
            link: format!("https://news.example/{}", id),
            original_link: String::new(),
            source: "Example".to_string(),
            keyword: "kit".to_string(),
            published_at: None,
            collected_at: Utc::now(),
            fingerprint: format!("fp{}", id),
            category,
            summary: Some(format!("summary {}", id)),
            importance,
            is_processed: true,
            is_duplicate: false,
            is_sent: false,
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            id: 1,
            email: "a@example.com".into(),
            name: Some("Ann <Ops>".into()),
            is_active: true,
            keywords: vec![],
            token: "tok".into(),
        }
    }

    #[test]
    fn build_orders_and_groups() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let digest = Digest::build(
            date,
            vec![
                article(1, "low", Category::Product, 0.2),
                article(2, "high", Category::Regulatory, 0.9),
                article(3, "mid", Category::Product, 0.5),
            ],
            2,
        );
        assert_eq!(digest.article_ids(), vec![2, 3, 1]);
        assert_eq!(digest.top.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 3]);
        let groups: Vec<Category> = digest.by_category.iter().map(|(c, _)| *c).collect();
        assert_eq!(groups, vec![Category::Regulatory, Category::Product]);
        assert_eq!(digest.subject("NewsBrief"), "[NewsBrief] 2026-10-16 Daily News Brief");
    }

    #[test]
    fn rendering_escapes_text() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let digest = Digest::build(date, vec![article(1, "A <script> & B", Category::Market, 0.7)], 5);
        let html = HtmlDigestRenderer.render(&digest, &recipient()).unwrap();
        assert!(html.contains("A &lt;script&gt; &amp; B"));
        assert!(html.contains("Ann &lt;Ops&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Market &amp; Industry (1)"));
    }
}
