use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::{generate_with_timeout, LlmProvider, LlmRequest};

const SCORE_PROMPT: &str = "Rate the importance of the following news article for a healthcare \
diagnostics company on a scale from 0.0 to 1.0.

Rubric:
- Regulatory or policy changes, approvals: 0.8-1.0
- Market moves, competitor activity: 0.6-0.8
- Technology and research news: 0.4-0.6
- Everything else: 0.0-0.4

Title: {title}
Content: {content}

Answer with a single decimal number only:";

const SUMMARY_PROMPT: &str = "Summarize the following news article in 3-4 sentences. \
Keep only the key facts.

Title: {title}
Content: {content}

Summary:";

const HIGH_IMPACT: &[&str] = &["fda", "식약처", "승인", "인허가", "규제", "허가", "approval", "regulator"];
const MEDIUM_IMPACT: &[&str] = &[
    "투자", "m&a", "인수", "시장", "임상", "연구", "특허", "funding", "clinical trial", "patent",
];
const LOW_IMPACT: &[&str] = &["행사", "이벤트", "인터뷰", "기고", "interview", "webinar", "exhibition"];

/// Keyword-weighted importance estimate, clamped to [0, 1].
/// Each keyword counts once however often it appears.
pub fn heuristic_importance(title: &str, content: &str) -> f64 {
    let text = format!("{} {}", title, content).to_lowercase();
    let hits = |set: &[&str]| set.iter().filter(|k| text.contains(*k)).count() as f64;

    let score = 0.5 + 0.1 * hits(HIGH_IMPACT) + 0.05 * hits(MEDIUM_IMPACT) - 0.1 * hits(LOW_IMPACT);
    score.clamp(0.0, 1.0)
}

/// First decimal literal in a model answer, clamped to [0, 1].
pub fn parse_score(answer: &str) -> Option<f64> {
    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let starts_number = bytes[i].is_ascii_digit()
            || (bytes[i] == b'.' && bytes.get(i + 1).map_or(false, u8::is_ascii_digit));
        if starts_number {
            let mut end = i;
            let mut seen_dot = false;
            while end < bytes.len() {
                match bytes[end] {
                    b'0'..=b'9' => end += 1,
                    b'.' if !seen_dot => {
                        seen_dot = true;
                        end += 1;
                    }
                    _ => break,
                }
            }
            let literal = answer[i..end].trim_end_matches('.');
            return literal.parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0));
        }
        i += 1;
    }
    None
}

/// Content cut to `max_chars` characters with a trailing "...", or the title
/// when there is no content.
pub fn truncate_summary(title: &str, content: &str, max_chars: usize) -> String {
    let content = content.trim();
    if content.is_empty() {
        return title.trim().to_string();
    }
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

pub struct ImportanceScorer {
    backend: Option<Arc<dyn LlmProvider>>,
    ai_available: bool,
    call_timeout: Duration,
    summary_chars: usize,
}

impl ImportanceScorer {
    pub async fn new(
        backend: Option<Arc<dyn LlmProvider>>,
        call_timeout: Duration,
        summary_chars: usize,
    ) -> Self {
        let ai_available = match &backend {
            Some(provider) => provider.is_available().await,
            None => false,
        };
        info!(ai_available, "importance scorer ready");
        Self {
            backend,
            ai_available,
            call_timeout,
            summary_chars,
        }
    }

    pub fn heuristic_only(summary_chars: usize) -> Self {
        Self {
            backend: None,
            ai_available: false,
            call_timeout: Duration::from_secs(30),
            summary_chars,
        }
    }

    pub fn is_available(&self) -> bool {
        self.ai_available
    }

    fn provider(&self) -> Option<&dyn LlmProvider> {
        match (&self.backend, self.ai_available) {
            (Some(p), true) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub async fn score(&self, title: &str, content: &str) -> f64 {
        if let Some(provider) = self.provider() {
            let prompt = SCORE_PROMPT
                .replace("{title}", title)
                .replace("{content}", content);
            let request = LlmRequest::constrained(prompt, 10, 0.1);
            match generate_with_timeout(provider, request, self.call_timeout).await {
                Ok(answer) => match parse_score(&answer) {
                    Some(score) => return score,
                    None => debug!(answer = %answer.trim(), "no score in LLM answer, using heuristic"),
                },
                Err(e) => warn!(%e, "LLM scoring failed, using heuristic"),
            }
        }
        heuristic_importance(title, content)
    }

    pub async fn summarize(&self, title: &str, content: &str) -> String {
        if let Some(provider) = self.provider() {
            if !content.trim().is_empty() {
                let prompt = SUMMARY_PROMPT
                    .replace("{title}", title)
                    .replace("{content}", content);
                let request = LlmRequest::constrained(prompt, 200, 0.3);
                match generate_with_timeout(provider, request, self.call_timeout).await {
                    Ok(summary) if !summary.trim().is_empty() => return summary.trim().to_string(),
                    Ok(_) => debug!("empty LLM summary, truncating content"),
                    Err(e) => warn!(%e, "LLM summary failed, truncating content"),
                }
            }
        }
        truncate_summary(title, content, self.summary_chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn neutral_text_scores_half() {
        assert!(approx(heuristic_importance("Weather update", "Sunny all week"), 0.5));
    }

    #[test]
    fn keyword_weights() {
        // high: fda, 승인 / medium: 투자
        assert!(approx(heuristic_importance("FDA 승인", "투자 확대"), 0.75));
        // low: 인터뷰
        assert!(approx(heuristic_importance("CEO 인터뷰", ""), 0.4));
    }

    #[test]
    fn heuristic_is_clamped() {
        let loaded = "FDA 식약처 승인 인허가 규제 허가 approval regulator";
        assert!(approx(heuristic_importance(loaded, ""), 1.0));
        let weak = "행사 이벤트 인터뷰 기고 interview webinar exhibition";
        assert!(approx(heuristic_importance(weak, ""), 0.0));
    }

    #[test]
    fn extra_high_impact_keyword_never_lowers_score() {
        let base = "신규 진단키트 행사 소식";
        let mut previous = heuristic_importance(base, "");
        let mut text = base.to_string();
        for keyword in ["FDA", "식약처", "승인", "규제", "approval", "regulator"] {
            text.push(' ');
            text.push_str(keyword);
            let next = heuristic_importance(&text, "");
            assert!(next >= previous, "{} lowered the score", keyword);
            previous = next;
        }
    }

    #[test]
    fn score_parsing() {
        assert_eq!(parse_score("0.85"), Some(0.85));
        assert_eq!(parse_score("Importance: 0.7 (regulatory)"), Some(0.7));
        assert_eq!(parse_score(".5"), Some(0.5));
        assert_eq!(parse_score("1."), Some(1.0));
        assert_eq!(parse_score("7"), Some(1.0));
        assert_eq!(parse_score("high"), None);
    }

    #[test]
    fn truncation_fallback() {
        assert_eq!(truncate_summary("Title", "", 200), "Title");
        assert_eq!(truncate_summary("Title", "  short body ", 200), "short body");
        let long = "가".repeat(250);
        let summary = truncate_summary("Title", &long, 200);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 203);
    }

    #[tokio::test]
    async fn without_backend_falls_back() {
        let scorer = ImportanceScorer::heuristic_only(10);
        assert!(!scorer.is_available());
        assert!(approx(scorer.score("FDA clears kit", "").await, 0.6));
        assert_eq!(scorer.summarize("Title", "0123456789abc").await, "0123456789...");
    }
}
