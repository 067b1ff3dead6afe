use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::{generate_with_timeout, LlmProvider, LlmRequest};
use crate::model::{Article, Category};

const CLASSIFY_PROMPT: &str = "Classify the following news article into exactly one category.

Categories:
1. Regulatory/Policy - approvals, clearances, authorities, regulation
2. Market/Industry - investment, M&A, IPO, market size, revenue
3. Technology/R&D - research, clinical trials, patents, new technology
4. Competitor - activity of competing companies
5. Product/Service - new product launches, service releases
6. General - none of the above

Title: {title}
Content: {content}

Answer with the category number only (1-6):";

/// Curated keywords per category, in tie-break priority order.
fn default_keywords() -> Vec<(Category, Vec<&'static str>)> {
    vec![
        (
            Category::Regulatory,
            vec![
                "식약처", "FDA", "인허가", "규제", "승인", "허가", "의료기기법", "임상시험 승인",
                "품목허가", "GMP", "인증", "CE마크", "MFDS", "규제 샌드박스", "의료기기 심사",
                "허가 심사", "approval", "approved", "clearance", "regulator", "regulation",
                "authorization",
            ],
        ),
        (
            Category::Market,
            vec![
                "시장", "투자", "M&A", "IPO", "인수", "합병", "펀딩", "상장", "시장규모", "매출",
                "성장률", "투자유치", "기업가치", "시가총액", "분기실적", "매각", "스타트업",
                "investment", "acquisition", "merger", "funding", "revenue", "valuation",
            ],
        ),
        (
            Category::Technology,
            vec![
                "임상시험", "연구", "개발", "특허", "기술", "인공지능", "신기술", "바이오마커",
                "유전자", "진단기술", "알고리즘", "정확도", "민감도", "특이도", "R&D", "연구개발",
                "논문", "학회", "clinical trial", "research", "patent", "biomarker", "algorithm",
                "artificial intelligence",
            ],
        ),
        (
            Category::Competitor,
            vec![
                "씨젠", "SD바이오센서", "수젠텍", "래피젠", "휴마시스", "녹십자MS", "바디텍메드",
                "피씨엘", "젠큐릭스", "마크로젠", "로슈", "애보트", "지멘스", "다나허", "써모피셔",
                "seegene", "roche", "abbott", "siemens healthineers", "danaher", "thermo fisher",
            ],
        ),
        (
            Category::Product,
            vec![
                "신제품", "출시", "런칭", "제품", "서비스", "솔루션", "키트", "플랫폼", "시스템",
                "장비", "기기", "웨어러블", "앱", "어플리케이션", "소프트웨어", "launch",
                "new product", "wearable", "platform",
            ],
        ),
    ]
}

/// Deterministic keyword-count classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    table: Vec<(Category, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let table = default_keywords()
            .into_iter()
            .map(|(c, kws)| (c, kws.into_iter().map(str::to_lowercase).collect()))
            .collect();
        Self { table }
    }
}

impl KeywordClassifier {
    /// Build from a custom table; entry order is the tie-break priority.
    pub fn with_table(table: Vec<(Category, Vec<String>)>) -> Self {
        let table = table
            .into_iter()
            .map(|(c, kws)| (c, kws.into_iter().map(|k| k.to_lowercase()).collect()))
            .collect();
        Self { table }
    }

    /// Keyword hit count per category, in table order.
    pub fn scores(&self, title: &str, content: &str) -> Vec<(Category, usize)> {
        let text = format!("{} {}", title, content).to_lowercase();
        self.table
            .iter()
            .map(|(category, keywords)| {
                let hits = keywords.iter().filter(|k| text.contains(k.as_str())).count();
                (*category, hits)
            })
            .collect()
    }

    /// Highest score wins, earlier table entries win ties, all-zero is `General`.
    pub fn classify(&self, title: &str, content: &str) -> Category {
        let mut best = (Category::General, 0usize);
        for (category, hits) in self.scores(title, content) {
            if hits > best.1 {
                best = (category, hits);
            }
        }
        best.0
    }
}

/// Parse the first category code digit out of a model answer.
pub fn parse_category_code(answer: &str) -> Option<Category> {
    answer.chars().find_map(Category::from_code)
}

pub struct Classifier {
    backend: Option<Arc<dyn LlmProvider>>,
    ai_available: bool,
    keywords: KeywordClassifier,
    call_timeout: Duration,
}

impl Classifier {
    /// Probes the backend once; the answer is kept for the classifier's lifetime.
    pub async fn new(backend: Option<Arc<dyn LlmProvider>>, call_timeout: Duration) -> Self {
        let ai_available = match &backend {
            Some(provider) => provider.is_available().await,
            None => false,
        };
        info!(ai_available, "classifier ready");
        Self {
            backend,
            ai_available,
            keywords: KeywordClassifier::default(),
            call_timeout,
        }
    }

    pub fn keyword_only() -> Self {
        Self {
            backend: None,
            ai_available: false,
            keywords: KeywordClassifier::default(),
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_keywords(mut self, keywords: KeywordClassifier) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn is_available(&self) -> bool {
        self.ai_available
    }

    /// Never fails: any backend problem falls through to keyword matching.
    pub async fn classify(&self, title: &str, content: &str) -> Category {
        if let Some(category) = self.classify_with_ai(title, content).await {
            return category;
        }
        self.keywords.classify(title, content)
    }

    async fn classify_with_ai(&self, title: &str, content: &str) -> Option<Category> {
        let provider = match (&self.backend, self.ai_available) {
            (Some(p), true) => p,
            _ => return None,
        };

        let prompt = CLASSIFY_PROMPT
            .replace("{title}", title)
            .replace("{content}", content);
        let request = LlmRequest::constrained(prompt, 5, 0.1);

        match generate_with_timeout(provider.as_ref(), request, self.call_timeout).await {
            Ok(answer) => {
                let parsed = parse_category_code(&answer);
                if parsed.is_none() {
                    debug!(answer = %answer.trim(), "no category code in LLM answer, using keywords");
                }
                parsed
            }
            Err(e) => {
                warn!(%e, "LLM classification failed, using keywords");
                None
            }
        }
    }

    /// Classify each article independently, preserving input order.
    pub async fn classify_batch(&self, articles: &[Article]) -> Vec<Category> {
        let mut out = Vec::with_capacity(articles.len());
        for article in articles {
            out.push(self.classify(&article.title, &article.description).await);
        }
        out
    }
}
