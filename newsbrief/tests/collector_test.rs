use mockito::Matcher;
use std::time::Duration;

use newsbrief::collector::{Collector, NaverNewsCollector};
use newsbrief::error::PipelineError;

const SEARCH_BODY: &str = r#"{
    "lastBuildDate": "Fri, 16 Oct 2026 10:00:00 +0900",
    "total": 2,
    "start": 1,
    "display": 2,
    "items": [
        {
            "title": "<b>진단키트</b> 식약처 &quot;품목허가&quot; 획득",
            "originallink": "https://www.yna.co.kr/view/AKR2026",
            "link": "https://n.news.naver.com/mnews/article/001/0001",
            "description": "국내 업체가 <b>진단키트</b> 허가를 받았다.",
            "pubDate": "Fri, 16 Oct 2026 09:30:00 +0900"
        },
        {
            "title": "해외 <b>진단키트</b> 시장 동향",
            "originallink": "https://global.example.com/story",
            "link": "",
            "description": "",
            "pubDate": "not a date"
        }
    ]
}"#;

fn collector(url: String) -> NaverNewsCollector {
    NaverNewsCollector::new(url, "client-id", "client-secret", 5)
        .unwrap()
        .with_retries(3, Duration::ZERO)
}

#[tokio::test]
async fn search_parses_and_cleans_items() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_header("X-Naver-Client-Id", "client-id")
        .match_header("X-Naver-Client-Secret", "client-secret")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), "진단키트".into()),
            Matcher::UrlEncoded("display".into(), "100".into()),
            Matcher::UrlEncoded("start".into(), "1".into()),
            Matcher::UrlEncoded("sort".into(), "date".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(SEARCH_BODY)
        .create_async()
        .await;

    // display above the API maximum is capped
    let articles = collector(server.url()).search("진단키트", 500).await.unwrap();
    assert_eq!(articles.len(), 2);

    let first = &articles[0];
    assert_eq!(first.title, "진단키트 식약처 \"품목허가\" 획득");
    assert_eq!(first.description, "국내 업체가 진단키트 허가를 받았다.");
    assert_eq!(first.link, "https://n.news.naver.com/mnews/article/001/0001");
    assert_eq!(first.source, "연합뉴스");
    assert_eq!(first.keyword, "진단키트");
    assert_eq!(
        first.published_at.unwrap().to_rfc3339(),
        "2026-10-16T00:30:00+00:00"
    );

    let second = &articles[1];
    assert_eq!(second.link, "https://global.example.com/story");
    assert_eq!(second.source, "global.example.com");
    assert!(second.published_at.is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"errorMessage": "Authentication failed"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = collector(server.url()).search("진단", 10).await.unwrap_err();
    assert!(err.to_string().contains("401"));
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let err = collector(server.url()).search("진단", 10).await.unwrap_err();
    assert!(err.to_string().contains("503"));
    mock.assert_async().await;
}

#[test]
fn missing_credentials_are_reported() {
    let config = common::CollectorConfig {
        client_id_env: Some("NEWSBRIEF_TEST_UNSET_CLIENT_ID".into()),
        client_secret_env: Some("NEWSBRIEF_TEST_UNSET_CLIENT_SECRET".into()),
        ..Default::default()
    };
    match NaverNewsCollector::from_config(&config) {
        Err(PipelineError::MissingCredentials(msg)) => {
            assert!(msg.contains("NEWSBRIEF_TEST_UNSET_CLIENT_ID"))
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("collector built without credentials"),
    }
}
