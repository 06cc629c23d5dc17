mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{json, spawn_backend, sse, Reply};
use market_lens_core::{
    Config, Error, Locale, MarketClient, Role, Session, StreamEvent,
};
use serde_json::{json as value, Value};
use tokio_util::sync::CancellationToken;

fn client(base_url: &str, idle_secs: u64) -> MarketClient {
    MarketClient::with_timeouts(base_url, Duration::from_secs(5), Duration::from_secs(idle_secs))
}

fn session(base_url: &str) -> Session {
    let mut config = Config::new();
    config.locale = Locale::En;
    Session::new(client(base_url, 5), &config)
}

/// Splits `text` into pieces of `size` bytes, ignoring char boundaries.
fn byte_pieces(text: &str, size: usize) -> Vec<Vec<u8>> {
    text.as_bytes().chunks(size).map(<[u8]>::to_vec).collect()
}

#[tokio::test]
async fn test_stream_answer_reassembles_split_lines() {
    let body = format!(
        "{}{}{}",
        sse("content", "Hello"),
        sse("content", " world"),
        sse("end", "")
    );
    let base = spawn_backend(move |req| match req.path.as_str() {
        "/api/chat/answer/stream" => Reply::Chunks(byte_pieces(&body, 7)),
        _ => Reply::Json(404, "{}".to_string()),
    })
    .await;

    let mut events = Vec::new();
    client(&base, 5)
        .stream_answer("m-1", &CancellationToken::new(), |event| {
            events.push(event);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(
        events,
        vec![
            StreamEvent::Content("Hello".to_string()),
            StreamEvent::Content(" world".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_streamed_turn_end_to_end() {
    let summary = "Dryer shipments in Japan grew steadily through 2024. The forecast points to \
                   continued growth as compact heat-pump models replace vented units, with \
                   replacement demand and small households driving most new purchases over the \
                   next five years.";
    let answer = format!(
        "**Market Analysis: Dryers**\nIntro.\n\n**Market Trend Summary:**\n{}\n**Graphic Configuration:**\n",
        summary
    );
    let chart = value!({"chartConfig": {
        "title": {"text": "Dryers in Japan"},
        "xAxis": {"data": ["2023", "2024"]},
        "series": [{"name": "Japan", "type": "bar", "data": [1.2, 1.5]}]
    }})
    .to_string();

    let mut body = String::new();
    body.push_str(&sse("status", "Analyzing market data"));
    for piece in answer.split_inclusive(' ') {
        body.push_str(&sse("content", piece));
    }
    body.push_str(&sse("chart", &chart));
    body.push_str(&sse("end", ""));

    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let base = spawn_backend(move |req| {
        let payload: Value = serde_json::from_str(&req.body).unwrap_or(Value::Null);
        recorded.lock().unwrap().push((req.path.clone(), payload));
        match req.path.as_str() {
            "/api/chat/question" => json(value!({
                "message_id": "m-42", "status": "processing", "message": "Question received"
            })),
            "/api/chat/answer/stream" => Reply::Chunks(byte_pieces(&body, 64)),
            "/api/chat/web-search" => json(value!({"output_text": "Heat-pump share rising."})),
            _ => Reply::Json(404, "{}".to_string()),
        }
    })
    .await;

    let mut session = session(&base);
    let mut content_events = 0;
    let outcome = session
        .ask_streaming("How are dryers doing in Japan?", &CancellationToken::new(), |event, _| {
            if matches!(event, StreamEvent::Content(_)) {
                content_events += 1;
            }
        })
        .await
        .unwrap();

    assert!(content_events > 1);
    assert_eq!(outcome.message_id, "m-42");
    assert_eq!(outcome.enrichment.as_deref(), Some("Heat-pump share rising."));

    let conv = session.conversation();
    assert!(!conv.loading);
    let message = conv.message("m-42").unwrap();
    assert_eq!(message.role, Role::Assistant);
    assert!(!message.is_streaming());
    assert!(message.content.starts_with("*Analyzing market data*\n**Market Analysis: Dryers**"));

    let chart = conv.current_chart.as_ref().unwrap();
    assert_eq!(chart.title_text(), Some("Dryers in Japan"));
    assert!(chart.get("color").is_some());
    assert_eq!(conv.current_summary.as_deref(), Some(summary));

    let requests = seen.lock().unwrap();
    let paths: Vec<&str> = requests.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(
        paths,
        vec!["/api/chat/question", "/api/chat/answer/stream", "/api/chat/web-search"]
    );
    assert_eq!(requests[0].1["message"], "How are dryers doing in Japan?");
    assert_eq!(requests[0].1["conversation_history"], value!([]));
    assert_eq!(requests[1].1["message_id"], "m-42");
    assert!(requests[2].1["input"]
        .as_str()
        .unwrap()
        .contains("Market Trend Summary"));
}

#[tokio::test]
async fn test_web_search_summary_becomes_current_summary() {
    let searched = "Compact dryer demand in Japan rose for a third straight year in 2024. The \
                    forecast expects heat-pump models to keep gaining share as replacement \
                    cycles shorten, while single-person households remain the fastest growing \
                    group of first-time buyers across the major metropolitan areas.";
    let output_text = format!("**Market Trend Summary:**\n{}", searched);

    let body = format!(
        "{}{}",
        sse("content", "**Market Analysis: Dryers**\nShipments grew.\n"),
        sse("end", "")
    );
    let base = spawn_backend(move |req| match req.path.as_str() {
        "/api/chat/question" => json(value!({
            "message_id": "m-9", "status": "processing", "message": "Question received"
        })),
        "/api/chat/answer/stream" => Reply::Chunks(vec![body.clone().into_bytes()]),
        "/api/chat/web-search" => json(value!({"output_text": output_text})),
        _ => Reply::Json(404, "{}".to_string()),
    })
    .await;

    let mut session = session(&base);
    let outcome = session
        .ask_streaming("Dryers in Japan?", &CancellationToken::new(), |_, _| {})
        .await
        .unwrap();

    assert!(outcome.extraction.summary_text.is_none());
    assert!(outcome
        .enrichment
        .as_deref()
        .unwrap()
        .starts_with("**Market Trend Summary:**"));
    assert_eq!(session.conversation().current_summary.as_deref(), Some(searched));
}

#[tokio::test]
async fn test_thin_web_search_summary_is_ignored() {
    let body = sse("content", "**Market Analysis: Dryers**\nShipments grew.\n");
    let base = spawn_backend(move |req| match req.path.as_str() {
        "/api/chat/question" => json(value!({
            "message_id": "m-10", "status": "processing", "message": "ok"
        })),
        "/api/chat/answer/stream" => Reply::Chunks(vec![body.clone().into_bytes()]),
        "/api/chat/web-search" => json(value!({
            "output_text": "**Market Trend Summary:**\nForecast: up."
        })),
        _ => Reply::Json(404, "{}".to_string()),
    })
    .await;

    let mut session = session(&base);
    session
        .ask_streaming("Dryers?", &CancellationToken::new(), |_, _| {})
        .await
        .unwrap();
    assert!(session.conversation().current_summary.is_none());
}

#[tokio::test]
async fn test_stream_idle_timeout() {
    let base = spawn_backend(|_| Reply::Stall).await;
    let result = client(&base, 1)
        .stream_answer("m", &CancellationToken::new(), |_| Ok(()))
        .await;
    assert!(matches!(
        result,
        Err(Error::Timeout { context: "answer stream", seconds: 1 })
    ));
}

#[tokio::test]
async fn test_stream_cancellation() {
    let base = spawn_backend(|_| Reply::Stall).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = client(&base, 10).stream_answer("m", &cancel, |_| Ok(())).await;
    assert!(matches!(result, Err(Error::Cancelled { .. })));
}

#[tokio::test]
async fn test_stream_http_error_status() {
    let base = spawn_backend(|_| Reply::Json(500, r#"{"detail":"boom"}"#.to_string())).await;
    let result = client(&base, 5)
        .stream_answer("m", &CancellationToken::new(), |_| Ok(()))
        .await;
    match result {
        Err(Error::Http { status, body, .. }) => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected an HTTP error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_stream_keeps_partial_answer_and_apologizes() {
    let base = spawn_backend(|req| match req.path.as_str() {
        "/api/chat/question" => json(value!({
            "message_id": "m-7", "status": "processing", "message": "ok"
        })),
        _ => Reply::Json(503, "unavailable".to_string()),
    })
    .await;

    let mut session = session(&base);
    let result = session
        .ask_streaming("anything", &CancellationToken::new(), |_, _| {})
        .await;

    assert!(matches!(result, Err(Error::Http { status: 503, .. })));
    let conv = session.conversation();
    assert!(!conv.loading);
    assert!(!conv.message("m-7").unwrap().is_streaming());
    assert_eq!(conv.messages().last().unwrap().content, Locale::En.apology());
}
