//! An axum backend on a local port for exercising the client.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::stream::{self, StreamExt};
use tokio::net::TcpListener;

pub enum Reply {
    Json(u16, String),
    /// An event-stream body sent piece by piece.
    Chunks(Vec<Vec<u8>>),
    /// Headers, then a body that never produces anything.
    Stall,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Path plus query string, as the client sent it.
    pub path: String,
    pub body: String,
}

/// Serves every request through `handler`; returns the client base URL.
pub async fn spawn_backend<H>(handler: H) -> String
where
    H: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let app = Router::new().fallback(move |method: Method, uri: Uri, body: String| {
        let handler = handler.clone();
        async move {
            let request = Request {
                method: method.to_string(),
                path: uri
                    .path_and_query()
                    .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string()),
                body,
            };
            into_response(handler(&request))
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/api", addr)
}

fn into_response(reply: Reply) -> Response {
    match reply {
        Reply::Json(status, body) => {
            let status = StatusCode::from_u16(status).unwrap();
            (status, [(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Reply::Chunks(chunks) => {
            let body = stream::iter(chunks).then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, Infallible>(chunk)
            });
            event_stream(Body::from_stream(body))
        }
        Reply::Stall => {
            let body = stream::pending::<Result<Vec<u8>, Infallible>>();
            event_stream(Body::from_stream(body))
        }
    }
}

fn event_stream(body: Body) -> Response {
    ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
}

pub fn json(body: serde_json::Value) -> Reply {
    Reply::Json(200, body.to_string())
}

pub fn sse(kind: &str, data: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "type": kind, "data": data })
    )
}
