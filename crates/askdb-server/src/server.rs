//! HTTP chat routes

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use askdb_agent::Agent;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatRequest, NO_RESPONSE, TextDelta, answer_deltas, to_messages};

// Server state
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    /// Pause between streamed words
    pub word_delay: Duration,
}

fn delta_event(text: &str) -> Event {
    Event::default().data(TextDelta::new(text).to_json())
}

/// `POST /api/chat`: run the agent, then stream the answer word by word.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    if !request.tools.is_empty() {
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        tracing::debug!("Ignoring frontend tools: {}", names.join(", "));
    }
    let options = request.run_options();
    let messages = to_messages(request.messages);

    let stream = async_stream::stream! {
        // Dropping the response body drops this future, which ends the run
        match state.agent.run(messages, &options, CancellationToken::new()).await {
            Ok(run) => {
                for delta in answer_deltas(&run.formatted_response) {
                    yield Ok(delta_event(&delta));
                    if !state.word_delay.is_zero() {
                        tokio::time::sleep(state.word_delay).await;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Chat run failed: {}", e);
                yield Ok(delta_event(&format!("Error: {}", e)));
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// `POST /api/chat/complete`: the same run, answered as one JSON body.
async fn handle_chat_complete(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    let options = request.run_options();
    let messages = to_messages(request.messages);

    match state
        .agent
        .run(messages, &options, CancellationToken::new())
        .await
    {
        Ok(run) => {
            let text = if run.formatted_response.trim().is_empty() {
                NO_RESPONSE.to_string()
            } else {
                run.formatted_response
            };
            (StatusCode::OK, Json(serde_json::json!({ "text": text })))
        }
        Err(e) => {
            tracing::error!("Chat run failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/complete", post(handle_chat_complete))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, address: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", address, port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb_agent::{
        AgentConfig, AgentEvent,
        transport::{AgentEventStream, AgentRunConfig, Transport},
    };
    use askdb_ai::{Message, Model, Usage};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Answers every call with the same text, or fails with the same error.
    struct ReplyTransport {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl Transport for ReplyTransport {
        async fn run(
            &self,
            _messages: Vec<Message>,
            _config: &AgentRunConfig,
            _cancel: CancellationToken,
        ) -> askdb_ai::Result<AgentEventStream> {
            let reply = self.reply.clone();
            Ok(Box::pin(async_stream::stream! {
                match reply {
                    Ok(text) => yield AgentEvent::TurnEnd {
                        turn_number: 1,
                        message: Message::assistant_text(text),
                        usage: Usage::default(),
                    },
                    Err(message) => yield AgentEvent::Error { message },
                }
            }))
        }
    }

    fn app(reply: Result<&str, &str>) -> Router {
        let transport = Arc::new(ReplyTransport {
            reply: reply.map(str::to_string).map_err(str::to_string),
        });
        let agent = Agent::new(AgentConfig::new(Model::new("test", "http://localhost")), transport);
        router(AppState {
            agent: Arc::new(agent),
            word_delay: Duration::ZERO,
        })
    }

    fn chat_request(uri: &str) -> Request<Body> {
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": [{ "type": "text", "text": "How many customers?" }] }]
        });
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn data_lines(body: &str) -> Vec<&str> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Ok("hi"))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_chat_streams_words_then_done() {
        let response = app(Ok("There are 59 customers."))
            .oneshot(chat_request("/api/chat"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let body = body_text(response).await;
        assert_eq!(
            data_lines(&body),
            vec![
                r#"{"type":"text-delta","textDelta":"There "}"#,
                r#"{"type":"text-delta","textDelta":"are "}"#,
                r#"{"type":"text-delta","textDelta":"59 "}"#,
                r#"{"type":"text-delta","textDelta":"customers."}"#,
                "[DONE]",
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_empty_answer_falls_back() {
        let response = app(Ok("")).oneshot(chat_request("/api/chat")).await.unwrap();
        let body = body_text(response).await;
        let lines = data_lines(&body);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(NO_RESPONSE));
        assert_eq!(lines[1], "[DONE]");
    }

    #[tokio::test]
    async fn test_chat_error_becomes_text_frame() {
        let response = app(Err("HTTP 503: overloaded"))
            .oneshot(chat_request("/api/chat"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        let lines = data_lines(&body);
        assert_eq!(
            lines[0],
            r#"{"type":"text-delta","textDelta":"Error: HTTP 503: overloaded"}"#
        );
        assert_eq!(lines[1], "[DONE]");
    }

    #[tokio::test]
    async fn test_chat_complete_json() {
        let response = app(Ok("There are 59 customers."))
            .oneshot(chat_request("/api/chat/complete"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            r#"{"text":"There are 59 customers."}"#
        );

        let response = app(Err("boom"))
            .oneshot(chat_request("/api/chat/complete"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"messages": [{"role": "robot"}]}"#))
            .unwrap();
        let response = app(Ok("hi")).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
