//! Citewise API Gateway
//!
//! HTTP front for the retrieval-augmented chat pipeline.
//! Handles:
//! - Chat requests and per-session history
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod state;

pub use state::AppState;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use citewise_common::{config::AppConfig, metrics, RagPipeline};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use middleware::rate_limit::{rate_limit_middleware, RateLimitState};
use state::SessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config.observability.log_level, config.observability.json_logging);

    info!(
        service = %config.observability.service_name,
        "Starting Citewise API Gateway v{}",
        citewise_common::VERSION
    );

    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        let mut builder = PrometheusBuilder::new().set_buckets(metrics::LATENCY_BUCKETS)?;
        for service in ["embedding", "search", "completion"] {
            builder = builder.set_buckets_for_metric(
                Matcher::Full(format!("{}_{}_duration_seconds", metrics::METRICS_PREFIX, service)),
                metrics::EXTERNAL_CALL_BUCKETS,
            )?;
        }
        builder.with_http_listener(metrics_addr).install()?;
        info!("Metrics exposed on {}", metrics_addr);
    }
    metrics::register_metrics();

    let pipeline = RagPipeline::from_config(&config)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState {
        sessions: SessionStore::new(config.server.max_sessions),
        config: Arc::new(config),
        pipeline: Arc::new(pipeline),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Chat
        .route("/chat", post(handlers::chat::chat))
        // Session endpoints
        .route("/sessions", post(handlers::sessions::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route("/sessions/{id}/transcript", get(handlers::sessions::transcript))
        .route_layer(from_fn(middleware::metrics::track_metrics));

    if state.config.rate_limit.enabled {
        let limiter = RateLimitState::from_config(&state.config.rate_limit);
        api_routes = api_routes.layer(from_fn_with_state(limiter, rate_limit_middleware));
    }

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use citewise_common::{
        completion::ScriptedCompleter,
        composer::{AnswerComposer, PromptTemplate},
        context::ContextPacker,
        embeddings::MockEmbedder,
        errors::AppError,
        resilience::RetryPolicy,
        retrieval::Retriever,
        search::{Candidate, StaticSearch},
        tokenizer::HeuristicCounter,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn slides() -> Vec<Candidate> {
        vec![
            Candidate::new(0, "Ownership", "Each value has one owner.", "Slide 3"),
            Candidate::new(1, "Borrowing", "References borrow values.", "Slide 4"),
        ]
    }

    fn test_state(completer: ScriptedCompleter, rate_limit: Option<(u32, u32)>) -> AppState {
        let mut config = AppConfig::default();
        match rate_limit {
            Some((rps, burst)) => {
                config.rate_limit.requests_per_second = rps;
                config.rate_limit.burst = burst;
                config.rate_limit.enabled = true;
            }
            None => config.rate_limit.enabled = false,
        }

        let policy = RetryPolicy::no_retry(Duration::from_secs(1));
        let pipeline = RagPipeline::new(
            Retriever::new(Arc::new(MockEmbedder::new(16)), Arc::new(StaticSearch::new(slides())), 5)
                .with_policy(policy.clone()),
            ContextPacker::new(Arc::new(HeuristicCounter)),
            AnswerComposer::new(Arc::new(completer), PromptTemplate::default()).with_policy(policy),
            "gpt-4o-mini",
            4096,
        );

        AppState {
            sessions: SessionStore::new(config.server.max_sessions),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }

    fn app(completer: ScriptedCompleter) -> Router {
        create_router(test_state(completer, None))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(ScriptedCompleter::new("gpt-4o-mini"))
            .oneshot(get("/v1/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_pipeline() {
        let response = app(ScriptedCompleter::new("gpt-4o-mini"))
            .oneshot(get("/v1/ready"))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["checks"]["pipeline"]["chat_model"], "gpt-4o-mini");
        assert_eq!(body["checks"]["pipeline"]["token_budget"], 4096);
        assert_eq!(body["checks"]["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_chat_answered_with_citations() {
        let response = app(ScriptedCompleter::replying("gpt-4o-mini", "Values have one owner."))
            .oneshot(post_json("/v1/chat", json!({ "message": "What is ownership?" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "answered");
        assert_eq!(body["retrieval_degraded"], false);

        let answer = body["answer"].as_str().unwrap();
        assert!(answer.starts_with("Values have one owner. \n\n\nReferences:\n"));
        assert!(answer.contains("Slide 3「Ownership」"));

        let citations = body["citations"].as_array().unwrap();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0]["index"], 0);
        assert_eq!(citations[1]["label"], "Slide 4「Borrowing」");
    }

    #[tokio::test]
    async fn test_chat_unavailable() {
        let completer = ScriptedCompleter::new("gpt-4o-mini").then_fail(AppError::CompletionError {
            message: "model offline".into(),
        });
        let response = app(completer)
            .oneshot(post_json("/v1/chat", json!({ "message": "What is ownership?" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "unavailable");
        assert!(body["answer"].is_null());
        assert!(body["citations"].as_array().unwrap().is_empty());
        assert!(body["error"].is_object());
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_message() {
        let router = app(ScriptedCompleter::replying("gpt-4o-mini", "unused"));

        let blank = router
            .clone()
            .oneshot(post_json("/v1/chat", json!({ "message": "   " })))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let empty = router
            .oneshot(post_json("/v1/chat", json!({ "message": "" })))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_unknown_session() {
        let response = app(ScriptedCompleter::replying("gpt-4o-mini", "unused"))
            .oneshot(post_json(
                "/v1/chat",
                json!({ "message": "hi", "session_id": uuid::Uuid::new_v4() }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_flow() {
        let completer = ScriptedCompleter::new("gpt-4o-mini")
            .then_reply("First answer.")
            .then_fail(AppError::CompletionError { message: "down".into() });
        let router = app(completer);

        let created = router
            .clone()
            .oneshot(Request::builder().method("POST").uri("/v1/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let session_id = body_json(created).await["session_id"].as_str().unwrap().to_string();

        for message in ["What is ownership?", "And borrowing?"] {
            let response = router
                .clone()
                .oneshot(post_json(
                    "/v1/chat",
                    json!({ "message": message, "session_id": session_id }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let session = router
            .clone()
            .oneshot(get(&format!("/v1/sessions/{}", session_id)))
            .await
            .unwrap();
        let body = body_json(session).await;
        let turns = body["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["user"], "What is ownership?");
        assert!(turns[1]["assistant"].is_null());

        let transcript = router
            .clone()
            .oneshot(get(&format!("/v1/sessions/{}/transcript", session_id)))
            .await
            .unwrap();
        assert_eq!(transcript.status(), StatusCode::OK);
        let disposition = transcript.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains(&format!("chat_history_{}.txt", session_id)));
        let bytes = axum::body::to_bytes(transcript.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("User: What is ownership?\nChatbot: First answer."));
        assert!(text.contains("User: And borrowing?\nChatbot: Sorry, an answer could not be generated.\n\n"));

        let deleted = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/sessions/{}", session_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let after = router
            .clone()
            .oneshot(get(&format!("/v1/sessions/{}", session_id)))
            .await
            .unwrap();
        assert_eq!(after.status(), StatusCode::NOT_FOUND);

        let transcript = router
            .oneshot(get(&format!("/v1/sessions/{}/transcript", session_id)))
            .await
            .unwrap();
        assert_eq!(transcript.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_evicted_session_not_found() {
        let mut state = test_state(ScriptedCompleter::new("gpt-4o-mini"), None);
        state.sessions = SessionStore::new(1);
        let router = create_router(state);

        let mut ids = Vec::new();
        for _ in 0..2 {
            let created = router
                .clone()
                .oneshot(Request::builder().method("POST").uri("/v1/sessions").body(Body::empty()).unwrap())
                .await
                .unwrap();
            ids.push(body_json(created).await["session_id"].as_str().unwrap().to_string());
        }

        let evicted = router
            .clone()
            .oneshot(get(&format!("/v1/sessions/{}", ids[0])))
            .await
            .unwrap();
        assert_eq!(evicted.status(), StatusCode::NOT_FOUND);

        let live = router
            .oneshot(get(&format!("/v1/sessions/{}", ids[1])))
            .await
            .unwrap();
        assert_eq!(live.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_message_limit_follows_config() {
        let long = "a".repeat(4500);

        let default_limit = app(ScriptedCompleter::replying("gpt-4o-mini", "ok"))
            .oneshot(post_json("/v1/chat", json!({ "message": long })))
            .await
            .unwrap();
        assert_eq!(default_limit.status(), StatusCode::BAD_REQUEST);

        let mut state = test_state(ScriptedCompleter::replying("gpt-4o-mini", "ok"), None);
        let mut config = (*state.config).clone();
        config.server.max_message_chars = 5000;
        state.config = Arc::new(config);

        let raised = create_router(state)
            .oneshot(post_json("/v1/chat", json!({ "message": long })))
            .await
            .unwrap();
        assert_eq!(raised.status(), StatusCode::OK);
        assert_eq!(body_json(raised).await["status"], "answered");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let router = create_router(test_state(ScriptedCompleter::new("gpt-4o-mini"), Some((1, 1))));

        let first = router.clone().oneshot(get("/v1/health")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router.oneshot(get("/v1/health")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
