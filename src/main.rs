mod config;
mod error;
mod models;
mod services;
mod utils;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Request, Response, header},
    response::Json,
    routing::{get, post},
};
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::AppError;
use crate::models::{StoryRequest, StoryResponse};
use crate::services::llm::{LazyModel, RemoteModelLoader};

#[derive(Clone)]
struct AppState {
    model: Arc<LazyModel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::from_env()?;

    // The model itself is loaded on the first story request
    let model = Arc::new(LazyModel::new(RemoteModelLoader::new(config.llm.clone())));
    let app = app(AppState { model });

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(
        "Listening on {} (model '{}' at {})",
        listener.local_addr()?,
        config.llm.model,
        config.llm.api_url
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                request_id = %uuid::Uuid::new_v4(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            tracing::info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/generate_story", post(generate_story))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(trace_layer)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::AllowMethods::any())
                .allow_headers(tower_http::cors::AllowHeaders::any()),
        )
}

async fn index() -> &'static str {
    "Story Composer API is running!"
}

async fn health_check() -> &'static str {
    "OK"
}

async fn generate_story(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StoryResponse>, AppError> {
    if !is_json_content_type(&headers) {
        return Err(AppError::Internal(format!(
            "unsupported content type: {:?}",
            headers.get(header::CONTENT_TYPE)
        )));
    }

    // Only an object is a request; arrays and scalars are rejected here
    let fields: Map<String, Value> = serde_json::from_slice(&body)
        .map_err(|e| AppError::Internal(format!("invalid request body: {}", e)))?;
    let request = StoryRequest::from(fields);

    let title = request.title();
    let characters = request.characters();
    let story_type = request.story_type();

    tracing::info!(
        "Received request: title={}, characters={}, storyType={}",
        title,
        characters,
        story_type
    );

    let paragraphs =
        services::story::generate_story(&state.model, &title, &characters, &story_type).await;

    Ok(Json(StoryResponse::from(paragraphs)))
}

/// `application/json` or any `application/*+json`, parameters ignored.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(mime) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
    else {
        return false;
    };

    let mime = mime.trim().to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!("Error processing request: handler panicked: {}", detail);
    error::internal_error_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationParams;
    use crate::services::llm::{GenerationError, ModelLoader, TextGenerator};
    use async_trait::async_trait;
    use axum::http::{StatusCode, header};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    enum Behavior {
        Echo,
        Panic,
    }

    struct TestModel(Behavior);

    #[async_trait]
    impl TextGenerator for TestModel {
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GenerationError> {
            match self.0 {
                Behavior::Echo => Ok(format!("{prompt} [done]")),
                Behavior::Panic => panic!("model exploded"),
            }
        }
    }

    struct TestLoader(Option<Behavior>);

    #[async_trait]
    impl ModelLoader for TestLoader {
        fn model_name(&self) -> &str {
            "test"
        }

        async fn load(&self) -> Result<Arc<dyn TextGenerator>, GenerationError> {
            match self.0 {
                Some(Behavior::Echo) => Ok(Arc::new(TestModel(Behavior::Echo))),
                Some(Behavior::Panic) => Ok(Arc::new(TestModel(Behavior::Panic))),
                None => Err(GenerationError::ModelUnavailable {
                    model: "test".to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn test_app(loader: TestLoader) -> Router {
        app(AppState {
            model: Arc::new(LazyModel::new(loader)),
        })
    }

    fn story_request(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/generate_story")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn read_body(response: Response<Body>) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn read_json(response: Response<Body>) -> Value {
        serde_json::from_slice(&read_body(response).await).unwrap()
    }

    fn contents(body: &Value) -> Vec<String> {
        body["pages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|page| {
                assert_eq!(page["type"], "text");
                page["content"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn index_reports_liveness() {
        let response = test_app(TestLoader(None))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, b"Story Composer API is running!");
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let response = test_app(TestLoader(None))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_body(response).await, b"OK");
    }

    #[tokio::test]
    async fn generates_three_pages_from_request_fields() {
        let body = json!({
            "title": "Lost Keys",
            "characters": "Mia and Theo",
            "storyType": "Comedy"
        });
        let response = test_app(TestLoader(Some(Behavior::Echo)))
            .oneshot(story_request(body.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let pages = contents(&read_json(response).await);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].starts_with(
            "Title  Lost Keys\nCharacters  Mia and Theo\nStory Type  Comedy\n\nOnce upon a time, Mia and Theo"
        ));
        assert!(pages[1].starts_with("As the story unfolded in this tale, Mia and Theo"));
        assert!(pages[2].starts_with("In the end"));
        assert!(pages.iter().all(|page| page.ends_with("done")));
    }

    #[tokio::test]
    async fn empty_object_uses_default_fields() {
        let response = test_app(TestLoader(Some(Behavior::Echo)))
            .oneshot(story_request("{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let pages = contents(&read_json(response).await);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].starts_with(
            "Title  Untitled Story\nCharacters  Unknown Characters\nStory Type  General"
        ));
        assert!(pages[2].contains("Unknown Characters found what"));
    }

    #[tokio::test]
    async fn model_load_failure_returns_single_error_page() {
        let response = test_app(TestLoader(None))
            .oneshot(story_request("{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            read_json(response).await,
            json!({"pages": [{"type": "text", "content": "Error: Model failed to load."}]})
        );
    }

    #[tokio::test]
    async fn invalid_json_is_an_internal_error() {
        let response = test_app(TestLoader(Some(Behavior::Echo)))
            .oneshot(story_request("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            read_json(response).await,
            json!({"error": "Internal server error"})
        );
    }

    #[tokio::test]
    async fn non_object_body_is_an_internal_error() {
        for body in ["[]", r#"["Quest","Ann","Epic"]"#, "null", "\"title\"", "7", ""] {
            let response = test_app(TestLoader(Some(Behavior::Echo)))
                .oneshot(story_request(body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "body {body:?}");
        }
    }

    fn story_request_with_content_type(
        content_type: Option<&str>,
        body: &'static str,
    ) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/generate_story");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn non_json_content_type_is_an_internal_error() {
        for content_type in [Some("text/plain"), Some("application/x-www-form-urlencoded"), None] {
            let response = test_app(TestLoader(Some(Behavior::Echo)))
                .oneshot(story_request_with_content_type(content_type, r#"{"title":"T"}"#))
                .await
                .unwrap();

            assert_eq!(
                response.status(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "content type {content_type:?}"
            );
            assert_eq!(
                read_json(response).await,
                json!({"error": "Internal server error"})
            );
        }
    }

    #[tokio::test]
    async fn json_content_type_variants_are_accepted() {
        for content_type in [
            "application/json; charset=utf-8",
            "Application/JSON",
            "application/vnd.story+json",
        ] {
            let response = test_app(TestLoader(Some(Behavior::Echo)))
                .oneshot(story_request_with_content_type(Some(content_type), "{}"))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "content type {content_type}");
        }
    }

    #[tokio::test]
    async fn present_null_field_is_rendered_not_defaulted() {
        let response = test_app(TestLoader(Some(Behavior::Echo)))
            .oneshot(story_request(r#"{"title": null, "characters": ["Ann", "Bo"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let pages = contents(&read_json(response).await);
        assert!(pages[0].starts_with(
            "Title  None\nCharacters    Ann ,  Bo  \nStory Type  General"
        ));
    }

    #[tokio::test]
    async fn panic_during_generation_is_an_internal_error() {
        let response = test_app(TestLoader(Some(Behavior::Panic)))
            .oneshot(story_request("{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            read_json(response).await,
            json!({"error": "Internal server error"})
        );
    }

    #[tokio::test]
    async fn generate_story_rejects_get() {
        let response = test_app(TestLoader(None))
            .oneshot(
                Request::builder()
                    .uri("/generate_story")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let request = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://stories.example")
            .body(Body::empty())
            .unwrap();
        let response = test_app(TestLoader(None)).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
