//! HTTP routes for the registry

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use xreg_core::{Target, WriteOptions};
use xreg_storage::StorageBackend;

use crate::error::{ServiceError, ServiceResult};
use crate::service::{Action, RegistryService};

/// Maximum request body size (1MB)
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Shared router state
pub struct AppState<S: StorageBackend + ?Sized> {
    service: Arc<RegistryService<S>>,
    auth_token: Option<String>,
}

/// Auth middleware - validates Bearer token if configured
async fn auth_middleware<S: StorageBackend + ?Sized + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let Some(expected_token) = &state.auth_token else {
        return next.run(request).await;
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(token) if token == expected_token => next.run(request).await,
        Some(_) => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        )
            .into_response(),
    }
}

/// Build the registry router
pub fn create_router<S: StorageBackend + ?Sized + 'static>(
    service: Arc<RegistryService<S>>,
    auth_token: Option<String>,
) -> Router {
    let state = Arc::new(AppState {
        service,
        auth_token,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::LOCATION]);

    let registry = get(registry_handler::<S>)
        .put(registry_handler::<S>)
        .patch(registry_handler::<S>)
        .post(registry_handler::<S>)
        .delete(registry_handler::<S>);

    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/", registry.clone())
        .route("/*path", registry)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<S>,
        ))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
}

async fn health_handler<S: StorageBackend + ?Sized + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let healthy = state.service.health_check().await.unwrap_or(false);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "unavailable" },
            "server": "xreg",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Query parameters understood by the registry routes
#[derive(Debug, Default)]
struct RequestParams {
    inline: Vec<String>,
    filter: Vec<String>,
    opts: WriteOptions,
}

impl RequestParams {
    fn from_pairs(pairs: Vec<(String, String)>) -> ServiceResult<Self> {
        let mut params = Self::default();
        for (name, value) in pairs {
            match name.as_str() {
                "inline" => params.inline.push(value),
                "filter" => params.filter.push(value),
                "epoch" => {
                    let epoch = value.parse().map_err(|_| {
                        ServiceError::BadRequest(format!("epoch must be an integer, not {:?}", value))
                    })?;
                    params.opts = params.opts.with_epoch(epoch);
                }
                "setlatestversionid" => params.opts = params.opts.with_set_latest(value),
                _ => {}
            }
        }
        Ok(params)
    }
}

fn parse_body(body: &Bytes) -> ServiceResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid JSON body: {}", e)))
}

async fn registry_handler<S: StorageBackend + ?Sized + 'static>(
    State(state): State<Arc<AppState<S>>>,
    method: Method,
    uri: Uri,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ServiceResult<Response> {
    let service = &state.service;
    let target = Target::parse(uri.path(), service.model())?;
    let params = RequestParams::from_pairs(pairs)?;
    tracing::debug!("{} {}", method, target);

    let action = match method {
        Method::GET => {
            let value = service.get(&target, &params.inline, &params.filter).await?;
            return Ok(Json(value).into_response());
        }
        Method::PUT => Action::Put,
        Method::PATCH => Action::Patch,
        Method::POST => Action::Post,
        Method::DELETE => Action::Delete,
        other => {
            return Err(ServiceError::MethodNotAllowed {
                method: other.to_string(),
                target: target.to_string(),
            })
        }
    };

    let body = match action {
        Action::Delete => Value::Null,
        _ => parse_body(&body)?,
    };
    let reply = service.write(action, &target, body, params.opts).await?;

    let Some(body) = reply.body else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let status = if reply.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut response = (status, Json(body)).into_response();
    if let Some(location) = reply.location.and_then(|l| HeaderValue::from_str(&l).ok()) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;
    use tower::ServiceExt;
    use xreg_core::{GroupModel, Model, ResourceModel};
    use xreg_storage::MemoryStorage;

    fn router(auth_token: Option<&str>) -> Router {
        let model = Model::new().with_group(
            GroupModel::new("endpoints", "endpoint")
                .with_resource(ResourceModel::new("messages", "message")),
        );
        let service = RegistryService::new(Arc::new(MemoryStorage::new()), model)
            .with_base_url("http://test");
        create_router(Arc::new(service), auth_token.map(str::to_string))
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Option<Value>) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).ok();
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(Some("secret"));
        let (status, body) = send(&app, request(Method::GET, "/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_auth_required_when_configured() {
        let app = router(Some("secret"));
        let (status, _) = send(&app, request(Method::GET, "/", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_resource_lifecycle_over_http() {
        let app = router(None);

        let req = request(
            Method::PUT,
            "/endpoints/e1/messages/m1",
            Some(json!({"format": "v1"})),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://test/endpoints/e1/messages/m1"
        );

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                "/endpoints/e1/messages/m1",
                Some(json!({"format": "v2"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.unwrap()["versionid"], json!("2"));

        let (status, body) = send(
            &app,
            request(Method::GET, "/endpoints/e1/messages/m1?inline=versions", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["format"], json!("v2"));
        assert_eq!(body["versions"]["1"]["islatest"], json!(false));
        assert_eq!(body["versions"]["2"]["islatest"], json!(true));

        let (status, _) = send(
            &app,
            request(
                Method::DELETE,
                "/endpoints/e1/messages/m1/versions/2?setlatestversionid=1",
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, request(Method::GET, "/endpoints/e1/messages/m1/meta", None)).await;
        assert_eq!(
            body.unwrap()["latestversionurl"],
            json!("http://test/endpoints/e1/messages/m1/versions/1")
        );
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = router(None);

        let (status, _) = send(&app, request(Method::GET, "/nope", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request(Method::GET, "/endpoints/e1", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, request(Method::PUT, "/endpoints/e1", Some(json!({})))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, request(Method::PUT, "/endpoints/e1?epoch=5", Some(json!({})))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.unwrap()["status"], json!(409));

        let (status, _) = send(&app, request(Method::GET, "/?epoch=x", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, request(Method::GET, "/?filter=endpoints..x", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method(Method::PUT)
            .uri("/endpoints/e2")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, request(Method::DELETE, "/", None)).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_model_and_capabilities() {
        let app = router(None);
        let (status, body) = send(&app, request(Method::GET, "/model", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.unwrap()["groups"]["endpoints"].is_object());

        let (status, body) = send(&app, request(Method::GET, "/capabilities", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.unwrap()["flags"].as_array().unwrap().contains(&json!("filter")));
    }

    #[tokio::test]
    async fn test_filtered_collection() {
        let app = router(None);
        let body = json!({"e1": {"name": "alpha"}, "e2": {"name": "beta"}});
        let (status, _) = send(&app, request(Method::POST, "/endpoints", Some(body))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, request(Method::GET, "/endpoints?filter=name=alpha", None)).await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert!(body.get("e1").is_some());
        assert!(body.get("e2").is_none());
    }
}
