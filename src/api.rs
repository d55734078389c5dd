//! REST routing for the Todo viewset.
//!
//! `/api/todoinfo/` is the collection (list, create) and
//! `/api/todoinfo/{id}/` the detail (retrieve, update, partial update,
//! destroy). Paths without the trailing slash are served by the same
//! handlers. `/api/` lists the registered resources.

use std::{
    error::Error,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{get, MethodRouter},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    database::Database,
    error::ApiError,
    model::{Todo, TodoPayload},
};

pub const PREFIX: &str = "/api";
pub const RESOURCE: &str = "todoinfo";

const COLLECTION_ALLOW: &str = "GET, POST, HEAD";
const DETAIL_ALLOW: &str = "GET, PUT, PATCH, DELETE, HEAD";
const ROOT_ALLOW: &str = "GET, HEAD";

#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Database>>,
}

impl AppState {
    pub fn new(db: Database) -> AppState {
        AppState {
            db: Arc::new(Mutex::new(db)),
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    let root: MethodRouter<AppState> = get(api_root).fallback(|method: Method| async move {
        ApiError::MethodNotAllowed {
            method,
            allow: ROOT_ALLOW,
        }
    });
    let collection: MethodRouter<AppState> = get(list_todos)
        .post(create_todo)
        .fallback(|method: Method| async move {
            ApiError::MethodNotAllowed {
                method,
                allow: COLLECTION_ALLOW,
            }
        });
    let detail: MethodRouter<AppState> = get(retrieve_todo)
        .put(update_todo)
        .patch(partial_update_todo)
        .delete(destroy_todo)
        .fallback(|method: Method| async move {
            ApiError::MethodNotAllowed {
                method,
                allow: DETAIL_ALLOW,
            }
        });

    let collection_path = format!("{PREFIX}/{RESOURCE}");
    let detail_path = format!("{PREFIX}/{RESOURCE}/:id");

    Router::new()
        .route(&format!("{PREFIX}/"), root.clone())
        .route(PREFIX, root)
        .route(&format!("{collection_path}/"), collection.clone())
        .route(&collection_path, collection)
        .route(&format!("{detail_path}/"), detail.clone())
        .route(&detail_path, detail)
        .fallback(|| async { ApiError::RouteNotFound })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(db: Database, addr: SocketAddr) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "serving {PREFIX}/{RESOURCE}/");
    axum::serve(listener, router(AppState::new(db)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

/// Non-numeric ids cannot match a row, so they are a plain not-found.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::TodoNotFound)
}

/// Reads a JSON request body. An empty body is an empty object so that a
/// bare POST reports missing fields rather than a parse error.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let mime = content_type.split(';').next().unwrap_or("").trim();
    if !(mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")) {
        return Err(ApiError::UnsupportedMediaType(content_type.to_string()));
    }
    serde_json::from_slice(body).map_err(|err| ApiError::Parse(err.to_string()))
}

async fn api_root(headers: HeaderMap) -> Json<Value> {
    let url = match headers.get(header::HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => format!("http://{host}{PREFIX}/{RESOURCE}/"),
        None => format!("{PREFIX}/{RESOURCE}/"),
    };
    Json(json!({ RESOURCE: url }))
}

async fn list_todos(State(state): State<AppState>) -> Result<Json<Vec<Todo>>, ApiError> {
    let todos = state.db()?.fetch_todos()?;
    Ok(Json(todos))
}

async fn create_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Todo>), ApiError> {
    let payload = parse_body(&headers, &body)?;
    let new_todo = TodoPayload::create(&payload)?;
    let todo = state.db()?.add_todo(&new_todo)?;
    info!(id = todo.id, "created todo");
    Ok((StatusCode::CREATED, Json(todo)))
}

async fn retrieve_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Todo>, ApiError> {
    let id = parse_id(&id)?;
    let todo = state.db()?.fetch_todo(id)?.ok_or(ApiError::TodoNotFound)?;
    Ok(Json(todo))
}

async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Todo>, ApiError> {
    save(&state, &id, &headers, &body, false)
}

async fn partial_update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Todo>, ApiError> {
    save(&state, &id, &headers, &body, true)
}

/// Looks the todo up before validating, so an unknown id is a 404 whatever
/// the body holds.
fn save(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
    body: &Bytes,
    partial: bool,
) -> Result<Json<Todo>, ApiError> {
    let id = parse_id(id)?;
    let mut db = state.db()?;
    if db.fetch_todo(id)?.is_none() {
        return Err(ApiError::TodoNotFound);
    }
    let payload = parse_body(headers, body)?;
    let changes = TodoPayload::update(&payload, partial)?;
    let todo = db.update_todo(id, &changes)?.ok_or(ApiError::TodoNotFound)?;
    info!(id, partial, "updated todo");
    Ok(Json(todo))
}

async fn destroy_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    if state.db()?.delete_todo(id)? {
        info!(id, "deleted todo");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::TodoNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers
    }

    #[test]
    fn empty_bodies_read_as_empty_objects() {
        let value = parse_body(&HeaderMap::new(), &Bytes::new()).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn bodies_must_be_json() {
        let body = Bytes::from_static(b"title=milk");
        assert!(matches!(
            parse_body(&HeaderMap::new(), &body),
            Err(ApiError::UnsupportedMediaType(kind)) if kind.is_empty()
        ));
        assert!(matches!(
            parse_body(&json_headers(), &Bytes::from_static(b"{\"title\":")),
            Err(ApiError::Parse(_))
        ));
        assert_eq!(
            parse_body(&json_headers(), &Bytes::from_static(b"{\"title\":\"milk\"}")).unwrap(),
            json!({"title": "milk"})
        );
    }

    #[test]
    fn ids_must_be_integers() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert!(matches!(parse_id("twelve"), Err(ApiError::TodoNotFound)));
    }
}
