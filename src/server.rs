use crate::{
    config::Config,
    errors::AppError,
    inspect::{self, DynInspector},
    paths, security,
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::{path::PathBuf, sync::Arc, time::Instant};
use tower_http::trace::TraceLayer;

pub const EXTENSION: &str = "jupyter-projspec";

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    /// Canonicalized once at startup; every scan is resolved against it.
    pub root: Arc<PathBuf>,
    pub inspector: DynInspector,
    pub rls: security::RateLimiters,
}

impl AppState {
    pub fn new(cfg: Config, inspector: DynInspector) -> anyhow::Result<Self> {
        let root = crate::config::canonical_root(&cfg.root.root_dir)?;
        let l = &cfg.limits;
        let rls = security::RateLimiters::new(l.global_rps, l.global_burst, l.token_rps, l.token_burst);
        Ok(Self { cfg: Arc::new(cfg), root: Arc::new(root), inspector, rls })
    }
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr =
        format!("{}:{}", state.cfg.server.bind_addr, state.cfg.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Join URL path pieces with single slashes, always rooted.
pub fn url_path_join(parts: &[&str]) -> String {
    let segs: Vec<&str> = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segs.join("/"))
}

pub fn build_router(state: AppState) -> Router {
    let base = state.cfg.server.base_path.clone();
    Router::new()
        .route(&url_path_join(&[&base, EXTENSION, "hello"]), get(hello))
        .route(&url_path_join(&[&base, EXTENSION, "scan"]), get(scan))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

/// Query parameters of a request. A repeated key keeps its last value.
#[derive(Debug, Default)]
pub struct ScanQuery {
    pub path: String,
    pub token: Option<String>,
}

impl ScanQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let last = |key: &str| pairs.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        Self { path: last("path").unwrap_or_default(), token: last("token") }
    }
}

fn parse_query(query: QueryPairs) -> Result<ScanQuery, AppError> {
    let Query(pairs) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(ScanQuery::from_pairs(&pairs))
}

async fn hello(State(state): State<AppState>, headers: HeaderMap, query: QueryPairs) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let checked = parse_query(query).and_then(|q| authorize(&state, &headers, q.token.as_deref()));
    if let Err(e) = checked {
        audit(&request_id, "hello", "", "deny", e.code(), e.status(), started);
        return e.into_response();
    }
    audit(&request_id, "hello", "", "allow", "OK", StatusCode::OK, started);
    let data = format!(
        "Hello, world! This is the '/{EXTENSION}/hello' endpoint. Try visiting me in your browser!"
    );
    (StatusCode::OK, Json(json!({ "data": data }))).into_response()
}

async fn scan(State(state): State<AppState>, headers: HeaderMap, query: QueryPairs) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let q = match parse_query(query) {
        Ok(q) => q,
        Err(e) => {
            audit(&request_id, "scan", "", "deny", e.code(), e.status(), started);
            return e.into_response();
        }
    };
    match scan_inner(&state, &headers, &q).await {
        Ok(payload) => {
            audit(&request_id, "scan", &q.path, "allow", "OK", StatusCode::OK, started);
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(e) => {
            let decision = match e {
                AppError::InspectionFailure(_) => "error",
                _ => "deny",
            };
            audit(&request_id, "scan", &q.path, decision, e.code(), e.status(), started);
            e.into_response()
        }
    }
}

async fn scan_inner(state: &AppState, headers: &HeaderMap, q: &ScanQuery) -> Result<inspect::ScanPayload, AppError> {
    authorize(state, headers, q.token.as_deref())?;
    let resolved = paths::resolve(&state.root, &q.path)?;
    inspect::inspect(state.inspector.as_ref(), &resolved, state.cfg.scan.response).await
}

fn authorize(state: &AppState, headers: &HeaderMap, query_token: Option<&str>) -> Result<(), AppError> {
    let token = security::extract_token(headers, query_token);
    security::require_token(token.as_deref(), &state.cfg.auth.token)?;
    security::check_origin(headers, &state.cfg.auth.allowed_origins)?;
    state.rls.check(token.as_deref())?;
    Ok(())
}

fn audit(request_id: &str, route: &str, path: &str, decision: &str, code: &str, status: StatusCode, started: Instant) {
    tracing::info!(
        request_id = request_id,
        route = route,
        path = path,
        decision = decision,
        code = code,
        status = status.as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "audit"
    );
}
