use crate::{
    config::{Auth, Config, Inspector, Limits, ResponseMode, Root, Scan, Server},
    inspect::{markers::MarkerInspector, DynInspector, InspectError, Project, ProjectInspector},
    server::{build_router, AppState},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::{path::Path, sync::Arc};
use tower::ServiceExt;

const TOKEN: &str = "t0ken";

fn test_config(root: &Path, base_path: &str, response: ResponseMode) -> Config {
    Config {
        root: Root { root_dir: root.to_path_buf() },
        server: Server { bind_addr: "127.0.0.1".into(), port: 0, base_path: base_path.into() },
        auth: Auth { token: TOKEN.into(), allowed_origins: vec!["http://localhost:8888".into()] },
        limits: Limits { global_rps: 1000, global_burst: 1000, token_rps: 1000, token_burst: 1000 },
        scan: Scan { response },
        inspector: Inspector::default(),
    }
}

fn app_with(root: &Path, response: ResponseMode, inspector: DynInspector) -> Router {
    let cfg = test_config(root, "/", response);
    build_router(AppState::new(cfg, inspector).unwrap())
}

fn app(root: &Path, response: ResponseMode) -> Router {
    app_with(root, response, Arc::new(MarkerInspector::with_depth(1)))
}

/// Root laid out as a small Rust crate with a README next to it.
fn project_root() -> assert_fs::TempDir {
    use assert_fs::prelude::*;
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("Cargo.toml").write_str("[package]\nname = \"demo\"\n").unwrap();
    dir.child("README.md").write_str("# demo\n").unwrap();
    dir.child("web/package.json").write_str("{}").unwrap();
    dir.child("empty").create_dir_all().unwrap();
    dir
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .uri(uri)
        .method("GET")
        .header("Authorization", format!("token {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn hello_returns_greeting() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"data": "Hello, world! This is the '/jupyter-projspec/hello' endpoint. Try visiting me in your browser!"})
    );
}

#[tokio::test]
async fn endpoints_require_token() {
    let root = project_root();
    let app = app(root.path(), ResponseMode::Project);
    for uri in ["/jupyter-projspec/hello", "/jupyter-projspec/scan"] {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "unauthorized"}));
    }
    let req = Request::builder().uri(format!("/jupyter-projspec/hello?token={TOKEN}")).body(Body::empty()).unwrap();
    assert_eq!(send(&app, req).await.0, StatusCode::OK);
}

#[tokio::test]
async fn foreign_origin_is_denied() {
    let root = project_root();
    let req = Request::builder()
        .uri("/jupyter-projspec/hello")
        .header("Authorization", format!("Bearer {TOKEN}"))
        .header("Origin", "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app(root.path(), ResponseMode::Project), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "origin denied"}));
}

#[tokio::test]
async fn scan_root_returns_project() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("error").is_none());
    let project = &body["project"];
    assert!(project["specs"].get("rust").is_some());
    assert!(project["children"]["web"]["specs"].get("node").is_some());
    assert_eq!(body.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn scan_empty_path_param_is_root() {
    let root = project_root();
    let app = app(root.path(), ResponseMode::Project);
    let (_, a) = get(&app, "/jupyter-projspec/scan").await;
    let (_, b) = get(&app, "/jupyter-projspec/scan?path=").await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn scan_subdirectory() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=web").await;
    assert_eq!(status, StatusCode::OK);
    let specs = body["project"]["specs"].as_object().unwrap();
    assert_eq!(specs.keys().collect::<Vec<_>>(), vec!["node"]);
}

#[tokio::test]
async fn repeated_path_param_uses_last_value() {
    let root = project_root();
    let app = app(root.path(), ResponseMode::Project);
    let req = Request::builder()
        .uri("/jupyter-projspec/scan?path=web&path=empty")
        .header("Authorization", format!("token {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["project"]["specs"], json!({}));
    assert!(body["project"]["url"].as_str().unwrap().ends_with("empty"));
}

#[tokio::test]
async fn repeated_token_param_uses_last_value() {
    let root = project_root();
    let app = app(root.path(), ResponseMode::Project);
    let ok = Request::builder()
        .uri(format!("/jupyter-projspec/hello?token=x&token={TOKEN}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, ok).await.0, StatusCode::OK);
    let denied = Request::builder()
        .uri(format!("/jupyter-projspec/hello?token={TOKEN}&token=y"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, denied).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "unauthorized"}));
}

#[tokio::test]
async fn scan_traversal_is_forbidden() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=../etc").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "Access denied: path outside server root"}));
}

#[tokio::test]
async fn scan_missing_echoes_requested_path() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=missing-dir").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Path does not exist: missing-dir"}));
}

#[tokio::test]
async fn scan_file_is_bad_request() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=README.md").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Path is not a directory: README.md"}));
}

#[cfg(unix)]
#[tokio::test]
async fn scan_symlink_out_of_root_is_forbidden() {
    let outside = tempfile::tempdir().unwrap();
    let root = project_root();
    std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();
    let (status, _) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=escape").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn html_mode_renders_project() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Html), "/jupyter-projspec/scan").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("project").is_none());
    assert!(body["html"].as_str().unwrap().contains("<strong>rust</strong>"));
}

#[tokio::test]
async fn html_mode_empty_dir_says_no_project() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Html), "/jupyter-projspec/scan?path=empty").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["html"], json!(crate::inspect::html::NO_PROJECT_HTML));
}

#[tokio::test]
async fn project_mode_empty_dir_has_empty_specs() {
    let root = project_root();
    let (status, body) = get(&app(root.path(), ResponseMode::Project), "/jupyter-projspec/scan?path=empty").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project"]["specs"], json!({}));
}

#[tokio::test]
async fn repeated_scans_match() {
    let root = project_root();
    let app = app(root.path(), ResponseMode::Project);
    let first = get(&app, "/jupyter-projspec/scan").await;
    let second = get(&app, "/jupyter-projspec/scan").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn routes_live_under_base_path() {
    let root = project_root();
    let cfg = test_config(root.path(), "/user/alice/", ResponseMode::Project);
    let app = build_router(AppState::new(cfg, Arc::new(MarkerInspector::with_depth(0))).unwrap());
    let (status, _) = get(&app, "/user/alice/jupyter-projspec/hello").await;
    assert_eq!(status, StatusCode::OK);
    let req = Request::builder()
        .uri("/jupyter-projspec/hello")
        .header("Authorization", format!("token {TOKEN}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rate_limited_after_burst() {
    let root = project_root();
    let mut cfg = test_config(root.path(), "/", ResponseMode::Project);
    cfg.limits = Limits { global_rps: 1, global_burst: 1, token_rps: 1000, token_burst: 1000 };
    let app = build_router(AppState::new(cfg, Arc::new(MarkerInspector::with_depth(0))).unwrap());
    assert_eq!(get(&app, "/jupyter-projspec/hello").await.0, StatusCode::OK);
    let (status, body) = get(&app, "/jupyter-projspec/hello").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"error": "rate limited"}));
}

struct Faulty;

#[async_trait]
impl ProjectInspector for Faulty {
    fn name(&self) -> &'static str { "faulty" }
    async fn scan(&self, _path: &Path) -> Result<Project, InspectError> {
        Err(InspectError::Task("manifest exploded".into()))
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

#[tokio::test]
async fn inspector_fault_is_500_and_logged() {
    let logs = Capture::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let root = project_root();
    let app = app_with(root.path(), ResponseMode::Project, Arc::new(Faulty));
    let (status, body) = get(&app, "/jupyter-projspec/scan").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Error scanning directory: inspector task failed: manifest exploded"}));

    let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(out.contains("ERROR"));
    assert!(out.contains("manifest exploded"));
    let canon = dunce::canonicalize(root.path()).unwrap();
    assert!(out.contains(&canon.display().to_string()));
}

struct Panicky;

#[async_trait]
impl ProjectInspector for Panicky {
    fn name(&self) -> &'static str { "panicky" }
    async fn scan(&self, _path: &Path) -> Result<Project, InspectError> {
        tokio::task::spawn_blocking(|| -> Result<Project, InspectError> { panic!("walker bug") })
            .await
            .map_err(|e| InspectError::Task(e.to_string()))?
    }
}

#[tokio::test]
async fn inspector_panic_is_contained() {
    let root = project_root();
    let app = app_with(root.path(), ResponseMode::Html, Arc::new(Panicky));
    let (status, body) = get(&app, "/jupyter-projspec/scan").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().starts_with("Error scanning directory: "));
}

#[tokio::test]
async fn serves_over_tcp() {
    let root = project_root();
    let state = AppState::new(
        test_config(root.path(), "/", ResponseMode::Project),
        Arc::new(MarkerInspector::with_depth(1)),
    )
    .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(crate::server::serve_on(listener, state));

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://{addr}/jupyter-projspec/scan"))
        .query(&[("path", "web")])
        .header("Authorization", format!("token {TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert!(body["project"]["specs"].get("node").is_some());
}

mod props {
    use crate::paths::{normalize_lexical, resolve, PathError};
    use proptest::prelude::*;
    use std::path::{Component, Path};

    fn segments() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(vec!["..", ".", "a", "b", "project"]), 0..8)
    }

    proptest! {
        #[test]
        fn normalized_absolute_paths_have_no_dot_segments(segs in segments()) {
            let p = Path::new("/srv/project").join(segs.join("/"));
            let n = normalize_lexical(&p);
            prop_assert!(n.is_absolute());
            prop_assert!(n.components().all(|c| !matches!(c, Component::CurDir | Component::ParentDir)));
        }

        #[test]
        fn escaping_requests_are_outside_root(segs in segments()) {
            let root = Path::new("/srv/project");
            let rel = segs.join("/");
            let escapes = !normalize_lexical(&root.join(&rel)).starts_with(root);
            if escapes {
                prop_assert_eq!(resolve(root, &rel), Err(PathError::OutsideRoot));
            }
        }
    }

    #[cfg(feature = "proptests")]
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn existing_descendant_files_are_not_directories(segs in prop::collection::vec("[a-z]{1,6}", 1..4)) {
            let tmp = tempfile::tempdir().unwrap();
            let root = dunce::canonicalize(tmp.path()).unwrap();
            let rel = segs.join("/");
            let file = root.join(&rel);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, b"x").unwrap();
            prop_assert_eq!(resolve(&root, &rel), Err(PathError::NotADirectory(rel.clone())));
        }
    }
}
