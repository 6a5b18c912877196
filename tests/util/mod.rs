use bsp_sync::adt::{AdtSession, CSRF_FETCH_PATH, HttpExchange, HttpRequest, HttpResponse};
use bsp_sync::config::{ConnectionContext, Credentials};
use bsp_sync::error::AdtError;
use bsp_sync::model::ContainerTarget;
use reqwest::Method;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TEST_USER: &str = "DEVELOPER";
pub const TEST_PASSWORD: &str = "s3cr3t-pa55";
pub const TEST_TOKEN: &str = "tok-1";

enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => path == p,
            Self::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

struct Route {
    method: Method,
    path: PathMatch,
    queued: VecDeque<HttpResponse>,
    fallback: Option<HttpResponse>,
}

/// In-memory [`HttpExchange`] that answers from scripted routes and records
/// every request it sees.
///
/// Routes are tried in registration order. Queued responses are served once
/// each before the route's repeating response. Unmatched requests get a 404.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedExchange {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
}

#[allow(dead_code)]
impl ScriptedExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Exchange that already hands out [`TEST_TOKEN`] on the discovery endpoint.
    pub fn with_token() -> Arc<Self> {
        let exchange = Self::new();
        exchange.on(
            Method::GET,
            CSRF_FETCH_PATH,
            HttpResponse::new(200).with_header("x-csrf-token", TEST_TOKEN),
        );
        exchange
    }

    /// Answer every matching request with `response`.
    pub fn on(&self, method: Method, path: &str, response: HttpResponse) {
        self.push(method, PathMatch::Exact(path.to_string()), response);
    }

    /// Answer every request whose path starts with `prefix`.
    pub fn on_prefix(&self, method: Method, prefix: &str, response: HttpResponse) {
        self.push(method, PathMatch::Prefix(prefix.to_string()), response);
    }

    /// Answer the next matching request with `response`, once.
    pub fn once(&self, method: Method, path: &str, response: HttpResponse) {
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes.iter_mut().find(|r| {
            r.method == method && matches!(&r.path, PathMatch::Exact(p) if p == path)
        }) {
            route.queued.push_back(response);
            return;
        }
        routes.push(Route {
            method,
            path: PathMatch::Exact(path.to_string()),
            queued: VecDeque::from([response]),
            fallback: None,
        });
    }

    fn push(&self, method: Method, path: PathMatch, response: HttpResponse) {
        self.routes.lock().unwrap().push(Route {
            method,
            path,
            queued: VecDeque::new(),
            fallback: Some(response),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    pub fn count_prefix(&self, method: Method, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .count()
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let mut routes = self.routes.lock().unwrap();
        for route in routes.iter_mut() {
            if route.method != request.method || !route.path.matches(&request.path) {
                continue;
            }
            if let Some(response) = route.queued.pop_front() {
                return response;
            }
            if let Some(response) = &route.fallback {
                return response.clone();
            }
        }
        HttpResponse::new(404).with_body(format!("no route for {} {}", request.method, request.path))
    }
}

impl HttpExchange for ScriptedExchange {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, AdtError> {
        let response = self.respond(&request);
        self.log.lock().unwrap().push(request);
        Ok(response)
    }
}

#[allow(dead_code)]
pub fn connection() -> ConnectionContext {
    ConnectionContext {
        server: "https://abap.example.com:44300".into(),
        client: Some("100".into()),
        strict_ssl: true,
        timeout: Duration::from_secs(5),
    }
}

#[allow(dead_code)]
pub fn credentials() -> Credentials {
    Credentials {
        user: TEST_USER.into(),
        password: TEST_PASSWORD.into(),
    }
}

#[allow(dead_code)]
pub fn session(exchange: &Arc<ScriptedExchange>) -> AdtSession<Arc<ScriptedExchange>> {
    AdtSession::new(exchange.clone(), &connection(), &credentials()).with_language("EN")
}

#[allow(dead_code)]
pub fn target(package: &str, container: &str) -> ContainerTarget {
    ContainerTarget {
        package: package.into(),
        container: container.into(),
        description: "Sales dashboard".into(),
        language: "EN".into(),
    }
}

/// Temporary build output with the given files (relative path, content).
#[allow(dead_code)]
pub struct ArtifactTree {
    pub dir: TempDir,
    pub files: Vec<PathBuf>,
}

#[allow(dead_code)]
impl ArtifactTree {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let mut paths = Vec::new();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create parent");
            }
            std::fs::write(&path, content).expect("write artifact");
            paths.push(PathBuf::from(*rel));
        }
        Self { dir, files: paths }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn unset(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

struct TestWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
