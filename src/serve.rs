//! Static file server for the published output tree.
//!
//! Serves `output_dir` with the caching policy content hashing enables:
//!
//! | File | `Cache-Control` |
//! |------|-----------------|
//! | hashed name (`logo.0a1b2c3d4e.png`) | `public, max-age=31536000, immutable` |
//! | HTML page | `no-cache` |
//! | anything else | `public, max-age=3600` |
//!
//! Every response carries a fixed set of security headers. Only `GET` and
//! `HEAD` are accepted. Requests are handled on rayon's pool.

use crate::config::SiteConfig;
use crate::hash::is_hashed_name;
use crate::pipeline::BuildStatus;
use std::fs;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

pub const IMMUTABLE: &str = "public, max-age=31536000, immutable";
pub const NO_CACHE: &str = "no-cache";
pub const SHORT_LIVED: &str = "public, max-age=3600";

/// Headers added to every response.
pub const SECURITY_HEADERS: [(&str, &str); 4] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "SAMEORIGIN"),
    ("Referrer-Policy", "no-referrer"),
    ("X-DNS-Prefetch-Control", "off"),
];

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("cannot listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Body = Response<Cursor<Vec<u8>>>;

/// Port to listen on: a valid `PORT` value wins over the configured one.
pub fn effective_port(configured: u16, env_port: Option<&str>) -> u16 {
    env_port
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(configured)
}

/// Normalize URL: decode, strip query string, trim slashes
fn normalize_url(url: &str) -> String {
    use percent_encoding::percent_decode_str;
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();
    decoded.trim_matches('/').to_string()
}

/// Resolve a request URL to a file under `root`, mapping directories to
/// their `index.html`. Traversal outside `root` yields `None`.
pub fn resolve_path(url: &str, root: &Path) -> Option<PathBuf> {
    let clean = normalize_url(url);
    if clean.split('/').any(|seg| seg == "..") || clean.contains('\\') {
        return None;
    }

    let canonical = root.join(&clean).canonicalize().ok()?;
    let root_canonical = root.canonicalize().ok()?;
    if !canonical.starts_with(&root_canonical) {
        return None;
    }

    if canonical.is_file() {
        return Some(canonical);
    }
    let index = canonical.join("index.html");
    index.is_file().then_some(index)
}

pub fn cache_control(path: &Path) -> &'static str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if is_hashed_name(name) {
        IMMUTABLE
    } else if content_type(path).starts_with("text/html") {
        NO_CACHE
    } else {
        SHORT_LIVED
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("webmanifest") => "application/manifest+json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn with_headers(mut response: Body, headers: &[(&str, &str)]) -> Body {
    for (key, value) in headers.iter().chain(SECURITY_HEADERS.iter()) {
        if let Ok(header) = Header::from_bytes(key.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    response
}

fn file_response(path: &Path, status: u16) -> Result<Body, ServeError> {
    let body = fs::read(path)?;
    Ok(with_headers(
        Response::from_data(body).with_status_code(StatusCode(status)),
        &[
            ("Content-Type", content_type(path)),
            ("Cache-Control", cache_control(path)),
        ],
    ))
}

fn not_found(root: &Path) -> Result<Body, ServeError> {
    let custom = root.join("404.html");
    if custom.is_file() {
        return file_response(&custom, 404);
    }
    Ok(with_headers(
        Response::from_string("404 Not Found").with_status_code(StatusCode(404)),
        &[("Content-Type", "text/plain; charset=utf-8")],
    ))
}

/// Build the response for one request. `HEAD` bodies are dropped by
/// `tiny_http` itself.
fn respond_to(method: &Method, url: &str, root: &Path) -> Result<Body, ServeError> {
    if !matches!(method, Method::Get | Method::Head) {
        return Ok(with_headers(
            Response::from_string("405 Method Not Allowed").with_status_code(StatusCode(405)),
            &[
                ("Allow", "GET, HEAD"),
                ("Content-Type", "text/plain; charset=utf-8"),
            ],
        ));
    }
    match resolve_path(url, root) {
        Some(path) => file_response(&path, 200),
        None => not_found(root),
    }
}

fn handle(request: Request, root: &Path) -> Result<(), ServeError> {
    let response = respond_to(request.method(), request.url(), root)?;
    tracing::debug!(method = %request.method(), url = %request.url(), status = response.status_code().0, "request");
    request.respond(response)?;
    Ok(())
}

/// Bind the listening socket without serving yet.
pub fn bind(interface: &str, port: u16) -> Result<(Server, SocketAddr), ServeError> {
    let addr = format!("{interface}:{port}");
    let server = Server::http(&addr).map_err(|e| ServeError::Bind {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;
    let bound = server.server_addr().to_ip().ok_or_else(|| ServeError::Bind {
        addr,
        reason: "not an IP listener".into(),
    })?;
    Ok((server, bound))
}

fn warn_on_incomplete_build(temp_dir: &Path) {
    match BuildStatus::load(temp_dir) {
        Ok(Some(status)) if status.success => {}
        Ok(Some(status)) => tracing::warn!(
            failed_stage = status.failed_stage.as_deref().unwrap_or("-"),
            "last build did not complete, serving partial output"
        ),
        Ok(None) => tracing::warn!("no build recorded, run `revsite build` first"),
        Err(e) => tracing::warn!(error = %e, "cannot read build status"),
    }
}

/// Serve `output_dir` until the process is stopped.
pub fn serve(config: &SiteConfig) -> Result<(), ServeError> {
    warn_on_incomplete_build(&config.temp_dir);

    let port = effective_port(config.serve.port, std::env::var("PORT").ok().as_deref());
    let (server, addr) = bind(&config.serve.interface, port)?;
    println!("Serving {} at http://{}", config.output_dir.display(), addr);

    for request in server.incoming_requests() {
        let root = config.output_dir.clone();
        rayon::spawn(move || {
            if let Err(e) = handle(request, &root) {
                tracing::warn!(error = %e, "request failed");
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("img")).unwrap();
        fs::create_dir_all(tmp.path().join("blog")).unwrap();
        fs::write(tmp.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(tmp.path().join("blog/index.html"), "<h1>blog</h1>").unwrap();
        fs::write(tmp.path().join("img/logo.0a1b2c3d4e.png"), "png").unwrap();
        tmp
    }

    fn body_of(response: Body) -> Vec<u8> {
        let mut out = Vec::new();
        response.into_reader().read_to_end(&mut out).unwrap();
        out
    }

    fn header<'a>(response: &'a Body, name: &str) -> Option<&'a str> {
        response
            .headers()
            .iter()
            .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    #[test]
    fn port_env_overrides_config() {
        assert_eq!(effective_port(8083, None), 8083);
        assert_eq!(effective_port(8083, Some("9000")), 9000);
        assert_eq!(effective_port(8083, Some("nope")), 8083);
    }

    #[test]
    fn resolves_files_and_directories() {
        let tmp = site();
        let root = tmp.path();
        let canon = root.canonicalize().unwrap();
        assert_eq!(resolve_path("/", root), Some(canon.join("index.html")));
        assert_eq!(resolve_path("/blog/", root), Some(canon.join("blog/index.html")));
        assert_eq!(resolve_path("/blog?page=2", root), Some(canon.join("blog/index.html")));
        assert_eq!(
            resolve_path("/img/logo.0a1b2c3d4e.png", root),
            Some(canon.join("img/logo.0a1b2c3d4e.png"))
        );
        assert_eq!(resolve_path("/missing.html", root), None);
    }

    #[test]
    fn rejects_traversal() {
        let tmp = site();
        let root = tmp.path().join("blog");
        assert_eq!(resolve_path("/../index.html", &root), None);
        assert_eq!(resolve_path("/%2e%2e/index.html", &root), None);
    }

    #[test]
    fn cache_policy_by_name() {
        assert_eq!(cache_control(Path::new("img/logo.0a1b2c3d4e.png")), IMMUTABLE);
        assert_eq!(cache_control(Path::new("css/main.abcdef.css")), IMMUTABLE);
        assert_eq!(cache_control(Path::new("index.html")), NO_CACHE);
        assert_eq!(cache_control(Path::new("robots.txt")), SHORT_LIVED);
        assert_eq!(cache_control(Path::new("img/logo.png")), SHORT_LIVED);
    }

    #[test]
    fn get_serves_with_policy_and_security_headers() {
        let tmp = site();
        let response = respond_to(&Method::Get, "/img/logo.0a1b2c3d4e.png", tmp.path()).unwrap();
        assert_eq!(response.status_code().0, 200);
        assert_eq!(header(&response, "Cache-Control"), Some(IMMUTABLE));
        assert_eq!(header(&response, "Content-Type"), Some("image/png"));
        for (name, value) in SECURITY_HEADERS {
            assert_eq!(header(&response, name), Some(value));
        }
        assert_eq!(body_of(response), b"png");
    }

    #[test]
    fn post_is_rejected() {
        let tmp = site();
        let response = respond_to(&Method::Post, "/", tmp.path()).unwrap();
        assert_eq!(response.status_code().0, 405);
        assert_eq!(header(&response, "Allow"), Some("GET, HEAD"));
    }

    #[test]
    fn missing_page_uses_custom_404() {
        let tmp = site();
        let plain = respond_to(&Method::Get, "/nope", tmp.path()).unwrap();
        assert_eq!(plain.status_code().0, 404);
        assert_eq!(body_of(plain), b"404 Not Found");

        fs::write(tmp.path().join("404.html"), "<h1>lost</h1>").unwrap();
        let custom = respond_to(&Method::Get, "/nope", tmp.path()).unwrap();
        assert_eq!(custom.status_code().0, 404);
        assert_eq!(header(&custom, "Cache-Control"), Some(NO_CACHE));
        assert_eq!(body_of(custom), b"<h1>lost</h1>");
    }

    #[test]
    fn serves_over_http() {
        let tmp = site();
        let (server, addr) = bind("127.0.0.1", 0).unwrap();
        let root = tmp.path().to_path_buf();
        let worker = std::thread::spawn(move || {
            let request = server.recv().unwrap();
            handle(request, &root).unwrap();
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /blog/ HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).unwrap();
        worker.join().unwrap();

        assert!(raw.starts_with("HTTP/1.1 200"));
        assert!(raw.contains("no-cache"));
        assert!(raw.contains("nosniff"));
        assert!(raw.ends_with("<h1>blog</h1>"));
    }
}
