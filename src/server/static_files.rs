use crate::server::response::{ErrorResponse, ResponseBuilder};
use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode};
use mime_guess::MimeGuess;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.html";

pub struct StaticFileHandler {
    root: PathBuf,
    default_page: Option<String>,
    max_age: Option<Duration>,
}

impl StaticFileHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_page: None,
            max_age: None,
        }
    }

    pub fn with_default_page(mut self, default_page: Option<String>) -> Self {
        self.default_page = default_page.filter(|page| !page.is_empty());
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age.filter(|age| !age.is_zero());
        self
    }

    pub async fn serve_file<B>(&self, req: &Request<B>) -> Result<Response<Full<Bytes>>> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(ErrorResponse::method_not_allowed().build());
        }

        let request_path = req.uri().path();
        let sanitized_path = match sanitize_path(request_path) {
            Ok(path) => path,
            Err(e) => {
                debug!("Rejected static path {}: {}", request_path, e);
                return Ok(ErrorResponse::bad_request().build());
            }
        };

        let full_path = self.root.join(&sanitized_path);

        debug!("Serving static file: {}", full_path.display());

        if !self.is_safe_path(&full_path) {
            warn!("Attempted path traversal attack: {}", request_path);
            return Ok(ErrorResponse::forbidden().build());
        }

        let file_path = match fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => match self.find_index_file(&full_path).await {
                Some(index_path) => index_path,
                None => {
                    let dir = format!("{}/", sanitized_path.trim_end_matches('/'));
                    return match self.find_fallback(&dir).await {
                        Some(fallback) => self.serve_single_file(req, &fallback).await,
                        None if self.default_page.is_some() => {
                            Ok(ErrorResponse::not_found().build())
                        }
                        None => Ok(ErrorResponse::forbidden().build()),
                    };
                }
            },
            Ok(_) => full_path,
            Err(_) => match self.find_fallback(&sanitized_path).await {
                Some(fallback) => fallback,
                None => return Ok(ErrorResponse::not_found().build()),
            },
        };

        self.serve_single_file(req, &file_path).await
    }

    async fn serve_single_file<B>(
        &self,
        req: &Request<B>,
        file_path: &Path,
    ) -> Result<Response<Full<Bytes>>> {
        let metadata = match fs::metadata(file_path).await {
            Ok(meta) => meta,
            Err(_) => return Ok(ErrorResponse::not_found().build()),
        };

        if metadata.is_dir() {
            return Ok(ErrorResponse::forbidden().build());
        }

        let mime_type = MimeGuess::from_path(file_path)
            .first()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let etag = generate_etag(&metadata);
        let last_modified = format_last_modified(&metadata);

        if is_not_modified(req, &etag, &metadata) {
            return Ok(self
                .cache_headers(ResponseBuilder::new(StatusCode::NOT_MODIFIED))
                .header_string("etag", etag)
                .header_string("last-modified", last_modified)
                .build());
        }

        let content = match fs::read(file_path).await {
            Ok(content) => Bytes::from(content),
            Err(e) => {
                warn!("Couldn't read {}: {}", file_path.display(), e);
                return Ok(ErrorResponse::internal_server_error().build());
            }
        };
        let content_length = content.len();
        let body = if req.method() == Method::HEAD {
            Bytes::new()
        } else {
            content
        };

        let response = self
            .cache_headers(ResponseBuilder::new(StatusCode::OK))
            .header_string("content-type", mime_type.to_string())
            .header_string("content-length", content_length.to_string())
            .header_string("etag", etag)
            .header_string("last-modified", last_modified)
            .header("accept-ranges", "bytes")
            .body(body)
            .build();

        Ok(response)
    }

    fn cache_headers(&self, builder: ResponseBuilder) -> ResponseBuilder {
        match self.max_age {
            Some(max_age) => builder.header_string("cache-control", cache_control_value(max_age)),
            None => builder,
        }
    }

    fn is_safe_path(&self, requested_path: &Path) -> bool {
        // Missing paths go through the fallback walk, which only joins
        // sanitized segments onto the root.
        let canonical_requested = match requested_path.canonicalize() {
            Ok(path) => path,
            Err(_) => return true,
        };

        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        canonical_requested.starts_with(canonical_root)
    }

    async fn find_index_file(&self, dir_path: &Path) -> Option<PathBuf> {
        let index_path = dir_path.join(INDEX_FILE);
        match fs::metadata(&index_path).await {
            Ok(metadata) if metadata.is_file() => Some(index_path),
            _ => None,
        }
    }

    /// The nearest default page at or above the directory holding `path`.
    async fn find_fallback(&self, path: &str) -> Option<PathBuf> {
        let default_page = self.default_page.as_deref()?;

        for candidate in fallback_candidates(path, default_page) {
            let candidate_path = self.root.join(&candidate);
            if let Ok(metadata) = fs::metadata(&candidate_path).await {
                if !metadata.is_file() {
                    continue;
                }
                if !self.is_safe_path(&candidate_path) {
                    warn!("Skipping default page outside root: {}", candidate_path.display());
                    continue;
                }
                debug!("Falling back to {}", candidate_path.display());
                return Some(candidate_path);
            }
        }
        None
    }
}

/// Candidate default documents for a missing path, nearest first.
///
/// `a/b/missing` with `default.html` yields `a/b/default.html`,
/// `a/default.html`, `default.html`.
pub fn fallback_candidates(path: &str, default_page: &str) -> Vec<String> {
    let mut segments: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .collect();
    let mut candidates = Vec::with_capacity(segments.len());

    while segments.pop().is_some() {
        let dir = segments
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        if dir.is_empty() {
            candidates.push(default_page.to_string());
        } else {
            candidates.push(format!("{}/{}", dir, default_page));
        }
    }

    candidates.dedup();
    candidates
}

pub fn cache_control_value(max_age: Duration) -> String {
    format!(
        "max-age={}, public, must-revalidate, proxy-revalidate",
        max_age.as_secs_f64()
    )
}

fn sanitize_path(path: &str) -> Result<String> {
    let decoded = urlencoding::decode(path).map_err(|_| anyhow::anyhow!("Invalid URL encoding"))?;

    let path = decoded.trim_start_matches('/');

    if path.contains("..") || path.contains('\0') {
        return Err(anyhow::anyhow!("Invalid path"));
    }

    Ok(path.to_string())
}

fn is_not_modified<B>(req: &Request<B>, etag: &str, metadata: &std::fs::Metadata) -> bool {
    if let Some(if_none_match) = req.headers().get("if-none-match") {
        let if_none_match = if_none_match.to_str().unwrap_or("");
        return if_none_match
            .split(',')
            .map(|tag| tag.trim())
            .any(|tag| tag == "*" || tag.trim_start_matches("W/") == etag);
    }

    if let Some(if_modified_since) = req.headers().get("if-modified-since") {
        if let Ok(since_time) = httpdate::parse_http_date(if_modified_since.to_str().unwrap_or(""))
        {
            if let Ok(modified_time) = metadata.modified() {
                // HTTP dates carry whole seconds only
                let modified_secs = modified_time
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let since_secs = since_time
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                return modified_secs <= since_secs;
            }
        }
    }

    false
}

fn generate_etag(metadata: &std::fs::Metadata) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    metadata.len().hash(&mut hasher);
    if let Ok(modified) = metadata.modified() {
        if let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) {
            duration.as_nanos().hash(&mut hasher);
        }
    }
    format!("\"{:x}\"", hasher.finish())
}

fn format_last_modified(metadata: &std::fs::Metadata) -> String {
    match metadata.modified() {
        Ok(time) => httpdate::fmt_http_date(time),
        Err(_) => httpdate::fmt_http_date(std::time::SystemTime::now()),
    }
}
