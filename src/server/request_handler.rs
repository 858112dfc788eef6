use crate::compression::CompressionHandler;
use crate::config::Config;
use crate::logging::{AccessLogger, LogEntry};
use crate::proxy::{ProxyBody, ProxyHandler};
use crate::server::response::{into_proxy_body, ErrorResponse};
use crate::server::routing::{RouteTarget, RoutingTable};
use crate::server::static_files::StaticFileHandler;
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, error, info};
use uuid::Uuid;

/// The fixed per-request pipeline: dispatch, proxy or static (with cache
/// headers and compression), then access logging.
pub struct RequestHandler {
    routing: RoutingTable,
    proxy_handler: ProxyHandler,
    static_handler: Option<StaticFileHandler>,
    compression_handler: Option<CompressionHandler>,
    access_logger: Option<AccessLogger>,
}

impl RequestHandler {
    pub fn new(config: &Config, proxy_handler: ProxyHandler) -> Self {
        let static_handler = config.serve_www.then(|| {
            StaticFileHandler::new(&config.www)
                .with_default_page(config.default_page_name().map(String::from))
                .with_max_age(config.max_age.map(Into::into))
        });

        let routing = RoutingTable::new(
            proxy_handler.routes().iter().map(|route| route.prefix()),
            config.static_prefix(),
        );

        let access_logger = config
            .access_logging
            .then(|| AccessLogger::stdout(config.access_log_format));

        Self {
            routing,
            proxy_handler,
            static_handler,
            compression_handler: config.compress.then(CompressionHandler::default),
            access_logger,
        }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        client_addr: SocketAddr,
    ) -> Result<Response<ProxyBody>, Infallible>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let request_id = Uuid::new_v4();
        let start_time = std::time::Instant::now();

        let method = req.method().clone();
        let uri = req.uri().clone();
        let version = req.version();

        let user_agent = req
            .headers()
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let referer = req
            .headers()
            .get("referer")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let response = self.process_request(req, client_addr, request_id).await;

        let duration = start_time.elapsed();

        info!(
            request_id = %request_id,
            method = %method,
            path = %uri.path(),
            status = %response.status(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );

        if let Some(ref access_logger) = self.access_logger {
            let content_length = response
                .headers()
                .get("content-length")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok());

            let log_entry = LogEntry {
                request_id,
                remote_addr: client_addr.ip().to_string(),
                method: method.to_string(),
                uri: uri.to_string(),
                version: format!("{:?}", version),
                status: response.status().as_u16(),
                response_size: content_length,
                duration_ms: duration.as_secs_f64() * 1000.0,
                user_agent,
                referer,
                timestamp: chrono::Local::now(),
            };

            access_logger.log(&log_entry);
        }

        Ok(response)
    }

    async fn process_request<B>(
        &self,
        req: Request<B>,
        client_addr: SocketAddr,
        request_id: Uuid,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        match self.routing.dispatch(req.uri().path()) {
            Some(RouteTarget::Service(index)) => {
                self.proxy_handler
                    .proxy_request(req, index, client_addr, request_id)
                    .await
            }
            Some(RouteTarget::Static) => self.handle_static_request(&req, request_id).await,
            None => {
                debug!(request_id = %request_id, path = %req.uri().path(), "No route");
                ErrorResponse::not_found().build_boxed()
            }
        }
    }

    async fn handle_static_request<B>(
        &self,
        req: &Request<B>,
        request_id: Uuid,
    ) -> Response<ProxyBody> {
        let static_handler = match self.static_handler {
            Some(ref handler) => handler,
            None => return ErrorResponse::not_found().build_boxed(),
        };

        let result = match static_handler.serve_file(req).await {
            Ok(response) => match self.compression_handler {
                Some(ref compression) => {
                    compression.compress_response(response, req.headers()).await
                }
                None => Ok(response),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => into_proxy_body(response),
            Err(e) => {
                error!(
                    request_id = %request_id,
                    error = %e,
                    "Request processing failed"
                );
                ErrorResponse::internal_server_error().build_boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::TrustManager;
    use clap::Parser;
    use http_body_util::{BodyExt, Empty};
    use hyper::StatusCode;
    use tempfile::TempDir;

    type TestBody = http_body_util::combinators::MapErr<Empty<Bytes>, fn(Infallible) -> hyper::Error>;

    fn empty() -> TestBody {
        fn never(never: Infallible) -> hyper::Error {
            match never {}
        }
        Empty::new().map_err(never as fn(Infallible) -> hyper::Error)
    }

    fn handler(args: &[&str]) -> RequestHandler {
        let config = Config::try_parse_from(args).unwrap();
        let tls = TrustManager::new(&[], false)
            .without_system_roots()
            .build()
            .unwrap();
        RequestHandler::new(&config, ProxyHandler::new(Vec::new(), tls, None))
    }

    fn client_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_static_request_with_default_page() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.html"), "shell").unwrap();
        let www = dir.path().to_str().unwrap();
        let handler = handler(&["kuisp", "--www", www, "--default-page", "/default.html"]);

        let req = Request::builder().uri("/deep/link").body(empty()).unwrap();
        let response = handler.handle_request(req, client_addr()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"shell");
    }

    #[tokio::test]
    async fn test_unmatched_prefix_is_not_found() {
        let dir = TempDir::new().unwrap();
        let www = dir.path().to_str().unwrap();
        let handler = handler(&["kuisp", "--www", www, "--www-prefix", "/static/"]);

        let req = Request::builder().uri("/other").body(empty()).unwrap();
        let response = handler.handle_request(req, client_addr()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_serving_disabled() {
        let handler = handler(&["kuisp", "--serve-www=false"]);
        assert!(handler.routing().is_empty());

        let req = Request::builder().uri("/index.html").body(empty()).unwrap();
        let response = handler.handle_request(req, client_addr()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_compression() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1);\n".repeat(200)).unwrap();
        let www = dir.path().to_str().unwrap();
        let handler = handler(&["kuisp", "--www", www, "--compress", "--max-age", "1h"]);

        let req = Request::builder()
            .uri("/app.js")
            .header("accept-encoding", "gzip")
            .body(empty())
            .unwrap();
        let response = handler.handle_request(req, client_addr()).await.unwrap();

        assert_eq!(response.headers()["content-encoding"], "gzip");
        assert_eq!(
            response.headers()["cache-control"],
            "max-age=3600, public, must-revalidate, proxy-revalidate"
        );
    }
}
