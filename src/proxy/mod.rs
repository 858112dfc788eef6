use crate::error::ForwardingError;
use crate::registry::ServiceMapping;
use crate::resolver::ResolvedHost;
use crate::server::response::ErrorResponse;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, HOST, UPGRADE};
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode, Uri, Version};
use rustls::ClientConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub mod client;
pub mod tls;
pub mod token;
pub mod upgrade;


pub use client::{create_http_client, HttpClient, ProxyBody};
pub use tls::TrustManager;
pub use token::BearerToken;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Everything needed to forward requests under one service prefix, fixed at
/// startup.
#[derive(Debug, Clone)]
pub struct ServiceRoute {
    prefix: String,
    scheme: String,
    backend: ResolvedHost,
    target_path: String,
    target_query: String,
}

impl ServiceRoute {
    pub fn new(mapping: &ServiceMapping, backend: ResolvedHost) -> Self {
        Self {
            prefix: mapping.prefix.clone(),
            scheme: mapping.target.scheme().to_string(),
            backend,
            target_path: mapping.target.path().to_string(),
            target_query: mapping.target.query().unwrap_or_default().to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &ResolvedHost {
        &self.backend
    }

    /// The path the backend sees: the route prefix stripped from the request
    /// path and the remainder joined onto the target's path.
    pub fn backend_path(&self, request_path: &str) -> String {
        let remainder = request_path
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(request_path);
        single_joining_slash(&self.target_path, remainder)
    }

    pub fn backend_uri(&self, uri: &Uri) -> Result<Uri, ForwardingError> {
        let mut target = format!(
            "{}://{}{}",
            self.scheme,
            self.backend.authority(),
            self.backend_path(uri.path())
        );

        let query = merge_query(&self.target_query, uri.query().unwrap_or_default());
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }

        target
            .parse::<Uri>()
            .map_err(|source| ForwardingError::InvalidUri {
                uri: target.clone(),
                source,
            })
    }
}

impl ForwardingError {
    pub fn to_response(&self) -> Response<ProxyBody> {
        match self {
            ForwardingError::InvalidUri { .. } => ErrorResponse::bad_request().build_boxed(),
            ForwardingError::Upstream(_) => ErrorResponse::bad_gateway().build_boxed(),
        }
    }
}

pub struct ProxyHandler {
    routes: Vec<ServiceRoute>,
    client: HttpClient,
    bearer_token: Option<BearerToken>,
}

impl ProxyHandler {
    pub fn new(
        routes: Vec<ServiceRoute>,
        tls_config: Arc<ClientConfig>,
        bearer_token: Option<BearerToken>,
    ) -> Self {
        Self {
            routes,
            client: create_http_client(tls_config),
            bearer_token,
        }
    }

    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    pub async fn proxy_request<B>(
        &self,
        mut req: Request<B>,
        route_index: usize,
        client_addr: SocketAddr,
        request_id: Uuid,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let route = match self.routes.get(route_index) {
            Some(route) => route,
            None => return ErrorResponse::not_found().build_boxed(),
        };

        let client_upgrade = upgrade::is_upgrade_request(req.headers())
            .then(|| hyper::upgrade::on(&mut req));

        let outbound = match self.prepare_request(route, req.map(|b| b.boxed()), client_addr) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Couldn't rewrite request");
                return e.to_response();
            }
        };

        debug!(
            request_id = %request_id,
            prefix = %route.prefix,
            backend = %outbound.uri(),
            "Forwarding request"
        );

        match self.client.request(outbound).await {
            Ok(response) => self.finish_response(response, client_upgrade, request_id),
            Err(e) => {
                let e = ForwardingError::from(e);
                error!(
                    request_id = %request_id,
                    backend = %route.backend,
                    error = %e,
                    "Proxy request failed"
                );
                e.to_response()
            }
        }
    }

    /// Rewrites an inbound request for the route's backend: URI, version,
    /// hop-by-hop headers, `X-Forwarded-For` and the bearer token.
    ///
    /// The client's `Host` is kept. HTTP/2 requests carry it as the URI
    /// authority, which is copied into the header when none is present.
    pub fn prepare_request<B>(
        &self,
        route: &ServiceRoute,
        mut req: Request<B>,
        client_addr: SocketAddr,
    ) -> Result<Request<B>, ForwardingError> {
        let upgrade_to = upgrade::is_upgrade_request(req.headers())
            .then(|| req.headers().get(UPGRADE).cloned())
            .flatten();

        let inbound_host = req
            .uri()
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok());
        let uri = route.backend_uri(req.uri())?;

        *req.uri_mut() = uri;
        *req.version_mut() = Version::HTTP_11;

        let headers = req.headers_mut();
        remove_hop_by_hop_headers(headers);

        if let Some(protocol) = upgrade_to {
            headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
            headers.insert(UPGRADE, protocol);
        }

        if !headers.contains_key(HOST) {
            if let Some(host) = inbound_host {
                headers.insert(HOST, host);
            }
        }

        append_forwarded_for(headers, client_addr.ip());

        if let Some(token) = &self.bearer_token {
            token.inject(headers);
        }

        Ok(req)
    }

    fn finish_response(
        &self,
        mut response: Response<Incoming>,
        client_upgrade: Option<OnUpgrade>,
        request_id: Uuid,
    ) -> Response<ProxyBody> {
        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            match client_upgrade {
                Some(client) => {
                    let backend = hyper::upgrade::on(&mut response);
                    upgrade::spawn_tunnel(client, backend, request_id);
                }
                None => {
                    warn!(request_id = %request_id, "Backend switched protocols without an upgrade request");
                    return ErrorResponse::bad_gateway().build_boxed();
                }
            }
        } else {
            remove_hop_by_hop_headers(response.headers_mut());
        }

        response.map(|b| b.boxed())
    }
}

/// Joins two path fragments with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    format!("{}/{}", a, b)
}

/// `target&request` when both are present, otherwise whichever is non-empty.
pub fn merge_query(target: &str, request: &str) -> String {
    match (target.is_empty(), request.is_empty()) {
        (false, false) => format!("{}&{}", target, request),
        (true, _) => request.to_string(),
        (false, true) => target.to_string(),
    }
}

pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.trim().is_empty() => format!("{}, {}", prior, ip),
        _ => ip.to_string(),
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
