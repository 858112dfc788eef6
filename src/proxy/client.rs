use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use std::sync::Arc;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

/// Creates the pooled client every service route forwards through.
///
/// Backends are spoken to over HTTP/1.1 so that upgrade handshakes can be
/// passed through, with or without TLS depending on the target scheme.
pub fn create_http_client(tls_config: Arc<ClientConfig>) -> HttpClient {
    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_nodelay(true);

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config((*tls_config).clone())
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new()).build(https_connector)
}
