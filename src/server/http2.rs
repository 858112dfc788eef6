use crate::server::request_handler::RequestHandler;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Serves connections that negotiated `h2` through ALPN.
pub struct Http2Handler {
    request_handler: Arc<RequestHandler>,
}

impl Http2Handler {
    pub fn new(request_handler: Arc<RequestHandler>) -> Self {
        Self { request_handler }
    }

    pub async fn handle_connection<S>(&self, stream: S, client_addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!("HTTP/2 connection established from {}", client_addr);

        let handler = self.request_handler.clone();
        let service = hyper::service::service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { handler.handle_request(req, client_addr).await }
        });

        http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service)
            .await
            .map_err(|e| anyhow::anyhow!("HTTP/2 connection error: {}", e))?;

        debug!("HTTP/2 connection closed for {}", client_addr);
        Ok(())
    }
}
