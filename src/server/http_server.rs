use crate::server::http2::Http2Handler;
use crate::server::request_handler::RequestHandler;
use crate::server::tls::TlsManager;
use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
#[cfg(unix)]
use signal_hook_tokio::Signals;

pub struct HttpServer {
    handler: Arc<RequestHandler>,
    tls_manager: TlsManager,
}

impl HttpServer {
    pub fn new(handler: RequestHandler, tls_manager: TlsManager) -> Self {
        Self {
            handler: Arc::new(handler),
            tls_manager,
        }
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))
    }

    /// Binds, then serves until SIGTERM, SIGINT or SIGQUIT.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = Self::bind(addr).await?;

        tokio::select! {
            result = self.serve(listener) => result?,
            result = wait_for_signal() => {
                result?;
                info!("Received shutdown signal, stopping server");
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Accepts connections on an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let scheme = if self.tls_manager.is_enabled() {
            "https"
        } else {
            "http"
        };
        info!("Listening on {}://{}", scheme, local_addr);

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let handler = self.handler.clone();
            let tls_manager = self.tls_manager.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, handler, tls_manager).await {
                    debug!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        tls_manager: TlsManager,
    ) -> Result<()> {
        stream.set_nodelay(true)?;

        let acceptor = match tls_manager.get_acceptor() {
            Some(acceptor) => acceptor,
            None => return Self::serve_http1(stream, addr, handler).await,
        };

        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(|e| anyhow::anyhow!("TLS handshake failed: {}", e))?;

        let alpn = tls_stream.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
        match alpn.as_deref() {
            Some(b"h2") => {
                debug!("Negotiated HTTP/2 for connection from {}", addr);
                Http2Handler::new(handler)
                    .handle_connection(tls_stream, addr)
                    .await
            }
            Some(b"http/1.1") | None => {
                Self::serve_http1(tls_stream, addr, handler).await
            }
            Some(protocol) => {
                warn!(
                    "Unsupported ALPN protocol: {:?}",
                    String::from_utf8_lossy(protocol)
                );
                Err(anyhow::anyhow!("Unsupported ALPN protocol"))
            }
        }
    }

    async fn serve_http1<S>(
        stream: S,
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let service = hyper::service::service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { handler.handle_request(req, addr).await }
        });

        http1::Builder::new()
            .keep_alive(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP connection error: {}", e))?;

        Ok(())
    }
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])
            .context("Failed to register signal handlers")?;

        if let Some(signal) = signals.next().await {
            info!("Received signal {}, shutting down", signal);
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        info!("Received Ctrl-C, shutting down");
    }

    Ok(())
}
