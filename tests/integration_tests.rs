use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONNECTION, UPGRADE};
use hyper::server::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use kuisp::env::ProcessEnv;
use kuisp::error::{ConfigParseError, StartupError};
use kuisp::proxy::TrustManager;
use kuisp::resolver::SystemDns;
use kuisp::server::TlsManager;
use kuisp::{Config, Gateway, HttpServer};
use std::convert::Infallible;
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn echo_backend(mut req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.headers().contains_key(UPGRADE) {
        let on_upgrade = hyper::upgrade::on(&mut req);
        tokio::spawn(async move {
            if let Ok(upgraded) = on_upgrade.await {
                let mut io = TokioIo::new(upgraded);
                let mut buf = [0u8; 4];
                if io.read_exact(&mut buf).await.is_ok() {
                    let _ = io.write_all(&buf).await;
                }
            }
        });

        let response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "upgrade")
            .header(UPGRADE, "echo")
            .body(Full::default())
            .unwrap();
        return Ok(response);
    }

    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };

    let body = format!(
        "path={}\nquery={}\nauth={}\nforwarded={}\n",
        req.uri().path(),
        req.uri().query().unwrap_or(""),
        header(AUTHORIZATION.as_str()),
        header("x-forwarded-for"),
    );
    Ok(Response::new(Full::new(Bytes::from(body))))
}

async fn start_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(stream),
                        hyper::service::service_fn(echo_backend),
                    )
                    .with_upgrades()
                    .await;
            });
        }
    });

    addr
}

struct TlsBackend {
    addr: SocketAddr,
    ca_pem: std::path::PathBuf,
    _dir: TempDir,
}

/// An echo backend behind a certificate for `127.0.0.1` issued by a private CA.
async fn start_tls_backend() -> TlsBackend {
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    let leaf_key = KeyPair::generate().unwrap();
    let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

    let dir = TempDir::new().unwrap();
    let ca_pem = dir.path().join("ca.pem");
    let cert_pem = dir.path().join("cert.pem");
    let key_pem = dir.path().join("key.pem");
    std::fs::write(&ca_pem, ca_cert.pem()).unwrap();
    std::fs::write(&cert_pem, leaf_cert.pem()).unwrap();
    std::fs::write(&key_pem, leaf_key.serialize_pem()).unwrap();

    let tls = TlsManager::new(Some(cert_pem.as_path()), Some(key_pem.as_path())).unwrap();
    let acceptor = tls.get_acceptor().unwrap().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls_stream) = acceptor.accept(stream).await else {
                    return;
                };
                let _ = http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(tls_stream),
                        hyper::service::service_fn(echo_backend),
                    )
                    .await;
            });
        }
    });

    TlsBackend {
        addr,
        ca_pem,
        _dir: dir,
    }
}

async fn start_proxy(args: &[String]) -> SocketAddr {
    let mut argv = vec!["kuisp".to_string()];
    argv.extend_from_slice(args);
    let config = Config::try_parse_from(argv).unwrap();
    config.validate().unwrap();

    let trust =
        TrustManager::new(&config.ca_certs, config.skip_cert_validation).without_system_roots();
    let gateway = Gateway::prepare_with(&config, &ProcessEnv, &SystemDns, trust).unwrap();
    let handler = gateway.into_request_handler(&config);

    let listener = HttpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(handler, TlsManager::disabled());
    tokio::spawn(async move { server.serve(listener).await });

    addr
}

async fn get(addr: SocketAddr, path: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
    let client: Client<_, Empty<Bytes>> = Client::builder(TokioExecutor::new()).build_http();

    let mut req = Request::builder().uri(format!("http://{}{}", addr, path));
    for (name, value) in headers {
        req = req.header(*name, *value);
    }

    let response = client.request(req.body(Empty::new()).unwrap()).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_prefix_stripped_and_query_merged() {
    let backend = start_backend().await;
    let www = TempDir::new().unwrap();
    let proxy = start_proxy(&args(&[
        "--www",
        www.path().to_str().unwrap(),
        "-s",
        &format!("/api/=http://{}/base?a=1", backend),
    ]))
    .await;

    let (status, body) = get(proxy, "/api/users/42?b=2", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("path=/base/users/42\n"), "{}", body);
    assert!(body.contains("query=a=1&b=2\n"), "{}", body);
    assert!(body.contains("auth=-\n"), "{}", body);
    assert!(body.contains("forwarded=127.0.0.1\n"), "{}", body);
}

#[tokio::test]
async fn test_bearer_token_injected_unless_present() {
    let backend = start_backend().await;
    let dir = TempDir::new().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "secret-token\n").unwrap();

    let proxy = start_proxy(&args(&[
        "--serve-www=false",
        "--bearer-token-file",
        token_path.to_str().unwrap(),
        "-s",
        &format!("/svc/=http://{}", backend),
    ]))
    .await;

    let (_, body) = get(proxy, "/svc/x", &[]).await;
    assert!(body.contains("auth=Bearer secret-token\n"), "{}", body);

    let (_, body) = get(proxy, "/svc/x", &[("authorization", "Basic xyz")]).await;
    assert!(body.contains("auth=Basic xyz\n"), "{}", body);
}

#[tokio::test]
async fn test_static_fallback_and_service_side_by_side() {
    let backend = start_backend().await;
    let www = TempDir::new().unwrap();
    std::fs::write(www.path().join("default.html"), "<html>app</html>").unwrap();

    let proxy = start_proxy(&args(&[
        "--www",
        www.path().to_str().unwrap(),
        "--default-page",
        "default.html",
        "--max-age",
        "10m",
        "-s",
        &format!("/api/=http://{}", backend),
    ]))
    .await;

    let (status, body) = get(proxy, "/a/b/missing", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<html>app</html>");

    let (status, body) = get(proxy, "/api/ping", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("path=/ping\n"), "{}", body);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = unused.local_addr().unwrap();
    drop(unused);

    let proxy = start_proxy(&args(&[
        "--serve-www=false",
        "-s",
        &format!("/down/=http://{}", dead),
    ]))
    .await;

    let (status, _) = get(proxy, "/down/anything", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _) = get(proxy, "/elsewhere", &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upgrade_is_tunnelled() {
    let backend = start_backend().await;
    let proxy = start_proxy(&args(&[
        "--serve-www=false",
        "-s",
        &format!("/ws/=http://{}", backend),
    ]))
    .await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(
            b"GET /ws/socket HTTP/1.1\r\nHost: proxy\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "{}", head);

    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");
}

#[tokio::test]
async fn test_https_backend_trusted_through_extra_ca() {
    let backend = start_tls_backend().await;
    let service = format!("/secure/=https://{}", backend.addr);

    let proxy = start_proxy(&args(&[
        "--serve-www=false",
        "--ca-cert",
        backend.ca_pem.to_str().unwrap(),
        "-s",
        &service,
    ]))
    .await;
    let (status, body) = get(proxy, "/secure/x", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("path=/x\n"), "{}", body);

    let proxy = start_proxy(&args(&["--serve-www=false", "-s", &service])).await;
    let (status, _) = get(proxy, "/secure/x", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let proxy = start_proxy(&args(&[
        "--serve-www=false",
        "--skip-cert-validation",
        "-s",
        &service,
    ]))
    .await;
    let (status, body) = get(proxy, "/secure/x", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("path=/x\n"), "{}", body);
}

#[test]
fn test_malformed_declaration_stops_startup() {
    let config = Config::try_parse_from(["kuisp", "-s", "onlyoneside"]).unwrap();
    let trust = TrustManager::new(&[], false).without_system_roots();

    let result = Gateway::prepare_with(&config, &ProcessEnv, &SystemDns, trust);
    assert!(matches!(
        result,
        Err(StartupError::ConfigParse(ConfigParseError::InvalidServiceDefinition(_)))
    ));
}
