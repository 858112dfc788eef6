use hyper::header::{HeaderMap, CONNECTION, UPGRADE};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tracing::debug;
use uuid::Uuid;

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_upgrade_connection = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    has_upgrade_connection && headers.contains_key(UPGRADE)
}

/// Waits for both sides of a `101 Switching Protocols` exchange to hand over
/// their connections, then copies bytes until either side closes.
pub fn spawn_tunnel(client: OnUpgrade, backend: OnUpgrade, request_id: Uuid) {
    tokio::spawn(async move {
        let (client, backend) = match tokio::try_join!(client, backend) {
            Ok(pair) => pair,
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Upgrade failed");
                return;
            }
        };

        let mut client_io = TokioIo::new(client);
        let mut backend_io = TokioIo::new(backend);

        match tokio::io::copy_bidirectional(&mut client_io, &mut backend_io).await {
            Ok((client_to_backend, backend_to_client)) => {
                debug!(
                    request_id = %request_id,
                    client_to_backend,
                    backend_to_client,
                    "Upgraded connection closed"
                );
            }
            Err(e) => {
                debug!(request_id = %request_id, error = %e, "Upgraded connection closed with error");
            }
        }
    });
}
