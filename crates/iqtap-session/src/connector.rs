use iqtap_transport::{TransportOptions, WsTransport};
use tokio::time::{timeout_at, Instant};

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionConfig};

/// Open a WebSocket session to `address`.
///
/// The connect timeout covers both the transport connect and the
/// authentication that [`Session::run`] performs first.
pub async fn connect(
    address: &str,
    options: &TransportOptions,
    config: SessionConfig,
) -> Result<Session<WsTransport>> {
    let deadline = Instant::now() + config.connect_timeout;
    let transport = match timeout_at(deadline, WsTransport::connect(address, options)).await {
        Ok(result) => result?,
        Err(_) => return Err(SessionError::ConnectTimeout(config.connect_timeout)),
    };
    Ok(Session::new(transport, config).with_connect_deadline(deadline))
}
