//! TLS transport for the IMAP session (implicit TLS, port 993).

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::{debug, info};

use crate::config::{AccountConfig, PerformanceConfig};
use crate::error::{MailError, Result};
use crate::imap::session::Session;

/// A TLS-wrapped TCP stream.
pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Build a rustls `ClientConfig` using Mozilla's bundled root certificates.
fn tls_client_config() -> Arc<ClientConfig> {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Arc::new(config)
}

/// Open a TCP connection, trying each resolved address in turn.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let connect_err = |source| MailError::Connect {
        host: host.to_string(),
        port,
        source,
    };

    let addrs = (host, port).to_socket_addrs().map_err(connect_err)?;
    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "host resolved to no addresses",
    );
    for addr in addrs {
        debug!(%addr, "Connecting");
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(connect_err(last_err))
}

/// Connect to the account's server over TLS and consume the greeting.
///
/// The returned session is not yet authenticated.
pub fn connect(account: &AccountConfig, perf: &PerformanceConfig) -> Result<Session<TlsStream>> {
    let timeout = Duration::from_secs(perf.connect_timeout_secs);
    let tcp = connect_tcp(&account.host, account.port, timeout)?;
    tcp.set_read_timeout(Some(Duration::from_secs(perf.read_timeout_secs)))
        .map_err(MailError::Transport)?;

    let server_name = ServerName::try_from(account.host.clone()).map_err(|e| MailError::Tls {
        host: account.host.clone(),
        reason: format!("invalid server name: {e}"),
    })?;
    let conn = ClientConnection::new(tls_client_config(), server_name).map_err(|e| {
        MailError::Tls {
            host: account.host.clone(),
            reason: e.to_string(),
        }
    })?;

    let mut session = Session::new(StreamOwned::new(conn, tcp), perf.max_literal_size);
    session.read_greeting()?;
    info!(host = %account.host, port = account.port, "Connected");
    Ok(session)
}
