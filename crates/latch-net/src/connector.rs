use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use latch_common::LatchConfig;
use latch_core::Connector;
use latch_trust::verifier::{self, PinningVerifier};
use latch_trust::{ConnectError, UntrustedCertificate};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Error as TlsError, RootCertStore, StreamOwned};
use tracing::debug;

use crate::session::{LineSession, Registration};
use crate::transport::Transport;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Read timeout while a session runs; bounds how long shutdown goes unnoticed.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opens TCP connections and, when TLS is enabled, completes the handshake
/// against the pinned fingerprint before handing out a session.
pub struct NetConnector {
    use_tls: bool,
    ca_roots: Option<RootCertStore>,
    provider: Arc<CryptoProvider>,
    registration: Registration,
}

impl NetConnector {
    pub fn new(use_tls: bool, registration: Registration) -> Self {
        Self {
            use_tls,
            ca_roots: None,
            provider: verifier::default_provider(),
            registration,
        }
    }

    pub fn from_config(config: &LatchConfig) -> Result<Self> {
        let mut connector = Self::new(config.use_tls, Registration::from_config(config));
        if let Some(path) = &config.ca_certs {
            connector.ca_roots = Some(verifier::load_ca_roots(path)?);
        }
        Ok(connector)
    }

    fn handshake(
        &self,
        host: &str,
        tcp: TcpStream,
        expected_fingerprint: Option<&str>,
    ) -> Result<StreamOwned<ClientConnection, TcpStream>, ConnectError> {
        let mut pinning = PinningVerifier::new(expected_fingerprint, self.provider.clone());
        if let Some(roots) = &self.ca_roots {
            pinning = pinning
                .with_ca_roots(roots.clone())
                .map_err(|err| ConnectError::Certificate(format!("{err:#}")))?;
        }
        let pinning = Arc::new(pinning);
        let config = verifier::client_config(pinning.clone())
            .map_err(|err| ConnectError::Certificate(format!("{err:#}")))?;
        let server_name = ServerName::try_from(host.to_string()).map_err(|err| {
            ConnectError::Certificate(format!("invalid server name {host}: {err}"))
        })?;
        let mut conn = ClientConnection::new(Arc::new(config), server_name)
            .context("failed to start TLS session")?;

        let mut tcp = tcp;
        while conn.is_handshaking() {
            if let Err(err) = conn.complete_io(&mut tcp) {
                return Err(classify_handshake_error(host, &pinning, err));
            }
        }
        // The client's Finished may still be queued.
        while conn.wants_write() {
            conn.write_tls(&mut tcp)
                .context("failed to flush TLS handshake")?;
        }
        debug!(host, "TLS handshake complete");
        Ok(StreamOwned::new(conn, tcp))
    }
}

impl Connector for NetConnector {
    type Session = LineSession;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        expected_fingerprint: Option<&str>,
    ) -> Result<LineSession, ConnectError> {
        let tcp = TcpStream::connect((host, port))
            .with_context(|| format!("failed to connect to {host}:{port}"))?;
        tcp.set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .context("failed to set handshake timeout")?;

        let transport = if self.use_tls {
            let stream = self.handshake(host, tcp, expected_fingerprint)?;
            stream
                .sock
                .set_read_timeout(Some(POLL_INTERVAL))
                .context("failed to set read timeout")?;
            Transport::Tls(Box::new(stream))
        } else {
            tcp.set_read_timeout(Some(POLL_INTERVAL))
                .context("failed to set read timeout")?;
            Transport::Plain(tcp)
        };

        Ok(LineSession::new(host, transport, self.registration.clone()))
    }
}

fn classify_handshake_error(
    host: &str,
    pinning: &PinningVerifier,
    err: io::Error,
) -> ConnectError {
    if let Some(presented) = pinning.take_rejected() {
        return ConnectError::Untrusted(UntrustedCertificate::new(host, presented));
    }
    let invalid_certificate = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TlsError>())
        .filter(|tls| matches!(tls, TlsError::InvalidCertificate(_)))
        .map(ToString::to_string);
    if let Some(reason) = invalid_certificate {
        return ConnectError::Certificate(format!("{host}: {reason}"));
    }
    ConnectError::Transient(
        anyhow::Error::new(err).context(format!("TLS handshake with {host} failed")),
    )
}
