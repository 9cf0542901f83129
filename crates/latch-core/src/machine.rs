use anyhow::Result;
use latch_common::ProcessMode;
use latch_trust::{ConnectError, TrustStore, UntrustedCertificate};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Aborted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Aborted => "aborted",
        }
    }
}

/// How an established session came to an end without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    Closed,
    /// Shutdown was requested while the session was running.
    Cancelled,
}

/// The chat-protocol session running over a verified connection.
pub trait Session {
    /// Blocks until the peer disconnects, an error occurs, or `shutdown` fires.
    fn run(&mut self, shutdown: &ShutdownSignal) -> Result<SessionEnd>;

    fn disconnect(&mut self) -> Result<()>;
}

/// Establishes connections.
///
/// Implementations must finish certificate verification before returning a
/// session, so that no protocol data is read from an unverified peer.
pub trait Connector {
    type Session: Session;

    fn connect(
        &mut self,
        host: &str,
        port: u16,
        expected_fingerprint: Option<&str>,
    ) -> Result<Self::Session, ConnectError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
    /// Shutdown was requested while waiting for the operator.
    Interrupted,
}

/// Asks an attended operator whether to trust an unknown certificate.
pub trait OperatorPrompt {
    fn confirm_certificate(
        &mut self,
        certificate: &UntrustedCertificate,
        shutdown: &ShutdownSignal,
    ) -> Result<Decision>;
}

/// Why the reconnect loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operator declined to trust the certificate.
    Declined,
    /// Shutdown was requested.
    Cancelled,
    /// Unknown certificate with nobody attending the process.
    Rejected(UntrustedCertificate),
    /// Certificate validation failed in a way retrying will not fix.
    Stalled(String),
    /// An accepted trust decision could not be persisted.
    Failed(String),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Declined | Self::Cancelled => 0,
            Self::Rejected(_) | Self::Failed(_) => 1,
            Self::Stalled(_) => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

enum Step {
    /// Reconnect at once, without waiting out the backoff.
    Retry,
    Backoff,
    Finish(Outcome),
}

type TransitionHook = Box<dyn FnMut(ConnectionState, ConnectionState)>;

/// Drives connection attempts to one server and decides what happens after
/// each one, based on the trust store and the process mode.
pub struct ReconnectMachine<C, P> {
    target: Target,
    mode: ProcessMode,
    store: TrustStore,
    connector: C,
    prompt: P,
    shutdown: ShutdownSignal,
    backoff: Backoff,
    state: ConnectionState,
    on_transition: Option<TransitionHook>,
}

impl<C: Connector, P: OperatorPrompt> ReconnectMachine<C, P> {
    pub fn new(
        target: Target,
        mode: ProcessMode,
        store: TrustStore,
        connector: C,
        prompt: P,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            target,
            mode,
            store,
            connector,
            prompt,
            shutdown,
            backoff: Backoff::default(),
            state: ConnectionState::NotConnected,
            on_transition: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Calls `hook(from, to)` on every state change.
    pub fn with_transition_hook(
        mut self,
        hook: impl FnMut(ConnectionState, ConnectionState) + 'static,
    ) -> Self {
        self.on_transition = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    pub fn run(&mut self) -> Outcome {
        info!(
            host = %self.target.host,
            port = self.target.port,
            mode = self.mode.as_str(),
            "starting connection loop"
        );
        loop {
            if self.shutdown.is_triggered() {
                self.transition(ConnectionState::Aborted);
                return Outcome::Cancelled;
            }

            match self.attempt() {
                Step::Retry => continue,
                Step::Backoff => {
                    let delay = self.backoff.next_delay();
                    debug!(?delay, "waiting before reconnect");
                    if !self.shutdown.sleep(delay) {
                        self.transition(ConnectionState::Aborted);
                        return Outcome::Cancelled;
                    }
                }
                Step::Finish(outcome) => {
                    info!(?outcome, "exiting connection loop");
                    return outcome;
                }
            }
        }
    }

    fn attempt(&mut self) -> Step {
        self.transition(ConnectionState::Connecting);
        let host = self.target.host.clone();
        let expected = self.store.fingerprint_for(&host).map(str::to_string);

        match self
            .connector
            .connect(&host, self.target.port, expected.as_deref())
        {
            Ok(session) => self.drive(session),
            Err(ConnectError::Untrusted(certificate)) => self.on_untrusted(certificate),
            Err(ConnectError::Certificate(reason)) => {
                error!(host = %host, %reason, "certificate validation failed; not retrying");
                self.transition(ConnectionState::NotConnected);
                Step::Finish(Outcome::Stalled(reason))
            }
            Err(ConnectError::Transient(err)) => {
                error!(host = %host, error = ?err, "connection attempt failed");
                self.transition(ConnectionState::NotConnected);
                Step::Backoff
            }
        }
    }

    fn drive(&mut self, mut session: C::Session) -> Step {
        self.transition(ConnectionState::Connected);
        self.backoff.reset();

        match session.run(&self.shutdown) {
            Ok(SessionEnd::Closed) => {
                info!(host = %self.target.host, "server closed the connection");
                self.transition(ConnectionState::NotConnected);
                Step::Backoff
            }
            Ok(SessionEnd::Cancelled) => {
                debug!("shutdown requested; disconnecting");
                if let Err(err) = session.disconnect() {
                    warn!(error = ?err, "disconnect failed");
                }
                self.transition(ConnectionState::Aborted);
                Step::Finish(Outcome::Cancelled)
            }
            Err(err) => {
                error!(host = %self.target.host, error = ?err, "session failed");
                if let Err(err) = session.disconnect() {
                    debug!(error = ?err, "disconnect after failure");
                }
                self.transition(ConnectionState::NotConnected);
                Step::Backoff
            }
        }
    }

    fn on_untrusted(&mut self, certificate: UntrustedCertificate) -> Step {
        if self.mode.is_daemonized() {
            error!(
                host = %certificate.host,
                sha256 = %certificate.short_fingerprint,
                sha512 = %certificate.long_fingerprint,
                "unknown certificate while daemonized; refusing to connect"
            );
            self.transition(ConnectionState::Aborted);
            return Step::Finish(Outcome::Rejected(certificate));
        }

        warn!(host = %certificate.host, "unknown certificate; asking operator");
        let decision = match self.prompt.confirm_certificate(&certificate, &self.shutdown) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = ?err, "no answer from operator; treating as decline");
                Decision::Decline
            }
        };

        match decision {
            Decision::Accept => {
                if let Err(err) = self
                    .store
                    .record(&certificate.host, &certificate.long_fingerprint)
                {
                    error!(error = %err, "failed to persist trust decision");
                    self.transition(ConnectionState::Aborted);
                    return Step::Finish(Outcome::Failed(err.to_string()));
                }
                Step::Retry
            }
            Decision::Decline => {
                info!(host = %certificate.host, "operator declined certificate");
                self.transition(ConnectionState::Aborted);
                Step::Finish(Outcome::Declined)
            }
            Decision::Interrupted => {
                self.transition(ConnectionState::Aborted);
                Step::Finish(Outcome::Cancelled)
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = self.state.as_str(), to = next.as_str(), "state transition");
        if let Some(hook) = self.on_transition.as_mut() {
            hook(self.state, next);
        }
        self.state = next;
    }
}
