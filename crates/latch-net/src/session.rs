use std::io::{self, ErrorKind, Read, Write};

use anyhow::{Context, Result};
use latch_common::LatchConfig;
use latch_core::{Session, SessionEnd, ShutdownSignal};
use tracing::{debug, info};

use crate::transport::Transport;

const READ_CHUNK: usize = 4096;
const MAX_LINE: usize = 64 * 1024;

/// Lines sent while bringing a session up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Sent as soon as the connection is established.
    pub greeting: Vec<String>,
    /// Sent once the server has welcomed us.
    pub on_welcome: Vec<String>,
}

impl Registration {
    pub fn from_config(config: &LatchConfig) -> Self {
        let mut greeting = Vec::new();
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            greeting.push(format!("PASS {password}"));
        }
        greeting.push(format!("NICK {}", config.nickname));
        greeting.push(format!("USER {0} 0 * :{0}", config.nickname));

        let on_welcome = config
            .channels
            .iter()
            .map(|channel| channel.trim())
            .filter(|channel| !channel.is_empty())
            .map(|channel| format!("JOIN {channel}"))
            .collect();

        Self {
            greeting,
            on_welcome,
        }
    }
}

enum Inbound {
    Line(String),
    Idle,
    Eof,
}

/// Line-oriented chat session over an already verified transport.
///
/// Only keeps the connection alive: registers, joins channels after the
/// welcome reply and answers `PING`. Everything else is logged.
pub struct LineSession {
    host: String,
    transport: Transport,
    registration: Registration,
    buffer: Vec<u8>,
}

impl LineSession {
    pub(crate) fn new(host: &str, transport: Transport, registration: Registration) -> Self {
        Self {
            host: host.to_string(),
            transport,
            registration,
            buffer: Vec::new(),
        }
    }

    fn send(&mut self, line: &str) -> Result<()> {
        self.transport
            .write_all(format!("{line}\r\n").as_bytes())
            .and_then(|()| self.transport.flush())
            .with_context(|| format!("failed to write to {}", self.host))
    }

    fn next_line(&mut self) -> Result<Inbound> {
        if let Some(line) = take_line(&mut self.buffer) {
            return Ok(Inbound::Line(line));
        }

        let mut chunk = [0_u8; READ_CHUNK];
        match self.transport.read(&mut chunk) {
            Ok(0) => Ok(Inbound::Eof),
            Ok(read) => {
                self.buffer.extend_from_slice(&chunk[..read]);
                if self.buffer.len() > MAX_LINE && !self.buffer.contains(&b'\n') {
                    anyhow::bail!("{} sent a line longer than {MAX_LINE} bytes", self.host);
                }
                Ok(take_line(&mut self.buffer).map_or(Inbound::Idle, Inbound::Line))
            }
            Err(err) if is_idle(&err) => Ok(Inbound::Idle),
            Err(err) => Err(err).with_context(|| format!("failed to read from {}", self.host)),
        }
    }

    fn handle(&mut self, line: &str) -> Result<()> {
        let (command, params) = split_command(line);
        match command {
            "PING" => self.send(&format!("PONG {params}")),
            "001" => {
                info!(host = %self.host, "registered with server");
                for line in self.registration.on_welcome.clone() {
                    self.send(&line)?;
                }
                Ok(())
            }
            _ => {
                debug!(host = %self.host, line, "inbound");
                Ok(())
            }
        }
    }
}

impl Session for LineSession {
    fn run(&mut self, shutdown: &ShutdownSignal) -> Result<SessionEnd> {
        for line in self.registration.greeting.clone() {
            self.send(&line)?;
        }

        loop {
            if shutdown.is_triggered() {
                return Ok(SessionEnd::Cancelled);
            }
            match self.next_line()? {
                Inbound::Line(line) => self.handle(&line)?,
                Inbound::Idle => {}
                Inbound::Eof => return Ok(SessionEnd::Closed),
            }
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        // Best effort; the peer may already be gone.
        let _ = self.send("QUIT");
        self.transport
            .close()
            .with_context(|| format!("failed to close connection to {}", self.host))
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.iter().position(|b| *b == b'\n')?;
    let raw: Vec<u8> = buffer.drain(..=end).collect();
    let text = String::from_utf8_lossy(&raw);
    Some(text.trim_end_matches(['\r', '\n']).to_string())
}

/// Splits `[:prefix] COMMAND params` into the command and the rest.
fn split_command(line: &str) -> (&str, &str) {
    let line = match line.strip_prefix(':') {
        Some(rest) => rest.split_once(' ').map_or("", |(_, tail)| tail),
        None => line,
    };
    line.split_once(' ').unwrap_or((line, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_complete_lines_only() {
        let mut buffer = b"PING :a\r\nPART".to_vec();
        assert_eq!(take_line(&mut buffer).as_deref(), Some("PING :a"));
        assert_eq!(take_line(&mut buffer), None);
        assert_eq!(buffer, b"PART");
    }

    #[test]
    fn splits_prefixed_and_bare_commands() {
        assert_eq!(split_command("PING :token"), ("PING", ":token"));
        assert_eq!(
            split_command(":irc.example.net 001 latch :Welcome"),
            ("001", "latch :Welcome")
        );
        assert_eq!(split_command("QUIT"), ("QUIT", ""));
    }

    #[test]
    fn registration_joins_after_welcome() {
        let config = LatchConfig {
            nickname: "latch".to_string(),
            password: Some("hunter2".to_string()),
            channels: vec!["#rust".to_string(), " ".to_string(), "#ops key".to_string()],
            ..LatchConfig::default()
        };
        let registration = Registration::from_config(&config);
        assert_eq!(
            registration.greeting,
            vec!["PASS hunter2", "NICK latch", "USER latch 0 * :latch"]
        );
        assert_eq!(registration.on_welcome, vec!["JOIN #rust", "JOIN #ops key"]);
    }
}
