use std::io::{self, BufRead, Write};

use anyhow::{Result, bail};
use latch_core::{Decision, OperatorPrompt, ShutdownSignal};
use latch_trust::UntrustedCertificate;

/// Asks on the controlling terminal. Waits as long as it takes; only
/// shutdown ends the wait early.
pub struct TerminalPrompt;

impl OperatorPrompt for TerminalPrompt {
    fn confirm_certificate(
        &mut self,
        certificate: &UntrustedCertificate,
        shutdown: &ShutdownSignal,
    ) -> Result<Decision> {
        println!(
            "It seems as if you connect to {} for the first time, or its certificate changed.",
            certificate.host
        );
        println!("Please verify these cryptographic hashes manually:\n");
        println!("SHA-512: {}", certificate.long_fingerprint);
        println!("SHA-256: {}\n", certificate.short_fingerprint);
        print!("Do you want to add the host to the list of known hosts and connect (y/n)? ");
        io::stdout().flush()?;

        if !wait_for_input(shutdown)? {
            println!();
            return Ok(Decision::Interrupted);
        }
        let mut input = String::new();
        let bytes = io::stdin().lock().read_line(&mut input)?;
        if bytes == 0 {
            bail!("stdin closed while waiting for a trust decision");
        }
        Ok(parse_decision(&input))
    }
}

/// Only an explicit yes trusts the certificate.
pub fn parse_decision(input: &str) -> Decision {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Decline,
    }
}

/// Returns `false` if shutdown was requested before stdin became readable.
#[cfg(unix)]
fn wait_for_input(shutdown: &ShutdownSignal) -> Result<bool> {
    use std::os::fd::AsFd;

    use anyhow::Context;
    use nix::errno::Errno;
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    let stdin = io::stdin();
    loop {
        if shutdown.is_triggered() {
            return Ok(false);
        }
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(200_u16)) {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => return Ok(true),
            Err(err) => return Err(err).context("failed to wait for operator input"),
        }
    }
}

#[cfg(not(unix))]
fn wait_for_input(shutdown: &ShutdownSignal) -> Result<bool> {
    Ok(!shutdown.is_triggered())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_accepts() {
        assert_eq!(parse_decision("y\n"), Decision::Accept);
        assert_eq!(parse_decision(" YES "), Decision::Accept);
        assert_eq!(parse_decision("n\n"), Decision::Decline);
        assert_eq!(parse_decision("\n"), Decision::Decline);
        assert_eq!(parse_decision("yep"), Decision::Decline);
        assert_eq!(parse_decision("ja"), Decision::Decline);
    }
}
