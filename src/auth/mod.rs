//! Authentication — validates the admin (sudo) password before a configure run
//!
//! The provisioning scripts need root. The password is checked with
//! `sudo -S -k -v` before any script runs so a typo fails fast instead of
//! halfway through provisioning.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Given a secret, reports whether it is valid
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, password: &str) -> bool;
}

/// Checks the password against sudo for the current user
pub struct SudoValidator;

/// Reject passwords that cannot be fed to sudo on one stdin line
fn acceptable(password: &str) -> bool {
    !password.is_empty() && !password.contains(['\n', '\r', '\0'])
}

#[async_trait]
impl CredentialValidator for SudoValidator {
    async fn validate(&self, password: &str) -> bool {
        if !acceptable(password) {
            warn!("Rejected empty or malformed admin password");
            return false;
        }

        // -k: ignore cached credentials, -v: validate only, -p '': no prompt
        let child = Command::new("sudo")
            .args(["-S", "-k", "-v", "-p", ""])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot run sudo: {}", e);
                return false;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", password);
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                warn!("Failed to pass password to sudo: {}", e);
                return false;
            }
        }

        match child.wait().await {
            Ok(status) if status.success() => {
                info!("Admin password accepted");
                true
            }
            Ok(_) => {
                warn!("Admin password rejected by sudo");
                false
            }
            Err(e) => {
                warn!("sudo did not finish: {}", e);
                false
            }
        }
    }
}
