//! Health probes wiring a configured backend to the registry's
//! [`HealthProbe`] contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::registry::HealthProbe;
use gateway_core::remote::RemoteBackend;
use tokio::process::Command;

/// Probes a CLI backend by invoking `<command> --version` with a short
/// timeout; any non-zero exit, timeout, or spawn failure reads as
/// unavailable.
pub struct CliHealthProbe {
    command: String,
}

impl CliHealthProbe {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl HealthProbe for CliHealthProbe {
    async fn is_available(&self) -> bool {
        let probe = Command::new(&self.command).arg("--version").output();
        match tokio::time::timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }
}

/// Probes a remote API backend via its own minimal completion call.
pub struct RemoteHealthProbe {
    remote: Arc<dyn RemoteBackend>,
}

impl RemoteHealthProbe {
    pub fn new(remote: Arc<dyn RemoteBackend>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl HealthProbe for RemoteHealthProbe {
    async fn is_available(&self) -> bool {
        self.remote.health_check().await.is_ok()
    }
}
