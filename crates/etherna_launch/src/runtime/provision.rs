//! Container runtime CLI calls: volumes, networks and container housekeeping

use crate::runtime::process::{CommandOutput, ProcessConfig, ProcessError, ProcessSpawner};
use std::sync::Arc;

/// Prefix shared by every volume and network this launcher creates
pub const NAMESPACE: &str = "etherna";

/// Name of the persistent volume for a logical service resource
pub fn volume_name(logical: &str) -> String {
    format!("{}_{}-volume", NAMESPACE, logical)
}

/// Name of the virtual network for a logical group of services
pub fn network_name(logical: &str) -> String {
    format!("{}_{}_network", NAMESPACE, logical)
}

/// Resources provisioned before a container starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Volume,
    Network,
}

impl ResourceKind {
    fn subcommand(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "volume",
            ResourceKind::Network => "network",
        }
    }
}

/// Thin wrapper over the container runtime CLI (`docker` by default)
#[derive(Clone)]
pub struct ContainerCli {
    binary: String,
    spawner: Arc<dyn ProcessSpawner>,
}

impl ContainerCli {
    pub fn new(binary: impl Into<String>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            binary: binary.into(),
            spawner,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn spawner(&self) -> &Arc<dyn ProcessSpawner> {
        &self.spawner
    }

    /// Create a volume or network for `service`; an existing one is fine
    pub async fn ensure(
        &self,
        service: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), ProvisionError> {
        let args = [kind.subcommand(), "create", name];
        let output = self.run(service, &args).await?;
        if output.success() || mentions_already_exists(&output) {
            log::debug!("[{}] Provisioned {} {}", service, kind.subcommand(), name);
            return Ok(());
        }
        Err(self.command_failed(&args, output))
    }

    /// Whether a container with exactly this name exists
    pub async fn is_name_in_use(&self, name: &str) -> Result<bool, ProvisionError> {
        let filter = format!("name={}", name);
        let output = self.run(name, &["ps", "-a", "--filter", &filter]).await?;
        if !output.success() {
            return Err(self.command_failed(&["ps", "-a", "--filter", &filter], output));
        }
        // First line is the table header; NAMES is the last column
        Ok(output
            .stdout
            .iter()
            .skip(1)
            .filter_map(|line| line.split_whitespace().last())
            .any(|names| names.split(',').any(|n| n == name)))
    }

    /// Stop a container by name
    pub async fn stop(&self, name: &str) -> Result<(), ProvisionError> {
        let output = self.run(name, &["stop", name]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(self.command_failed(&["stop", name], output))
        }
    }

    /// Refresh the CA store inside a running container
    pub async fn trust_certificate(&self, name: &str) -> Result<(), ProvisionError> {
        let output = self.run(name, &["exec", name, "update-ca-certificates"]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(self.command_failed(&["exec", name, "update-ca-certificates"], output))
        }
    }

    async fn run(&self, name: &str, args: &[&str]) -> Result<CommandOutput, ProcessError> {
        let config = ProcessConfig::new(name, self.binary.as_str(), args.iter().copied());
        let handle = self.spawner.spawn(&config)?;
        Ok(handle.wait_with_output().await)
    }

    fn command_failed(&self, args: &[&str], output: CommandOutput) -> ProvisionError {
        let message = output
            .stderr
            .iter()
            .chain(output.stdout.iter())
            .rev()
            .find(|l| !l.trim().is_empty())
            .cloned()
            .unwrap_or_default();
        ProvisionError::CommandFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            code: output.code,
            message,
        }
    }
}

fn mentions_already_exists(output: &CommandOutput) -> bool {
    output
        .stderr
        .iter()
        .chain(output.stdout.iter())
        .any(|line| line.contains("already exists"))
}

/// Errors from container runtime CLI calls
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("'{command}' failed with code {code:?}: {message}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        message: String,
    },
}
