//! Container launcher: start one service and wait until it is ready or failed

use crate::runtime::process::{ProcessConfig, ProcessError, ProcessEvent, ProcessHandle};
use crate::runtime::provision::{ContainerCli, ProvisionError, ResourceKind};
use crate::runtime::readiness::{ReadinessMatcher, ReadinessCheck, ReadinessState};
use crate::runtime::registry::ProcessRegistry;
use indexmap::IndexMap;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

static IMAGE_PULL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Pulling from").unwrap());
static DAEMON_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Error response from daemon").unwrap());

/// A file the launcher writes on the host before the container starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFile {
    pub path: PathBuf,
    pub contents: String,
    /// Unix permission bits of the file
    pub mode: u32,
    /// Unix permission bits of a created parent directory
    pub dir_mode: u32,
}

/// Everything needed to launch one containerized service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Environment variables injected with `-e`
    pub env: IndexMap<String, String>,
    /// Extra `run` arguments (mounts, network, published ports)
    pub args: Vec<String>,
    /// Command passed to the image entry point
    pub cmd: Vec<String>,
    /// Volumes to create before starting
    pub volumes: Vec<String>,
    /// Networks to create before starting
    pub networks: Vec<String>,
    /// Host files to create before starting
    pub host_files: Vec<HostFile>,
    /// Decides when the service is up
    pub readiness: Arc<dyn ReadinessCheck>,
    /// Run `update-ca-certificates` inside the container once ready
    pub trust_certificate: bool,
    /// Public URL, for the success log
    pub endpoint: Option<String>,
}

impl ServiceSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        readiness: Arc<dyn ReadinessCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: IndexMap::new(),
            args: Vec::new(),
            cmd: Vec::new(),
            volumes: Vec::new(),
            networks: Vec::new(),
            host_files: Vec::new(),
            readiness,
            trust_certificate: false,
            endpoint: None,
        }
    }

    /// Arguments for the container runtime CLI
    pub fn run_arguments(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.extend(self.args.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.cmd.iter().cloned());
        args
    }
}

/// Final readiness outcome of a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    Ready,
    Failed { reason: String },
}

/// A service whose launch has resolved
#[derive(Debug)]
pub struct LaunchedService {
    pub name: String,
    pub outcome: ServiceOutcome,
    /// The process, if it is still running
    pub handle: Option<ProcessHandle>,
}

/// Starts services through the container runtime CLI
#[derive(Clone)]
pub struct ContainerLauncher {
    cli: ContainerCli,
}

impl ContainerLauncher {
    pub fn new(cli: ContainerCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &ContainerCli {
        &self.cli
    }

    /// Launch a service and wait for its readiness outcome.
    ///
    /// The spawned process is added to `registry` before any output is read.
    /// Errors cover everything that prevents the process from starting.
    pub async fn launch(
        &self,
        spec: &ServiceSpec,
        registry: &ProcessRegistry,
    ) -> Result<LaunchedService, LaunchError> {
        let name = spec.name.as_str();

        if self.cli.is_name_in_use(name).await? {
            log::info!("[{}] Container name in use, stopping existing container", name);
            if let Err(e) = self.cli.stop(name).await {
                log::warn!("[{}] Failed to stop existing container: {}", name, e);
            }
        }

        for file in &spec.host_files {
            ensure_host_file(file).map_err(|source| LaunchError::HostFile {
                path: file.path.clone(),
                source,
            })?;
        }

        let provisions = spec
            .volumes
            .iter()
            .map(|v| (ResourceKind::Volume, v))
            .chain(spec.networks.iter().map(|n| (ResourceKind::Network, n)))
            .map(|(kind, resource)| self.cli.ensure(name, kind, resource));
        for result in futures::future::join_all(provisions).await {
            result?;
        }

        let config = ProcessConfig::new(name, self.cli.binary(), spec.run_arguments());
        let mut handle = self.cli.spawner().spawn(&config)?;
        registry.register(name, handle.terminator()).await;
        log::info!("[{}] Container started ({})", name, spec.image);

        let mut matcher = ReadinessMatcher::new(spec.readiness.clone());
        let mut exited = false;

        while let Some(event) = handle.next_event().await {
            match event {
                ProcessEvent::Output { line, is_stderr } => {
                    log::trace!("[{}] {}{}", name, if is_stderr { "! " } else { "" }, line);
                    if IMAGE_PULL.is_match(&line) {
                        log::info!("[{}] Downloading image...", name);
                    }
                    if DAEMON_ERROR.is_match(&line) {
                        log::error!("[{}] {}", name, line);
                    }
                    if matcher.observe(&line).state.is_terminal() {
                        break;
                    }
                }
                ProcessEvent::Exited { code } => {
                    log::debug!("[{}] Exited during start-up with code {:?}", name, code);
                    matcher.finish(code);
                    exited = true;
                    break;
                }
            }
        }

        if !matcher.is_terminal() {
            // Streams closed without an exit notification
            matcher.finish(None);
            exited = true;
        }

        let classification = matcher.classification();
        let outcome = match classification.state {
            ReadinessState::Ready => {
                if spec.trust_certificate {
                    if let Err(e) = self.cli.trust_certificate(name).await {
                        log::warn!("[{}] Failed to trust certificate in container: {}", name, e);
                    }
                }
                match &spec.endpoint {
                    Some(url) => log::info!("[{}] Ready at {}", name, url),
                    None => log::info!("[{}] Ready", name),
                }
                ServiceOutcome::Ready
            }
            _ => {
                let reason = classification
                    .diagnostic
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string());
                log::error!("[{}] {}", name, reason);
                ServiceOutcome::Failed { reason }
            }
        };

        Ok(LaunchedService {
            name: spec.name.clone(),
            outcome,
            handle: if exited { None } else { Some(handle) },
        })
    }
}

/// Create a host file with fixed contents unless it already exists
fn ensure_host_file(file: &HostFile) -> std::io::Result<()> {
    if let Some(dir) = file.path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_mode(dir, file.dir_mode)?;
        }
    }
    if !file.path.exists() {
        std::fs::write(&file.path, &file.contents)?;
        set_mode(&file.path, file.mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Errors that prevent a service process from starting
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to start: {0}")]
    Process(#[from] ProcessError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Failed to prepare '{}': {source}", path.display())]
    HostFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::readiness::ReadinessRule;

    fn spec() -> ServiceSpec {
        let rule = ReadinessRule::builder("started").build().unwrap();
        let mut spec = ServiceSpec::new("elastic", "elasticsearch:7.17.24", Arc::new(rule));
        spec.env.insert("discovery.type".into(), "single-node".into());
        spec.args = vec!["--network".into(), "host".into()];
        spec.cmd = vec!["start".into()];
        spec
    }

    #[test]
    fn test_run_arguments_order() {
        assert_eq!(
            spec().run_arguments(),
            vec![
                "run",
                "--rm",
                "--name",
                "elastic",
                "-e",
                "discovery.type=single-node",
                "--network",
                "host",
                "elasticsearch:7.17.24",
                "start",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_host_file_created_once() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = HostFile {
            path: dir.path().join(".ethereum").join("password"),
            contents: "toTheSun".to_string(),
            mode: 0o644,
            dir_mode: 0o777,
        };

        ensure_host_file(&file).unwrap();
        std::fs::write(&file.path, "changed").unwrap();
        ensure_host_file(&file).unwrap();

        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "changed");
        let mode = std::fs::metadata(&file.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
