//! Launch session - starts the service topology and tears it down

use crate::certs::{CertificateError, CertificateSource, CertificateStore};
use crate::config::{ConfigError, Mode, SessionConfig};
use crate::runtime::discovery::{AddressDiscovery, DiscoveryError};
use crate::runtime::launcher::{ContainerLauncher, ServiceOutcome, ServiceSpec};
use crate::runtime::process::{ProcessEvent, ProcessHandle, ProcessSpawner};
use crate::runtime::provision::ContainerCli;
use crate::runtime::registry::{ProcessRegistry, ServiceState};
use crate::services::{Catalog, CatalogError, Service};
use futures::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Placeholder for values only known once the edge node is up
const DISCOVERED: &str = "<discovered>";

/// Lifecycle of a whole session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Running,
    ShuttingDown,
    Stopped,
}

impl SessionState {
    fn is_closing(&self) -> bool {
        matches!(self, SessionState::ShuttingDown | SessionState::Stopped)
    }
}

/// Outcome of every service once launching has finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub services: IndexMap<String, ServiceState>,
}

impl LaunchReport {
    pub fn ready(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|(_, s)| s.is_ready())
            .map(|(n, _)| n.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &ServiceState)> {
        self.services
            .iter()
            .filter(|(_, s)| matches!(s, ServiceState::Failed { .. }))
            .map(|(n, s)| (n.as_str(), s))
    }

    pub fn all_ready(&self) -> bool {
        self.services.values().all(ServiceState::is_ready)
    }
}

impl fmt::Display for LaunchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Services:")?;
        for (name, state) in &self.services {
            writeln!(f, "  {:<28} {}", name, state)?;
        }
        Ok(())
    }
}

/// One service in a dry-run plan
#[derive(Debug)]
pub struct PlannedService {
    pub name: String,
    pub command: String,
    /// Service that must be ready first
    pub after: Option<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
}

/// Launch plan for dry-run mode
#[derive(Debug)]
pub struct LaunchPlan {
    pub mode: Mode,
    pub services: Vec<PlannedService>,
}

/// A development session: owns the registry of every process it started
pub struct Session {
    config: SessionConfig,
    catalog: Catalog,
    launcher: ContainerLauncher,
    discovery: AddressDiscovery,
    registry: ProcessRegistry,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create a session.
    ///
    /// In https mode the certificate must already exist in the cache
    /// directory or `certificates` must be able to generate one.
    pub fn new(
        config: SessionConfig,
        spawner: Arc<dyn ProcessSpawner>,
        certificates: Option<&dyn CertificateSource>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let needs_certificate = config.mode == Mode::Https
            && config.services.independent().iter().any(Service::is_aspnet);
        if needs_certificate {
            CertificateStore::new(&config.cache_dir).ensure(certificates)?;
        }

        let cli = ContainerCli::new(config.runtime.clone(), spawner);
        let (state, _) = watch::channel(SessionState::Idle);

        Ok(Self {
            catalog: Catalog::new(&config),
            launcher: ContainerLauncher::new(cli),
            discovery: AddressDiscovery::new(&config.discovery)?,
            registry: ProcessRegistry::new(),
            state,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    fn workers(&self) -> Vec<Service> {
        (1..=self.config.bee_workers).map(Service::BeeWorker).collect()
    }

    /// Every enabled service, in plan order
    fn enabled_services(&self) -> Vec<Service> {
        let mut services = self.config.services.independent();
        if self.config.services.bee {
            services.push(Service::Blockchain);
            services.push(Service::Bee);
            services.extend(self.workers());
        }
        services
    }

    /// Launch every enabled service and wait until each is ready or failed.
    ///
    /// Independent services start concurrently. The chain node, edge node and
    /// worker nodes start in sequence, workers only once the edge node has
    /// published its underlay address. A failed service never stops the
    /// others.
    pub async fn launch(&self) -> Result<LaunchReport, SessionError> {
        let mut previous = SessionState::Idle;
        let started = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == SessionState::Idle {
                *state = SessionState::Launching;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(SessionError::AlreadyLaunched(previous));
        }

        let services = self.enabled_services();
        log::info!("Launching {} services...", services.len());
        for service in &services {
            self.registry.insert_pending(&service.name()).await;
        }

        let mut units: Vec<BoxFuture<'_, ()>> = self
            .config
            .services
            .independent()
            .into_iter()
            .map(|service| {
                async move {
                    self.launch_service(service, None).await;
                }
                .boxed()
            })
            .collect();
        if self.config.services.bee {
            units.push(self.launch_storage_chain().boxed());
        }
        join_all(units).await;

        self.state.send_if_modified(|state| {
            if *state == SessionState::Launching {
                *state = SessionState::Running;
                true
            } else {
                false
            }
        });

        let report = self.report().await;
        let ready = report.ready().count();
        log::info!("{} of {} services ready", ready, report.services.len());
        Ok(report)
    }

    /// Chain node, then edge node, then the workers that join it
    async fn launch_storage_chain(&self) {
        let workers = self.workers();

        let chain = self.launch_service(Service::Blockchain, None).await;
        if !chain.is_ready() {
            let mut dependents = vec![Service::Bee];
            dependents.extend(workers.iter().copied());
            self.fail_dependents(Service::Blockchain, &chain, &dependents).await;
            return;
        }

        let edge = self.launch_service(Service::Bee, None).await;
        if !edge.is_ready() {
            self.fail_dependents(Service::Bee, &edge, &workers).await;
            return;
        }

        let base_url = self
            .config
            .discovery
            .base_url
            .clone()
            .unwrap_or_else(|| self.catalog.bee_api_url());

        let mut state_rx = self.state.subscribe();
        let discovered = tokio::select! {
            result = self.discovery.poll_underlay_address(&base_url) => Some(result),
            _ = async {
                let _ = state_rx.wait_for(SessionState::is_closing).await;
            } => None,
        };

        let bootnode = match discovered {
            Some(Ok(address)) => {
                log::info!("[{}] Underlay address: {}", Service::Bee, address);
                address
            }
            Some(Err(e)) => {
                log::error!("[{}] Address discovery failed: {}", Service::Bee, e);
                let reason = format!("address discovery failed: {}", e);
                for worker in &workers {
                    self.registry
                        .resolve(&worker.name(), ServiceState::Failed { reason: reason.clone() })
                        .await;
                }
                return;
            }
            None => {
                for worker in &workers {
                    self.registry.resolve(&worker.name(), ServiceState::Killed).await;
                }
                return;
            }
        };

        join_all(
            workers
                .iter()
                .map(|worker| self.launch_service(*worker, Some(bootnode.as_str()))),
        )
        .await;
    }

    async fn fail_dependents(
        &self,
        dependency: Service,
        state: &ServiceState,
        dependents: &[Service],
    ) {
        let resolved = match state {
            ServiceState::Killed => ServiceState::Killed,
            other => ServiceState::Failed {
                reason: format!("dependency '{}' is {}", dependency, other),
            },
        };
        for dependent in dependents {
            if resolved != ServiceState::Killed {
                log::error!(
                    "[{}] Not started: dependency '{}' is not ready",
                    dependent,
                    dependency
                );
            }
            self.registry.resolve(&dependent.name(), resolved.clone()).await;
        }
    }

    async fn launch_service(&self, service: Service, bootnode: Option<&str>) -> ServiceState {
        let name = service.name();
        if self.registry.is_closed().await {
            return self.registry.resolve(&name, ServiceState::Killed).await;
        }

        match self.catalog.spec(service, bootnode) {
            Ok(spec) => self.launch_spec(&spec).await,
            Err(e) => {
                log::error!("[{}] {}", name, e);
                self.registry
                    .resolve(&name, ServiceState::Failed { reason: e.to_string() })
                    .await
            }
        }
    }

    /// Launch a single spec and record its outcome
    pub async fn launch_spec(&self, spec: &ServiceSpec) -> ServiceState {
        match self.launcher.launch(spec, &self.registry).await {
            Ok(launched) => {
                let state = match launched.outcome {
                    ServiceOutcome::Ready => ServiceState::Ready,
                    ServiceOutcome::Failed { reason } => ServiceState::Failed { reason },
                };
                let state = self.registry.resolve(&spec.name, state).await;
                if let Some(handle) = launched.handle {
                    self.monitor(handle);
                }
                state
            }
            Err(e) => {
                log::error!("[{}] {}", spec.name, e);
                self.registry
                    .resolve(&spec.name, ServiceState::Failed { reason: e.to_string() })
                    .await
            }
        }
    }

    /// Keep draining a resolved service's output and record its exit
    fn monitor(&self, mut handle: ProcessHandle) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let name = handle.name().to_string();
            while let Some(event) = handle.next_event().await {
                match event {
                    ProcessEvent::Output { line, .. } => log::debug!("[{}] {}", name, line),
                    ProcessEvent::Exited { code } => registry.record_exit(&name, code).await,
                }
            }
        });
    }

    /// Request termination of every process this session started.
    ///
    /// Does not wait for the processes to exit; see [`Session::wait_for_exit`].
    /// Returns the number of termination requests issued. Calling it again is
    /// a no-op.
    pub async fn shutdown(&self) -> usize {
        let begun = self.state.send_if_modified(|state| {
            if state.is_closing() {
                false
            } else {
                *state = SessionState::ShuttingDown;
                true
            }
        });
        if !begun {
            return 0;
        }

        log::info!("Shutting down all services...");
        let issued = self.registry.close_and_terminate_all().await;
        log::info!("Requested termination of {} processes", issued);

        self.state.send_replace(SessionState::Stopped);
        issued
    }

    /// Wait until every registered process has exited, up to `timeout`.
    /// Returns `false` on timeout.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let terminators = self.registry.terminators().await;
        let all = join_all(terminators.iter().map(|t| t.wait_finished()));
        match tokio::time::timeout(timeout, all).await {
            Ok(_) => true,
            Err(_) => {
                log::warn!("Some processes did not exit within {:?}", timeout);
                false
            }
        }
    }

    pub async fn report(&self) -> LaunchReport {
        LaunchReport {
            services: self.registry.snapshot().await,
        }
    }

    /// Generate a launch plan (for dry-run mode)
    pub fn plan(&self) -> Result<LaunchPlan, SessionError> {
        let mut services = Vec::new();

        for service in self.enabled_services() {
            let after = match service {
                Service::Bee => Some(Service::Blockchain.name()),
                Service::BeeWorker(_) => Some(Service::Bee.name()),
                _ => None,
            };
            let spec = self.catalog.spec(service, Some(DISCOVERED))?;
            services.push(PlannedService {
                name: spec.name.clone(),
                command: format!("{} {}", self.config.runtime, spec.run_arguments().join(" ")),
                after,
                volumes: spec.volumes.clone(),
                networks: spec.networks.clone(),
            });
        }

        Ok(LaunchPlan {
            mode: self.config.mode,
            services,
        })
    }
}

/// Errors that affect the whole session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Certificate unavailable: {0}")]
    Certificates(#[from] CertificateError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Failed to set up address discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Session already launched (state: {0:?})")]
    AlreadyLaunched(SessionState),
}

/// Display the launch plan in a human-readable format
impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launch Plan ({})", self.mode)?;
        writeln!(f, "===========")?;

        for (i, service) in self.services.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, service.name)?;
            if let Some(after) = &service.after {
                writeln!(f, "     After: {} is ready", after)?;
            }
            if !service.volumes.is_empty() {
                writeln!(f, "     Volumes: {}", service.volumes.join(", "))?;
            }
            if !service.networks.is_empty() {
                writeln!(f, "     Networks: {}", service.networks.join(", "))?;
            }
            writeln!(f, "     Command: {}", service.command)?;
        }

        Ok(())
    }
}
