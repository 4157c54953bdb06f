//! Registry of launched services and their processes

use crate::runtime::process::Terminator;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Lifecycle state of a launched service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// Known to the session, not spawned yet
    Pending,
    /// Process spawned, waiting for readiness
    Starting,
    /// Readiness observed
    Ready,
    /// Failed to launch or become ready
    Failed { reason: String },
    /// Shut down before readiness was observed
    Killed,
}

impl ServiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Ready | ServiceState::Failed { .. } | ServiceState::Killed
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ServiceState::Ready)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Pending => write!(f, "pending"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Ready => write!(f, "ready"),
            ServiceState::Failed { reason } => write!(f, "failed: {}", reason),
            ServiceState::Killed => write!(f, "killed"),
        }
    }
}

/// Record of one launched service
#[derive(Debug, Clone)]
pub struct RunningService {
    pub name: String,
    pub state: ServiceState,
    pub exit_code: Option<Option<i32>>,
    pub started_at: Option<Instant>,
    terminator: Option<Terminator>,
}

impl RunningService {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ServiceState::Pending,
            exit_code: None,
            started_at: None,
            terminator: None,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    services: IndexMap<String, RunningService>,
    closed: bool,
}

/// Shared record of every service a session launched.
///
/// Processes are registered as soon as they are spawned, so shutdown reaches
/// them whether or not they ever became ready. Once closed, newly registered
/// processes are terminated on the spot.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service that will be launched later
    pub async fn insert_pending(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        let state = if inner.closed {
            ServiceState::Killed
        } else {
            ServiceState::Pending
        };
        let mut service = RunningService::pending(name);
        service.state = state;
        inner.services.insert(name.to_string(), service);
    }

    /// Record a spawned process. Returns `false` if the registry is already
    /// closed, in which case the process has been asked to terminate.
    pub async fn register(&self, name: &str, terminator: Terminator) -> bool {
        let mut inner = self.inner.lock().await;
        let closed = inner.closed;
        let service = inner
            .services
            .entry(name.to_string())
            .or_insert_with(|| RunningService::pending(name));

        if let Some(previous) = service.terminator.replace(terminator.clone()) {
            previous.terminate();
        }

        if closed {
            log::info!("[{}] Spawned after shutdown began, terminating", name);
            terminator.terminate();
            service.state = ServiceState::Killed;
            return false;
        }

        service.state = ServiceState::Starting;
        service.started_at = Some(Instant::now());
        true
    }

    /// Record the readiness outcome of a service. A service killed by
    /// shutdown stays killed.
    pub async fn resolve(&self, name: &str, state: ServiceState) -> ServiceState {
        let mut inner = self.inner.lock().await;
        let service = inner
            .services
            .entry(name.to_string())
            .or_insert_with(|| RunningService::pending(name));

        if service.state == ServiceState::Killed {
            log::debug!("[{}] Resolved as {} after shutdown", name, state);
        } else {
            service.state = state;
        }
        service.state.clone()
    }

    /// Record a process exit observed after the readiness outcome
    pub async fn record_exit(&self, name: &str, code: Option<i32>) {
        let mut inner = self.inner.lock().await;
        let closed = inner.closed;
        let Some(service) = inner.services.get_mut(name) else {
            return;
        };
        service.exit_code = Some(code);

        if closed || service.terminator.as_ref().is_some_and(Terminator::is_requested) {
            log::debug!("[{}] Exited with code {:?}", name, code);
        } else if service.state.is_terminal() {
            log::warn!("[{}] Container exited with code {:?}", name, code);
        } else {
            service.state = ServiceState::Failed {
                reason: crate::runtime::readiness::exit_message(code),
            };
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Close the registry and request termination of every process.
    ///
    /// Services still pending or starting become `Killed`. Returns the number
    /// of termination requests issued by this call.
    pub async fn close_and_terminate_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.closed = true;

        let mut issued = 0;
        for service in inner.services.values_mut() {
            if let Some(terminator) = &service.terminator {
                if terminator.terminate() {
                    issued += 1;
                }
            }
            if matches!(service.state, ServiceState::Pending | ServiceState::Starting) {
                service.state = ServiceState::Killed;
            }
        }
        issued
    }

    /// Termination handles of every process ever registered
    pub async fn terminators(&self) -> Vec<Terminator> {
        let inner = self.inner.lock().await;
        inner
            .services
            .values()
            .filter_map(|s| s.terminator.clone())
            .collect()
    }

    pub async fn state(&self, name: &str) -> Option<ServiceState> {
        let inner = self.inner.lock().await;
        inner.services.get(name).map(|s| s.state.clone())
    }

    /// Current state of every service, in insertion order
    pub async fn snapshot(&self) -> IndexMap<String, ServiceState> {
        let inner = self.inner.lock().await;
        inner
            .services
            .iter()
            .map(|(name, s)| (name.clone(), s.state.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::ProcessHandle;

    #[tokio::test]
    async fn test_register_then_resolve() {
        let registry = ProcessRegistry::new();
        registry.insert_pending("elastic").await;
        assert_eq!(registry.state("elastic").await, Some(ServiceState::Pending));

        let (handle, _io) = ProcessHandle::pair("elastic", None);
        assert!(registry.register("elastic", handle.terminator()).await);
        assert_eq!(registry.state("elastic").await, Some(ServiceState::Starting));

        let state = registry.resolve("elastic", ServiceState::Ready).await;
        assert_eq!(state, ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_close_kills_starting_and_keeps_ready() {
        let registry = ProcessRegistry::new();
        let (a, mut a_io) = ProcessHandle::pair("a", None);
        let (b, mut b_io) = ProcessHandle::pair("b", None);
        registry.register("a", a.terminator()).await;
        registry.register("b", b.terminator()).await;
        registry.resolve("b", ServiceState::Ready).await;

        assert_eq!(registry.close_and_terminate_all().await, 2);
        assert_eq!(registry.close_and_terminate_all().await, 0);

        assert_eq!(registry.state("a").await, Some(ServiceState::Killed));
        assert_eq!(registry.state("b").await, Some(ServiceState::Ready));
        assert!(a_io.terminate_rx.try_recv().is_ok());
        assert!(b_io.terminate_rx.try_recv().is_ok());

        // Readiness failure arriving after the kill does not override it
        let state = registry
            .resolve("a", ServiceState::Failed { reason: "gone".into() })
            .await;
        assert_eq!(state, ServiceState::Killed);
    }

    #[tokio::test]
    async fn test_register_after_close_terminates() {
        let registry = ProcessRegistry::new();
        registry.close_and_terminate_all().await;

        let (handle, mut io) = ProcessHandle::pair("late", None);
        assert!(!registry.register("late", handle.terminator()).await);
        assert!(io.terminate_rx.try_recv().is_ok());
        assert_eq!(registry.state("late").await, Some(ServiceState::Killed));
    }

    #[tokio::test]
    async fn test_exit_after_ready_is_not_a_failure() {
        let registry = ProcessRegistry::new();
        let (handle, _io) = ProcessHandle::pair("mongo", None);
        registry.register("mongo", handle.terminator()).await;
        registry.resolve("mongo", ServiceState::Ready).await;
        registry.record_exit("mongo", Some(137)).await;

        assert_eq!(registry.state("mongo").await, Some(ServiceState::Ready));
    }
}
