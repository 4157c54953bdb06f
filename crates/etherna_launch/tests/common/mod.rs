//! Shared fixtures: a scripted container runtime and a mock node API
#![allow(dead_code)]

use axum::routing::get;
use axum::{Json, Router};
use etherna_launch::runtime::{
    ProcessConfig, ProcessError, ProcessHandle, ProcessIo, ProcessSpawner,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// What a `run` invocation prints and whether it exits on its own
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub lines: Vec<String>,
    /// `None` keeps the container alive until it is terminated
    pub exit: Option<Option<i32>>,
}

impl Script {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit: None,
        }
    }

    pub fn exit(mut self, code: Option<i32>) -> Self {
        self.exit = Some(code);
        self
    }
}

const PS_HEADER: &str = "CONTAINER ID   IMAGE   COMMAND   CREATED   STATUS   PORTS   NAMES";

#[derive(Default)]
struct FakeState {
    commands: Vec<(String, Vec<String>)>,
    scripts: HashMap<String, Script>,
    containers: HashSet<String>,
    volumes: HashSet<String>,
    networks: HashSet<String>,
    spawn_failures: HashSet<String>,
    terminations: HashMap<String, usize>,
}

/// In-memory stand-in for the container runtime CLI
#[derive(Clone)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
    runs: Arc<watch::Sender<usize>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        let (runs, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            runs: Arc::new(runs),
        }
    }

    pub fn script(&self, name: &str, script: Script) {
        self.state.lock().unwrap().scripts.insert(name.to_string(), script);
    }

    /// Pretend a container with this name is already around
    pub fn add_container(&self, name: &str) {
        self.state.lock().unwrap().containers.insert(name.to_string());
    }

    pub fn add_volume(&self, name: &str) {
        self.state.lock().unwrap().volumes.insert(name.to_string());
    }

    pub fn fail_spawn(&self, name: &str) {
        self.state.lock().unwrap().spawn_failures.insert(name.to_string());
    }

    /// Every invocation as (process name, arguments)
    pub fn commands(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Subcommands issued for one container, in order
    pub fn subcommands(&self, name: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(n, _)| n == name)
            .filter_map(|(_, args)| args.first().cloned())
            .collect()
    }

    /// Arguments of the `run` invocation for a container
    pub fn run_args(&self, name: &str) -> Option<Vec<String>> {
        self.commands()
            .into_iter()
            .find(|(n, args)| n == name && args.first().map(String::as_str) == Some("run"))
            .map(|(_, args)| args)
    }

    pub fn terminations(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .terminations
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub async fn wait_for_runs(&self, count: usize) {
        let mut rx = self.runs.subscribe();
        let _ = rx.wait_for(|runs| *runs >= count).await;
    }

    fn finish(io: ProcessIo, stdout: &[String], stderr: &[String], code: i32) {
        for line in stdout {
            let _ = io.stdout.send(line.clone());
        }
        for line in stderr {
            let _ = io.stderr.send(line.clone());
        }
        let _ = io.exit.send(Some(code));
        let _ = io.finished.send(true);
    }

    fn ensure(set: &mut HashSet<String>, kind: &str, name: &str, io: ProcessIo) {
        if set.insert(name.to_string()) {
            Self::finish(io, &[name.to_string()], &[], 0);
        } else {
            let message = format!(
                "Error response from daemon: {} with name {} already exists",
                kind, name
            );
            Self::finish(io, &[], &[message], 1);
        }
    }

    fn run(&self, name: String, io: ProcessIo) {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.containers.insert(name.clone());
            state.scripts.get(&name).cloned().unwrap_or_default()
        };
        self.runs.send_modify(|runs| *runs += 1);

        let state = self.state.clone();
        tokio::spawn(async move {
            let ProcessIo {
                stdout,
                stderr,
                exit,
                mut terminate_rx,
                finished,
            } = io;

            for line in script.lines {
                let _ = stdout.send(line);
            }

            let code = match script.exit {
                Some(code) => code,
                None => {
                    if terminate_rx.recv().await.is_some() {
                        *state.lock().unwrap().terminations.entry(name.clone()).or_insert(0) += 1;
                    }
                    None
                }
            };

            state.lock().unwrap().containers.remove(&name);
            drop(stdout);
            drop(stderr);
            let _ = exit.send(code);
            let _ = finished.send(true);
        });
    }
}

impl ProcessSpawner for FakeRuntime {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError> {
        let name = config.name.clone();
        let args = config.args.clone();
        self.state
            .lock()
            .unwrap()
            .commands
            .push((name.clone(), args.clone()));

        let subcommand = args.first().cloned().unwrap_or_default();
        if subcommand == "run" && self.state.lock().unwrap().spawn_failures.contains(&name) {
            return Err(ProcessError::SpawnFailed {
                name,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            });
        }

        let (handle, io) = ProcessHandle::pair(name.clone(), None);
        match subcommand.as_str() {
            "ps" => {
                let filter = args
                    .iter()
                    .find_map(|a| a.strip_prefix("name="))
                    .unwrap_or_default()
                    .to_string();
                let mut lines = vec![PS_HEADER.to_string()];
                let state = self.state.lock().unwrap();
                // Like the real filter, a substring match
                lines.extend(
                    state
                        .containers
                        .iter()
                        .filter(|c| c.contains(&filter))
                        .map(|c| format!("3f2a9c1b   image   \"entry\"   1 min ago   Up   {}", c)),
                );
                drop(state);
                Self::finish(io, &lines, &[], 0);
            }
            "stop" => {
                self.state.lock().unwrap().containers.remove(&name);
                Self::finish(io, &[name], &[], 0);
            }
            "volume" => {
                let target = args.get(2).cloned().unwrap_or_default();
                Self::ensure(&mut self.state.lock().unwrap().volumes, "volume", &target, io);
            }
            "network" => {
                let target = args.get(2).cloned().unwrap_or_default();
                Self::ensure(&mut self.state.lock().unwrap().networks, "network", &target, io);
            }
            "run" => self.run(name, io),
            _ => Self::finish(io, &[], &[], 0),
        }

        Ok(handle)
    }
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Node API that reports no addresses for the first `empty_responses` polls
pub async fn addresses_api(
    empty_responses: usize,
    underlay: Vec<&str>,
) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let underlay: Vec<String> = underlay.into_iter().map(String::from).collect();

    let counter = hits.clone();
    let router = Router::new().route(
        "/addresses",
        get(move || {
            let counter = counter.clone();
            let underlay = underlay.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < empty_responses {
                    Json(serde_json::json!({ "overlay": "f0a1", "underlay": [] }))
                } else {
                    Json(serde_json::json!({ "overlay": "f0a1", "underlay": underlay }))
                }
            }
        }),
    );

    (serve(router).await, hits)
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
