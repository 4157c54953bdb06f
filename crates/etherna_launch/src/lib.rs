//! Etherna Launch
//!
//! Starts the containerized etherna backends a frontend needs during
//! development and tears them down again.
//!
//! # Overview
//!
//! - Every service runs as a `<runtime> run --rm` process whose output is
//!   matched against readiness rules
//! - Volumes and networks are provisioned before first use
//! - Independent services start concurrently; worker bee nodes wait for the
//!   edge node to publish its underlay address
//! - Shutdown terminates each process exactly once, including ones still
//!   starting up
//!
//! # Example Config
//!
//! ```yaml
//! mode: https
//! runtime: docker
//! bee_workers: 2
//!
//! services:
//!   elastic: false
//!
//! env:
//!   etherna-sso:
//!     ASPNETCORE_ENVIRONMENT: Staging
//! ```

pub mod certs;
pub mod cli;
pub mod config;
pub mod runtime;
pub mod services;

pub use cli::LaunchArgs;
pub use config::{ConfigError, Mode, ServiceToggles, SessionConfig};
pub use runtime::{
    LaunchPlan, LaunchReport, ProcessConfig, ProcessError, ProcessEvent, ProcessRunner,
    ProcessSpawner, ServiceSpec, ServiceState, Session, SessionError, SessionState,
};
pub use services::Service;
