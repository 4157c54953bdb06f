//! Service specs for each container image

use crate::certs::{CertificateStore, CONTAINER_CERTS_DIR};
use crate::config::{Mode, SessionConfig, MAX_BEE_WORKERS};
use crate::runtime::{
    network_name, volume_name, HostFile, ReadinessError, ReadinessRule, ServiceSpec,
};
use crate::services::envs::{self, compose_env, session_env, static_env};
use crate::services::Service;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

const MONGO_READY: &str = r"mongod startup complete";
const ELASTIC_READY: &str = r#""message": "started""#;
const ASPNET_READY: &str = r"Now listening on: https?://(localhost|\[::\]):\d+";
const ASPNET_FAILURE: &str = r"Exception:.+";
const ASPNET_BENIGN: [&str; 3] = [
    r"Current db does not support change stream",
    r"is only supported on replica sets\.",
    r"Failed to process the job",
];
const BLOCKCHAIN_READY: &str = r"HTTP server started";
const BLOCKCHAIN_FAILURE: &str = r"Error:.+";
const BEE_READY: &str = r#""address"="\[::\]:\d+""#;
const BEE_FAILURE: &str = r#""level"="error""#;
const BEE_BENIGN: &str = r#""logger"="node/storageincentives""#;
const INTERCEPTOR_READY: &str = r"starting in full mode";
const INTERCEPTOR_FAILURE: &str = r#""level"="error""#;

/// Network shared by the chain node and the bee nodes
const BEE_NETWORK: &str = "bee";
/// Unlock password of the chain node's mining account
const BLOCKCHAIN_PASSWORD: &str = "toTheSun";

/// Builds [`ServiceSpec`]s for the configured session
#[derive(Debug, Clone)]
pub struct Catalog {
    mode: Mode,
    cache_dir: PathBuf,
    certs: CertificateStore,
    overrides: IndexMap<String, IndexMap<String, String>>,
}

impl Catalog {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            mode: config.mode,
            cache_dir: config.cache_dir.clone(),
            certs: CertificateStore::new(&config.cache_dir),
            overrides: config.env.clone(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Spec for `service`. Worker nodes need the edge node's underlay address.
    pub fn spec(
        &self,
        service: Service,
        bootnode: Option<&str>,
    ) -> Result<ServiceSpec, CatalogError> {
        let mut spec = match service {
            Service::Mongo => self.mongo()?,
            Service::Elastic => self.elastic()?,
            Service::Blockchain => self.blockchain()?,
            Service::Bee => self.bee(None)?,
            Service::BeeWorker(n) => {
                if n == 0 || n > MAX_BEE_WORKERS {
                    return Err(CatalogError::WorkerOutOfRange(n));
                }
                let bootnode = bootnode.ok_or(CatalogError::MissingBootnode(service))?;
                self.bee(Some((n, bootnode)))?
            }
            Service::Interceptor => self.interceptor()?,
            _ => self.aspnet(service)?,
        };

        if let Some(overrides) = self.overrides.get(&spec.name) {
            spec.env = compose_env([&spec.env, overrides]);
        }
        Ok(spec)
    }

    fn base_env(&self, service: Service) -> IndexMap<String, String> {
        compose_env([&static_env(service), &session_env(service, self.mode)])
    }

    fn mongo(&self) -> Result<ServiceSpec, CatalogError> {
        let service = Service::Mongo;
        let name = service.name();
        let db_volume = volume_name(&format!("{}-db", name));
        let config_volume = volume_name(&format!("{}-configdb", name));

        let readiness = rule(ReadinessRule::builder(MONGO_READY))?;
        let mut spec = ServiceSpec::new(&name, "mongo:latest", readiness);
        spec.env = self.base_env(service);
        spec.args = vec![
            "--mount".into(),
            format!("type=volume,source={},target=/data/db", db_volume),
            "--mount".into(),
            format!("type=volume,source={},target=/data/configdb", config_volume),
            "--network".into(),
            "host".into(),
        ];
        spec.volumes = vec![db_volume, config_volume];
        spec.endpoint = Some(format!("mongodb://localhost:{}", envs::MONGODB_PORT));
        Ok(spec)
    }

    fn elastic(&self) -> Result<ServiceSpec, CatalogError> {
        let service = Service::Elastic;
        let data_volume = volume_name(&format!("{}-data", service.name()));

        let mut spec = ServiceSpec::new(
            service.name(),
            "elasticsearch:7.17.24",
            rule(ReadinessRule::builder(ELASTIC_READY))?,
        );
        spec.env = self.base_env(service);
        spec.args = vec![
            "--mount".into(),
            format!("type=volume,source={},target=/usr/share/elasticsearch/data", data_volume),
            "--network".into(),
            "host".into(),
            "--memory=512m".into(),
        ];
        spec.volumes = vec![data_volume];
        spec.endpoint = Some(format!("http://localhost:{}", envs::ELASTIC_PORT));
        Ok(spec)
    }

    fn aspnet(&self, service: Service) -> Result<ServiceSpec, CatalogError> {
        let image = match service {
            Service::Sso => "etherna/etherna-sso:latest",
            Service::Index => "etherna/etherna-index:latest",
            Service::Credit => "etherna/etherna-credit:latest",
            Service::GatewayDashboard => "etherna/etherna-gateway-dashboard:latest",
            Service::GatewayValidator => "etherna/etherna-gateway-validator:latest",
            Service::BeehiveManager => "etherna/beehive-manager:latest",
            other => return Err(CatalogError::NotAspNet(other)),
        };

        let mut builder = ReadinessRule::builder(ASPNET_READY).failure(ASPNET_FAILURE);
        for pattern in ASPNET_BENIGN {
            builder = builder.exclude(pattern);
        }

        let mut spec = ServiceSpec::new(service.name(), image, rule(builder)?);
        spec.env = self.base_env(service);

        if self.mode == Mode::Https {
            spec.args.push("-v".into());
            spec.args.push(format!("{}:{}/", self.certs.dir().display(), CONTAINER_CERTS_DIR));
            spec.trust_certificate = true;
        }
        spec.args.push("--network".into());
        spec.args.push("host".into());

        if let Some(port) = listen_port(&spec.env) {
            spec.endpoint = Some(format!("{}://localhost:{}/", self.mode, port));
        }
        Ok(spec)
    }

    fn blockchain(&self) -> Result<ServiceSpec, CatalogError> {
        let service = Service::Blockchain;
        let volume = volume_name("blockchain");
        let network = network_name(BEE_NETWORK);
        let extra_dir = self.cache_dir.join(".ethereum");
        let http_port = envs::BLOCKCHAIN_PORT;
        let ws_port = http_port + 1;

        let mut spec = ServiceSpec::new(
            service.name(),
            "fairdatasociety/fdp-play-blockchain:latest",
            rule(ReadinessRule::builder(BLOCKCHAIN_READY).failure(BLOCKCHAIN_FAILURE))?,
        );
        spec.env = self.base_env(service);
        spec.args = vec![
            "--network".into(),
            network.clone(),
            "-p".into(),
            format!("{}:{}", http_port, http_port),
            "-p".into(),
            format!("{}:{}", ws_port, ws_port),
            "--mount".into(),
            format!("type=volume,source={},target=/root/.ethereum", volume),
            "-v".into(),
            format!("{}:/root/extra", extra_dir.display()),
        ];
        spec.cmd = vec![
            "--allow-insecure-unlock".into(),
            format!("--unlock={}", envs::ETHERBASE),
            "--password=/root/extra/password".into(),
            "--mine".into(),
            format!("--miner.etherbase={}", envs::ETHERBASE),
            "--http".into(),
            "--http.api=debug,web3,eth,txpool,net,personal".into(),
            "--http.corsdomain=*".into(),
            format!("--http.port={}", http_port),
            "--http.addr=0.0.0.0".into(),
            "--http.vhosts=*".into(),
            "--ws".into(),
            "--ws.api=debug,web3,eth,txpool,net,personal".into(),
            format!("--ws.port={}", ws_port),
            "--ws.origins=*".into(),
            "--maxpeers=0".into(),
            format!("--networkid={}", envs::NETWORK_ID),
            "--authrpc.vhosts=*".into(),
            "--authrpc.addr=0.0.0.0".into(),
        ];
        spec.volumes = vec![volume];
        spec.networks = vec![network];
        spec.host_files = vec![HostFile {
            path: extra_dir.join("password"),
            contents: BLOCKCHAIN_PASSWORD.to_string(),
            mode: 0o644,
            dir_mode: 0o777,
        }];
        spec.endpoint = Some(format!("http://localhost:{}", http_port));
        Ok(spec)
    }

    /// Edge node when `worker` is `None`, otherwise worker `n` joining `bootnode`
    fn bee(&self, worker: Option<(u8, &str)>) -> Result<ServiceSpec, CatalogError> {
        let (service, image, volume) = match worker {
            None => (
                Service::Bee,
                "fairdatasociety/fdp-play-queen:latest".to_string(),
                volume_name("bee"),
            ),
            Some((n, _)) => (
                Service::BeeWorker(n),
                format!("fairdatasociety/fdp-play-worker-{}", n),
                volume_name(&format!("bee_worker_{}", n)),
            ),
        };
        let network = network_name(BEE_NETWORK);

        let mut env = self.base_env(service);
        match worker {
            None => {
                env.shift_remove("BEE_BOOTNODE");
                env.insert("BEE_BOOTNODE_MODE".into(), "false".into());
            }
            Some((_, bootnode)) => {
                env.shift_remove("BEE_BOOTNODE_MODE");
                env.insert("BEE_BOOTNODE".into(), bootnode.to_string());
            }
        }

        let (api_port, p2p_port) = match worker {
            None => (envs::BEE_PORT, envs::BEE_P2P_PORT),
            Some((n, _)) => envs::worker_port(envs::BEE_PORT, n)
                .zip(envs::worker_port(envs::BEE_P2P_PORT, n))
                .ok_or(CatalogError::WorkerOutOfRange(n))?,
        };

        let mut spec = ServiceSpec::new(
            service.name(),
            image,
            rule(ReadinessRule::builder(BEE_READY).failure(BEE_FAILURE).exclude(BEE_BENIGN))?,
        );
        spec.env = env;
        spec.args = vec![
            "--mount".into(),
            format!("type=volume,source={},target=/home/bee/.bee", volume),
            "--network".into(),
            network.clone(),
            "-p".into(),
            format!("{}:{}", api_port, envs::BEE_PORT),
            "-p".into(),
            format!("{}:{}", p2p_port, envs::BEE_P2P_PORT),
        ];
        spec.cmd = vec!["start".into()];
        spec.volumes = vec![volume];
        spec.networks = vec![network];
        if worker.is_none() {
            spec.endpoint = Some(format!("{}://localhost:{}", self.mode, api_port));
        }
        Ok(spec)
    }

    fn interceptor(&self) -> Result<ServiceSpec, CatalogError> {
        let service = Service::Interceptor;
        let mut spec = ServiceSpec::new(
            service.name(),
            "etherna/etherna-gateway-interceptor:latest",
            rule(ReadinessRule::builder(INTERCEPTOR_READY).failure(INTERCEPTOR_FAILURE))?,
        );
        // The static table is written for plain http
        spec.env = compose_env([&static_env(service), &session_env(service, Mode::Http)]);
        Ok(spec)
    }

    /// API base URL of the edge node, used for address discovery
    pub fn bee_api_url(&self) -> String {
        format!("http://localhost:{}", envs::BEE_PORT)
    }
}

fn rule(
    builder: crate::runtime::ReadinessRuleBuilder,
) -> Result<Arc<dyn crate::runtime::ReadinessCheck>, CatalogError> {
    Ok(Arc::new(builder.build()?))
}

/// Port of the first URL in `ASPNETCORE_URLS`
fn listen_port(env: &IndexMap<String, String>) -> Option<u16> {
    let urls = env.get("ASPNETCORE_URLS")?;
    let first = urls.split(';').next()?;
    first.rsplit(':').next()?.trim_end_matches('/').parse().ok()
}

/// Errors that can occur when building service specs
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("Worker '{0}' needs the edge node's underlay address")]
    MissingBootnode(Service),

    #[error("'{0}' is not an ASP.NET backend")]
    NotAspNet(Service),

    #[error("Worker number {0} is outside 1..={max}", max = MAX_BEE_WORKERS)]
    WorkerOutOfRange(u8),
}
