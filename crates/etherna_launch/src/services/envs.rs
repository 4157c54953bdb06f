//! Per-service environment tables

use crate::certs::{CERTIFICATE_PASSWORD, CERTIFICATE_PFX_NAME, CONTAINER_CERTS_DIR};
use crate::config::Mode;
use crate::services::Service;
use indexmap::IndexMap;

pub const APP_PORT: u16 = 5173;
pub const APP_HTTPS_PORT: u16 = 5371;

pub const MONGODB_PORT: u16 = 27017;
pub const ELASTIC_PORT: u16 = 9200;
pub const BEE_PORT: u16 = 1633;
pub const BEE_P2P_PORT: u16 = 1634;
pub const BLOCKCHAIN_PORT: u16 = 9545;
pub const NETWORK_ID: u32 = 4020;

const SSO_PORTS: (u16, u16) = (32610, 42610);
const INDEX_PORTS: (u16, u16) = (32620, 42620);
const CREDIT_PORTS: (u16, u16) = (32630, 42630);
const GATEWAY_PORTS: (u16, u16) = (32640, 42640);
const VALIDATOR_PORTS: (u16, u16) = (32641, 42641);
const BEEHIVE_PORT: u16 = 12610;

/// Account the chain node mines to and unlocks
pub const ETHERBASE: &str = "0xCEeE442a149784faa65C35e328CCd64d874F9a02";

/// Host port a service listens on, if it has a fixed one
pub fn port(service: Service, mode: Mode) -> Option<u16> {
    let pick = |(http, https): (u16, u16)| match mode {
        Mode::Http => http,
        Mode::Https => https,
    };
    match service {
        Service::Mongo => Some(MONGODB_PORT),
        Service::Elastic => Some(ELASTIC_PORT),
        Service::Sso => Some(pick(SSO_PORTS)),
        Service::Index => Some(pick(INDEX_PORTS)),
        Service::Credit => Some(pick(CREDIT_PORTS)),
        Service::GatewayDashboard => Some(pick(GATEWAY_PORTS)),
        Service::GatewayValidator => Some(pick(VALIDATOR_PORTS)),
        Service::BeehiveManager => Some(BEEHIVE_PORT),
        Service::Blockchain => Some(BLOCKCHAIN_PORT),
        Service::Bee => Some(BEE_PORT),
        Service::BeeWorker(n) => worker_port(BEE_PORT, n),
        Service::Interceptor => None,
    }
}

/// Host port of a worker node, offset from the edge node's.
/// `None` when the offset leaves the port range.
pub fn worker_port(base: u16, worker: u8) -> Option<u16> {
    u16::from(worker)
        .checked_mul(10_000)
        .and_then(|offset| base.checked_add(offset))
}

/// Port of the dev server the backends redirect to
pub fn app_port(mode: Mode) -> u16 {
    match mode {
        Mode::Http => APP_PORT,
        Mode::Https => APP_HTTPS_PORT,
    }
}

fn url(mode: Mode, port: u16) -> String {
    format!("{}://localhost:{}", mode, port)
}

fn service_url(service: Service, mode: Mode) -> String {
    url(mode, port(service, mode).unwrap_or_default())
}

fn mongodb(db: &str) -> String {
    format!("mongodb://localhost:{}/{}", MONGODB_PORT, db)
}

fn table<const N: usize>(entries: [(&str, String); N]) -> IndexMap<String, String> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Mode independent defaults
pub fn static_env(service: Service) -> IndexMap<String, String> {
    let aspnet = || {
        table([
            ("ASPNETCORE_ENVIRONMENT", "Development".to_string()),
            ("Elastic:Urls:0", format!("http://localhost:{}", ELASTIC_PORT)),
        ])
    };

    match service {
        Service::Mongo | Service::Blockchain | Service::Interceptor => IndexMap::new(),
        Service::Elastic => table([
            ("discovery.type", "single-node".to_string()),
            ("ES_JAVA_OPTS", "-Xms256m -Xmx256m".to_string()),
        ]),
        Service::Sso => {
            let mut env = aspnet();
            env.extend(table([
                ("IdServer:SsoServer:AllowUnsafeConnection", "true".to_string()),
                ("ConnectionStrings:DataProtectionDb", mongodb("ethernaSSODataProtectionDev")),
                ("ConnectionStrings:HangfireDb", mongodb("ethernaSSOHangfireDev")),
                ("ConnectionStrings:ServiceSharedDb", mongodb("ethernaServiceSharedDev")),
                ("ConnectionStrings:SSOServerDb", mongodb("ethernaSSODev")),
            ]));
            env
        }
        Service::Index => {
            let mut env = aspnet();
            env.extend(table([
                ("SsoServer:AllowUnsafeConnection", "true".to_string()),
                ("ConnectionStrings:DataProtectionDb", mongodb("ethernaSharedDataProtectionDev")),
                ("ConnectionStrings:HangfireDb", mongodb("ethernaIndexHangfireDev")),
                ("ConnectionStrings:IndexDb", mongodb("ethernaIndexDev")),
                ("ConnectionStrings:ServiceSharedDb", mongodb("ethernaServiceSharedDev")),
            ]));
            env
        }
        Service::Credit => {
            let mut env = aspnet();
            env.extend(table([
                ("SsoServer:AllowUnsafeConnection", "true".to_string()),
                ("ConnectionStrings:DataProtectionDb", mongodb("ethernaSharedDataProtectionDev")),
                ("ConnectionStrings:HangfireDb", mongodb("ethernaCreditHangfireDev")),
                ("ConnectionStrings:CreditDb", mongodb("ethernaCreditDev")),
                ("ConnectionStrings:ServiceSharedDb", mongodb("ethernaServiceSharedDev")),
            ]));
            env
        }
        Service::GatewayDashboard | Service::GatewayValidator => {
            let mut env = aspnet();
            env.extend(table([
                ("ForwardedHeaders:KnownNetworks:0", "0.0.0.0/0".to_string()),
                ("SsoServer:AllowUnsafeConnection", "true".to_string()),
                ("ConnectionStrings:DataProtectionDb", mongodb("ethernaSharedDataProtectionDev")),
                ("ConnectionStrings:HangfireDb", mongodb("ethernaGatewayHangfireDev")),
                ("ConnectionStrings:GatewayDb", mongodb("ethernaGatewayDev")),
                ("ConnectionStrings:ServiceSharedDb", mongodb("ethernaServiceSharedDev")),
            ]));
            env
        }
        Service::BeehiveManager => {
            let mut env = aspnet();
            env.extend(table([
                ("SeedDb:BeeNodes:0:Hostname", "localhost".to_string()),
                ("ConnectionStrings:DataProtectionDb", mongodb("beehiveManagerDataProtectionDev")),
                ("ConnectionStrings:HangfireDb", mongodb("beehiveManagerHangfireDev")),
                ("ConnectionStrings:BeehiveManagerDb", mongodb("beehiveManagerDev")),
            ]));
            env
        }
        Service::Bee | Service::BeeWorker(_) => table([
            ("BEE_WARMUP_TIME", "10s".to_string()),
            ("BEE_DEBUG_API_ENABLE", "true".to_string()),
            ("BEE_VERBOSITY", "4".to_string()),
            ("BEE_SWAP_ENABLE", "true".to_string()),
            ("BEE_MAINNET", "false".to_string()),
            ("BEE_PASSWORD", "password".to_string()),
            ("BEE_SWAP_FACTORY_ADDRESS", "0xCfEB869F69431e42cdB54A4F4f105C19C080A601".to_string()),
            ("BEE_POSTAGE_STAMP_ADDRESS", "0x254dffcd3277C0b1660F6d42EFbB754edaBAbC2B".to_string()),
            ("BEE_PRICE_ORACLE_ADDRESS", "0x5b1869D9A4C187F2EAa108f3062412ecf0526b24".to_string()),
            (
                "BEE_REDISTRIBUTION_ADDRESS",
                "0x9561C133DD8580860B6b7E504bC5Aa500f0f06a7".to_string(),
            ),
            ("BEE_STAKING_ADDRESS", "0xD833215cBcc3f914bD1C9ece3EE7BF8B14f841bb".to_string()),
            ("BEE_POSTAGE_STAMP_START_BLOCK", "1".to_string()),
            ("BEE_NETWORK_ID", NETWORK_ID.to_string()),
            ("BEE_FULL_NODE", "true".to_string()),
            ("BEE_CORS_ALLOWED_ORIGINS", "*".to_string()),
            ("BEE_ALLOW_PRIVATE_CIDRS", "true".to_string()),
        ]),
    }
}

/// Values derived from the session: ports, URLs of other services and
/// https settings
pub fn session_env(service: Service, mode: Mode) -> IndexMap<String, String> {
    let sso = service_url(Service::Sso, mode);
    let own_url = || ("ASPNETCORE_URLS", service_url(service, mode));

    let mut env = match service {
        Service::Mongo | Service::Elastic | Service::Blockchain => IndexMap::new(),
        Service::Sso => table([
            own_url(),
            ("IdServer:SsoServer:BaseUrl", sso.clone()),
            ("IdServer:Clients:EthernaCredit:BaseUrl", service_url(Service::Credit, mode)),
            (
                "IdServer:Clients:EthernaGateway:BaseUrls:0",
                service_url(Service::GatewayDashboard, mode),
            ),
            ("IdServer:Clients:EthernaIndex:BaseUrl", service_url(Service::Index, mode)),
            ("IdServer:Clients:EthernaDapp:BaseUrl", url(mode, app_port(mode))),
        ]),
        Service::Index | Service::Credit => table([own_url(), ("SsoServer:BaseUrl", sso)]),
        Service::GatewayDashboard | Service::GatewayValidator => table([
            own_url(),
            ("SsoServer:BaseUrl", sso),
            ("SsoServer:Clients:Credit:BaseUrl", service_url(Service::Credit, mode)),
            ("BeehiveManager:Url", service_url(Service::BeehiveManager, mode)),
        ]),
        Service::BeehiveManager => table([own_url()]),
        Service::Bee | Service::BeeWorker(_) => table([
            ("BEE_SWAP_ENDPOINT", format!("http://localhost:{}", BLOCKCHAIN_PORT)),
            ("BEE_PORT", BEE_PORT.to_string()),
            ("BEE_API_ADDR", format!("0.0.0.0:{}", BEE_PORT)),
            ("BEE_P2P_ADDR", format!("0.0.0.0:{}", BEE_P2P_PORT)),
        ]),
        Service::Interceptor => table([
            ("BASE_HOST", "localhost".to_string()),
            ("BASE_HOST_PREFERRED_SCHEMA", mode.to_string()),
            ("BEENODE_CACHED_HOST", format!("localhost:{}", BEE_PORT)),
            ("BEENODE_CACHED_SCHEME", mode.to_string()),
            ("BEENODE_DIRECT_HOST", format!("localhost:{}", BEE_PORT)),
            ("BEENODE_DIRECT_SCHEME", mode.to_string()),
            (
                "DASHBOARD_HOST",
                format!("localhost:{}", port(Service::GatewayDashboard, mode).unwrap_or_default()),
            ),
            ("RESOLVER", "127.0.0.1".to_string()),
            (
                "VALIDATOR_HOST",
                format!("localhost:{}", port(Service::GatewayValidator, mode).unwrap_or_default()),
            ),
            ("VALIDATOR_SCHEME", mode.to_string()),
        ]),
    };

    if mode == Mode::Https && service.is_aspnet() {
        env.insert(
            "ASPNETCORE_Kestrel__Certificates__Default__Path".to_string(),
            format!("{}/{}", CONTAINER_CERTS_DIR, CERTIFICATE_PFX_NAME),
        );
        env.insert(
            "ASPNETCORE_Kestrel__Certificates__Default__Password".to_string(),
            CERTIFICATE_PASSWORD.to_string(),
        );
    }

    env
}

/// Merge environment layers; later layers win.
///
/// Called as `compose_env([static, session, overrides])` this gives
/// caller > session-computed > static precedence.
pub fn compose_env<'a>(
    layers: impl IntoIterator<Item = &'a IndexMap<String, String>>,
) -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    for layer in layers {
        for (k, v) in layer {
            env.insert(k.clone(), v.clone());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let static_layer = table([("A", "static".to_string()), ("B", "static".to_string())]);
        let session_layer = table([("B", "session".to_string()), ("C", "session".to_string())]);
        let overrides = table([("C", "caller".to_string())]);

        let env = compose_env([&static_layer, &session_layer, &overrides]);
        assert_eq!(env["A"], "static");
        assert_eq!(env["B"], "session");
        assert_eq!(env["C"], "caller");
    }

    #[test]
    fn test_mode_specific_urls() {
        let http = session_env(Service::Index, Mode::Http);
        assert_eq!(http["ASPNETCORE_URLS"], "http://localhost:32620");
        assert!(!http.contains_key("ASPNETCORE_Kestrel__Certificates__Default__Path"));

        let https = session_env(Service::Index, Mode::Https);
        assert_eq!(https["ASPNETCORE_URLS"], "https://localhost:42620");
        assert_eq!(https["SsoServer:BaseUrl"], "https://localhost:42610");
        assert!(https.contains_key("ASPNETCORE_Kestrel__Certificates__Default__Path"));
    }

    #[test]
    fn test_worker_ports() {
        assert_eq!(worker_port(BEE_PORT, 1), Some(11633));
        assert_eq!(port(Service::BeeWorker(2), Mode::Http), Some(21633));
        assert_eq!(worker_port(BEE_PORT, 7), None);
        assert_eq!(port(Service::BeeWorker(255), Mode::Http), None);
    }
}
