//! The etherna service topology

mod catalog;
pub mod envs;

pub use catalog::*;

use std::fmt;

/// Every service the launcher knows how to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Mongo,
    Elastic,
    Sso,
    Index,
    Credit,
    GatewayDashboard,
    GatewayValidator,
    BeehiveManager,
    Blockchain,
    /// Edge (bootstrapping) bee node
    Bee,
    /// Worker bee node joining the edge node, numbered from 1
    BeeWorker(u8),
    Interceptor,
}

impl Service {
    /// Container name
    pub fn name(&self) -> String {
        match self {
            Service::Mongo => "etherna-mongodb".to_string(),
            Service::Elastic => "elastic".to_string(),
            Service::Sso => "etherna-sso".to_string(),
            Service::Index => "etherna-index".to_string(),
            Service::Credit => "etherna-credit".to_string(),
            Service::GatewayDashboard => "etherna-gateway-dashboard".to_string(),
            Service::GatewayValidator => "etherna-gateway-validator".to_string(),
            Service::BeehiveManager => "etherna-beehive-manager".to_string(),
            Service::Blockchain => "etherna-blockchain".to_string(),
            Service::Bee => "etherna-bee".to_string(),
            Service::BeeWorker(n) => format!("etherna-bee_worker_{}", n),
            Service::Interceptor => "etherna-interceptor".to_string(),
        }
    }

    /// ASP.NET backends share their image conventions and readiness rule
    pub fn is_aspnet(&self) -> bool {
        matches!(
            self,
            Service::Sso
                | Service::Index
                | Service::Credit
                | Service::GatewayDashboard
                | Service::GatewayValidator
                | Service::BeehiveManager
        )
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
