//! Command-line interface for etherna-launch

use crate::config::{ConfigError, Mode, ServiceToggles, SessionConfig};
use argh::FromArgs;

/// Start the etherna development backends
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to a session config file (defaults are used when omitted)
    #[argh(option, short = 'c')]
    pub config: Option<String>,

    /// serve the backends over https
    #[argh(switch)]
    pub https: bool,

    /// container runtime CLI (default: docker)
    #[argh(option, short = 'r')]
    pub runtime: Option<String>,

    /// only start these services (comma-separated)
    #[argh(option, from_str_fn(parse_services))]
    pub only: Option<Vec<String>>,

    /// do not start these services (comma-separated)
    #[argh(option, from_str_fn(parse_services))]
    pub disable: Option<Vec<String>>,

    /// number of worker bee nodes (1-4)
    #[argh(option, short = 'w')]
    pub bee_workers: Option<u8>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate configuration and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse comma-separated service list
fn parse_services(s: &str) -> Result<Vec<String>, String> {
    Ok(s
        .split(',')
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

impl LaunchArgs {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut SessionConfig) -> Result<(), ConfigError> {
        if self.https {
            config.mode = Mode::Https;
        }
        if let Some(runtime) = &self.runtime {
            config.runtime = runtime.clone();
        }
        if let Some(only) = &self.only {
            let mut toggles = ServiceToggles::none();
            for key in only {
                toggles.set(key, true)?;
            }
            config.services = toggles;
        }
        if let Some(disable) = &self.disable {
            for key in disable {
                config.services.set(key, false)?;
            }
        }
        if let Some(workers) = self.bee_workers {
            config.bee_workers = workers;
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LaunchArgs {
        LaunchArgs::from_args(&["etherna_launch"], args).unwrap()
    }

    #[test]
    fn test_parse_services() {
        let result = parse_services("mongo, sso,,index");
        assert_eq!(
            result,
            Ok(vec!["mongo".to_string(), "sso".to_string(), "index".to_string()])
        );
    }

    #[test]
    fn test_defaults_leave_config_untouched() {
        let args = parse(&[]);
        let mut config = SessionConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config.mode, Mode::Http);
        assert_eq!(config.services, ServiceToggles::default());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let args = parse(&["--https", "--disable", "elastic,bee", "-w", "3", "-r", "podman"]);
        let mut config = SessionConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config.mode, Mode::Https);
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.bee_workers, 3);
        assert!(!config.services.elastic);
        assert!(!config.services.bee);
        assert!(config.services.mongo);
    }

    #[test]
    fn test_only_then_disable() {
        let args = parse(&["--only", "mongo,sso", "--disable", "sso"]);
        let mut config = SessionConfig::default();
        args.apply(&mut config).unwrap();
        let mut expected = ServiceToggles::none();
        expected.mongo = true;
        assert_eq!(config.services, expected);
    }

    #[test]
    fn test_unknown_service_rejected() {
        let args = parse(&["--disable", "redis"]);
        let mut config = SessionConfig::default();
        assert!(matches!(
            args.apply(&mut config),
            Err(ConfigError::UnknownService(name)) if name == "redis"
        ));
    }

    #[test]
    fn test_out_of_range_workers_rejected() {
        let args = parse(&["--bee-workers", "9"]);
        let mut config = SessionConfig::default();
        assert!(matches!(args.apply(&mut config), Err(ConfigError::Validation(_))));
    }
}
