//! Typed view over the working cluster configuration.
//!
//! The deployment layer treats configuration as a flat mapping from option
//! keys to stringly-stored values with typed accessors. Parsing of the
//! user-facing configuration sources happens upstream; this module only
//! provides the read/write surface that parameter construction and the
//! deploy routine rely on.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rill_types::defaults;

/// Option keys understood by the deployment layer.
///
/// The deploy routine mutates a small fixed set of these (execution mode,
/// entrypoint, the three exposed ports and the high-availability overrides);
/// everything else is read-only input.
pub mod keys {
    pub const CLUSTER_ID: &str = "kubernetes.cluster-id";
    pub const NAMESPACE: &str = "kubernetes.namespace";
    pub const CONTAINER_IMAGE: &str = "kubernetes.container.image";
    pub const CONTAINER_IMAGE_PULL_POLICY: &str = "kubernetes.container.image.pull-policy";
    pub const CONTAINER_IMAGE_PULL_SECRETS: &str = "kubernetes.container.image.pull-secrets";
    pub const SERVICE_ACCOUNT: &str = "kubernetes.service-account";
    pub const ADMIN_SERVICE_EXPOSED_TYPE: &str = "kubernetes.admin-service.exposed-type";
    pub const HOST_NETWORK_ENABLED: &str = "kubernetes.hostnetwork.enabled";
    pub const POD_TEMPLATE_FILE: &str = "kubernetes.pod-template-file";

    pub const COORDINATOR_LABELS: &str = "kubernetes.coordinator.labels";
    pub const COORDINATOR_ANNOTATIONS: &str = "kubernetes.coordinator.annotations";
    pub const COORDINATOR_NODE_SELECTOR: &str = "kubernetes.coordinator.node-selector";
    pub const COORDINATOR_TOLERATIONS: &str = "kubernetes.coordinator.tolerations";
    pub const COORDINATOR_ENV_PREFIX: &str = "kubernetes.coordinator.env.";
    pub const COORDINATOR_MEMORY_REQUEST_FACTOR: &str =
        "kubernetes.coordinator.memory.request-factor";
    pub const COORDINATOR_CPU_REQUEST_FACTOR: &str = "kubernetes.coordinator.cpu.request-factor";

    pub const WORKER_LABELS: &str = "kubernetes.worker.labels";
    pub const WORKER_ANNOTATIONS: &str = "kubernetes.worker.annotations";
    pub const WORKER_NODE_SELECTOR: &str = "kubernetes.worker.node-selector";
    pub const WORKER_TOLERATIONS: &str = "kubernetes.worker.tolerations";
    pub const WORKER_ENV_PREFIX: &str = "kubernetes.worker.env.";
    pub const WORKER_MEMORY_REQUEST_FACTOR: &str = "kubernetes.worker.memory.request-factor";
    pub const WORKER_CPU_REQUEST_FACTOR: &str = "kubernetes.worker.cpu.request-factor";
    pub const WORKER_EXTERNAL_RESOURCE_PREFIX: &str = "kubernetes.worker.external-resource.";
    pub const WORKER_MEMORY_MB: &str = "worker.memory.mb";
    pub const WORKER_CPU: &str = "worker.cpu";

    pub const DEPLOYMENT_TARGET: &str = "deployment.target";
    pub const EXECUTION_MODE: &str = "internal.cluster.execution-mode";
    pub const ENTRYPOINT: &str = "internal.cluster.entrypoint";

    pub const COORDINATOR_RPC_PORT: &str = "coordinator.rpc.port";
    pub const WORKER_RPC_PORT: &str = "worker.rpc.port";
    pub const ARTIFACT_SERVER_PORT: &str = "artifact-server.port";
    pub const ADMIN_BIND_PORT: &str = "admin.bind-port";
    pub const ADMIN_ADDRESS: &str = "admin.address";
    pub const ADMIN_PORT: &str = "admin.port";

    pub const HIGH_AVAILABILITY_MODE: &str = "high-availability.mode";
    pub const HIGH_AVAILABILITY_CLUSTER_ID: &str = "high-availability.cluster-id";
    pub const HIGH_AVAILABILITY_PORT_RANGE: &str = "high-availability.coordinator.port-range";

    pub const APPLICATION_ARTIFACTS: &str = "application.artifacts";
    pub const APPLICATION_ENTRYPOINT: &str = "application.entrypoint";
    pub const APPLICATION_ARGS: &str = "application.args";
}

/// Separator for list-valued options.
const LIST_SEPARATOR: char = ';';

/// Errors raised while reading configuration values
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value '{value}' for option '{key}', expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("could not read configuration file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Flat key/value configuration with typed accessors.
///
/// Values are stored as strings and parsed on read, so the same map can be
/// loaded from a YAML file, assembled programmatically, or merged from an
/// application configuration without schema coupling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a YAML mapping of option keys to scalar
    /// values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let mut config = Self::new();
        for (key, value) in raw {
            let rendered = match value {
                serde_yaml::Value::String(value) => value,
                serde_yaml::Value::Bool(value) => value.to_string(),
                serde_yaml::Value::Number(value) => value.to_string(),
                other => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        value: format!("{other:?}"),
                        expected: "a scalar value",
                    });
                }
            };
            config.entries.insert(key, rendered);
        }
        debug!(path = %path.display(), entries = config.entries.len(), "loaded configuration file");
        Ok(config)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|value| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Parses the value under `key`. Unset keys are `Ok(None)`; a present but
    /// malformed value is an error rather than a silent fallback.
    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: raw.to_owned(),
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    pub fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        Ok(self.parsed(key)?.unwrap_or(default))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        self.parsed_or(key, default)
    }

    /// List-valued options use a `;`-separated encoding. Empty segments are
    /// dropped so trailing separators are harmless.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_list(&mut self, key: impl Into<String>, values: &[String]) {
        self.set(key, values.join(&LIST_SEPARATOR.to_string()));
    }

    /// Extracts `KEY -> value` pairs for every entry under `prefix`,
    /// preserving the map's iteration order.
    pub fn prefixed(&self, prefix: &str) -> BTreeMap<String, String> {
        self.entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key[prefix.len()..].to_owned(), value.clone()))
            .collect()
    }

    /// Parses a `k=v` list option into an ordered map.
    pub fn get_map(&self, key: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut map = BTreeMap::new();
        for entry in self.get_list(key) {
            let (k, v) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: entry.clone(),
                    expected: "key=value",
                })?;
            map.insert(k.trim().to_owned(), v.trim().to_owned());
        }
        Ok(map)
    }
}

/// Pins a port option to `fixed` when it is unset or holds anything other
/// than a single port number (e.g. a `50100-50200` range). The platform has
/// to expose a deterministic port set for service routing, so ranges cannot
/// survive into the pod specification.
pub(crate) fn ensure_fixed_port(config: &mut Configuration, key: &str, fixed: u16) {
    match config.get(key) {
        Some(value) if value.parse::<u16>().is_ok() => {}
        Some(other) => {
            info!(
                key,
                configured = other,
                port = fixed,
                "pinning non-fixed port option to well-known port"
            );
            config.set(key, fixed);
        }
        None => config.set(key, fixed),
    }
}

/// High-availability mode is active for any configured mode other than
/// `none`.
pub(crate) fn high_availability_active(config: &Configuration) -> bool {
    config
        .get(keys::HIGH_AVAILABILITY_MODE)
        .map(|mode| !mode.eq_ignore_ascii_case("none"))
        .unwrap_or(false)
}

/// Where a deployment is directed: a long-lived session cluster or a cluster
/// dedicated to a single pre-packaged application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentTarget {
    Session,
    Application,
}

impl DeploymentTarget {
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        match config.get(keys::DEPLOYMENT_TARGET) {
            None => Ok(Self::Session),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: keys::DEPLOYMENT_TARGET.to_owned(),
                value: raw.to_owned(),
                expected: "'session' or 'application'",
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Application => "application",
        }
    }
}

impl FromStr for DeploymentTarget {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "application" => Ok(Self::Application),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the administrative service is exposed outside the pod network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExposedType {
    ClusterIp,
    NodePort,
    LoadBalancer,
}

impl ServiceExposedType {
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        match config.get(keys::ADMIN_SERVICE_EXPOSED_TYPE) {
            None => Ok(Self::LoadBalancer),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: keys::ADMIN_SERVICE_EXPOSED_TYPE.to_owned(),
                value: raw.to_owned(),
                expected: "'ClusterIP', 'NodePort' or 'LoadBalancer'",
            }),
        }
    }

    /// The value the platform expects in a service specification.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }

    /// Whether administrative traffic stays inside the cluster network.
    pub fn is_cluster_internal(&self) -> bool {
        matches!(self, Self::ClusterIp)
    }
}

impl FromStr for ServiceExposedType {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "ClusterIP" => Ok(Self::ClusterIp),
            "NodePort" => Ok(Self::NodePort),
            "LoadBalancer" => Ok(Self::LoadBalancer),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ServiceExposedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of the application payload a dedicated cluster runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationConfig {
    entrypoint: Option<String>,
    args: Vec<String>,
}

impl ApplicationConfig {
    pub fn new(entrypoint: Option<String>, args: Vec<String>) -> Self {
        Self { entrypoint, args }
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Folds the application payload into the working configuration so that
    /// parameter construction sees one consistent view.
    pub fn apply_to_configuration(&self, config: &mut Configuration) {
        if let Some(entrypoint) = &self.entrypoint {
            config.set(keys::APPLICATION_ENTRYPOINT, entrypoint);
        }
        if !self.args.is_empty() {
            config.set_list(keys::APPLICATION_ARGS, &self.args);
        }
    }

    /// Script payloads are launched through the bundled script runner and
    /// carry no application artifact of their own, so the single-artifact
    /// validation does not apply to them.
    pub fn is_script_payload(&self) -> bool {
        self.entrypoint() == Some(defaults::SCRIPT_RUNNER_ENTRYPOINT)
            || self.args.iter().any(|arg| arg == "--script")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let mut config = Configuration::new();
        config.set(keys::ADMIN_BIND_PORT, 8081u16);
        config.set(keys::HOST_NETWORK_ENABLED, true);

        let port: Option<u16> = config.parsed(keys::ADMIN_BIND_PORT).expect("parses");
        assert_eq!(port, Some(8081));
        assert!(config.get_bool(keys::HOST_NETWORK_ENABLED, false).unwrap());
        assert!(!config.get_bool("unset.key", false).unwrap());
    }

    #[test]
    fn test_from_file_renders_scalars() {
        let dir = std::env::temp_dir().join("rill-config-test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("cluster.yaml");
        std::fs::write(
            &path,
            "kubernetes.cluster-id: pipeline-7\nadmin.bind-port: 8081\nkubernetes.hostnetwork.enabled: true\n",
        )
        .expect("write config");

        let config = Configuration::from_file(&path).expect("loads");
        assert_eq!(config.get(keys::CLUSTER_ID), Some("pipeline-7"));
        assert_eq!(config.get(keys::ADMIN_BIND_PORT), Some("8081"));
        assert_eq!(config.get(keys::HOST_NETWORK_ENABLED), Some("true"));
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let mut config = Configuration::new();
        config.set(keys::ADMIN_BIND_PORT, "not-a-port");

        let result: Result<Option<u16>, _> = config.parsed(keys::ADMIN_BIND_PORT);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_prefixed_entries() {
        let mut config = Configuration::new();
        config.set("kubernetes.coordinator.env.LOG_LEVEL", "debug");
        config.set("kubernetes.coordinator.env.AREA", "eu-1");
        config.set("kubernetes.coordinator.labels", "tier=control");

        let env = config.prefixed(keys::COORDINATOR_ENV_PREFIX);
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(env.get("AREA").map(String::as_str), Some("eu-1"));
    }

    #[test]
    fn test_fixed_port_is_left_alone() {
        let mut config = Configuration::new();
        config.set(keys::WORKER_RPC_PORT, 7001u16);
        ensure_fixed_port(&mut config, keys::WORKER_RPC_PORT, 6122);
        assert_eq!(config.get(keys::WORKER_RPC_PORT), Some("7001"));
    }

    #[test]
    fn test_range_and_unset_ports_are_pinned() {
        let mut config = Configuration::new();
        config.set(keys::WORKER_RPC_PORT, "50100-50200");
        ensure_fixed_port(&mut config, keys::WORKER_RPC_PORT, 6122);
        assert_eq!(config.get(keys::WORKER_RPC_PORT), Some("6122"));

        ensure_fixed_port(&mut config, keys::ADMIN_BIND_PORT, 8081);
        assert_eq!(config.get(keys::ADMIN_BIND_PORT), Some("8081"));
    }

    #[test]
    fn test_high_availability_detection() {
        let mut config = Configuration::new();
        assert!(!high_availability_active(&config));

        config.set(keys::HIGH_AVAILABILITY_MODE, "none");
        assert!(!high_availability_active(&config));

        config.set(keys::HIGH_AVAILABILITY_MODE, "zookeeper");
        assert!(high_availability_active(&config));
    }

    #[test]
    fn test_application_config_apply() {
        let app = ApplicationConfig::new(
            Some("com.example.Tally".to_owned()),
            vec!["--input".to_owned(), "orders".to_owned()],
        );
        let mut config = Configuration::new();
        app.apply_to_configuration(&mut config);

        assert_eq!(
            config.get(keys::APPLICATION_ENTRYPOINT),
            Some("com.example.Tally")
        );
        assert_eq!(
            config.get_list(keys::APPLICATION_ARGS),
            vec!["--input".to_owned(), "orders".to_owned()]
        );
        assert!(!app.is_script_payload());
    }

    #[test]
    fn test_script_payload_detection() {
        let by_entrypoint = ApplicationConfig::new(
            Some(defaults::SCRIPT_RUNNER_ENTRYPOINT.to_owned()),
            vec![],
        );
        assert!(by_entrypoint.is_script_payload());

        let by_args =
            ApplicationConfig::new(None, vec!["--script".to_owned(), "job.lua".to_owned()]);
        assert!(by_args.is_script_payload());
    }
}
