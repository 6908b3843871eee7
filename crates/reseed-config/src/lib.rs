//! # Reseed Configuration
//!
//! YAML configuration for the platform reseed orchestrator.
//!
//! The configuration carries the client allow-list, the declarative service
//! table (services, their schemas and which schemas are shared), how
//! credentials are looked up, how pods are located, and the timeout policy for
//! every kind of service operation. A built-in default is embedded in the
//! binary; a file passed on the command line replaces it.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub mod parser;
pub mod resolver;

/// Built-in configuration shipped with the binary
pub const DEFAULT_CONFIG: &str = include_str!("../defaults/reseed.yaml");

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// A `{placeholder}` in a template has no value
    #[error("Unknown template placeholder: {0}")]
    UnknownPlaceholder(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Clients a run may target; matched exactly
    pub allowed_clients: Vec<String>,

    /// How service credentials are looked up
    #[serde(default)]
    pub credentials: CredentialSettings,

    /// How services are reached inside the cluster
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Timeout policy for service operations
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Service table, in the fixed order runs use when no dependency applies
    pub services: Vec<ServiceDef>,
}

impl Config {
    /// Load the configuration from `path`, or the built-in default
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => parser::parse_file(path),
            None => parser::parse_str(DEFAULT_CONFIG),
        }
    }

    /// Look up a service definition by name
    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Credential lookup settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialSettings {
    /// Secret identifier template; `{client}`, `{environment}` and `{service}` are substituted
    #[serde(default = "default_secret_id")]
    pub secret_id: String,

    /// Secrets CLI invocation; the rendered secret id is appended as the last argument
    #[serde(default = "default_secret_command")]
    pub command: Vec<String>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            secret_id: default_secret_id(),
            command: default_secret_command(),
        }
    }
}

fn default_secret_id() -> String {
    "{client}-{environment}/{service}".to_string()
}

fn default_secret_command() -> Vec<String> {
    [
        "aws",
        "secretsmanager",
        "get-secret-value",
        "--query",
        "SecretString",
        "--output",
        "text",
        "--secret-id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Cluster access settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSettings {
    /// kubeconfig context; empty means the current context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,

    /// Label selector template used to find a service's pod; `{service}` is substituted
    #[serde(default = "default_pod_selector")]
    pub pod_selector: String,

    /// Container to exec into when a pod runs several
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            kube_context: None,
            pod_selector: default_pod_selector(),
            container: None,
        }
    }
}

fn default_pod_selector() -> String {
    "app={service}".to_string()
}

/// Timeout policy, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// Read probes, tool checks and config file operations
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    /// Applying pending migrations for one schema
    #[serde(default = "default_migrate_secs")]
    pub migrate_secs: u64,
    /// Destructive schema reset (local workspaces only)
    #[serde(default = "default_reset_secs")]
    pub reset_secs: u64,
    /// Running a service's seed entry point
    #[serde(default = "default_seed_secs")]
    pub seed_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            migrate_secs: default_migrate_secs(),
            reset_secs: default_reset_secs(),
            seed_secs: default_seed_secs(),
        }
    }
}

impl Timeouts {
    /// Probe timeout
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    /// Per-schema migration timeout
    pub fn migrate(&self) -> Duration {
        Duration::from_secs(self.migrate_secs)
    }

    /// Per-schema reset timeout
    pub fn reset(&self) -> Duration {
        Duration::from_secs(self.reset_secs)
    }

    /// Seed timeout
    pub fn seed(&self) -> Duration {
        Duration::from_secs(self.seed_secs)
    }
}

fn default_probe_secs() -> u64 {
    30
}

fn default_migrate_secs() -> u64 {
    600
}

fn default_reset_secs() -> u64 {
    300
}

fn default_seed_secs() -> u64 {
    900
}

/// Migration tool family a service uses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Prisma (`npx prisma ...`), schema-file driven
    Prisma,
    /// Alembic (`alembic -c <ini> ...`), migration-directory driven
    Alembic,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Prisma => write!(f, "prisma"),
            ToolKind::Alembic => write!(f, "alembic"),
        }
    }
}

/// One row of the service table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDef {
    /// Service name; also the pod selector value and local directory name
    pub name: String,

    /// Migration tool family
    pub tool: ToolKind,

    /// Schemas the service migrates, in order
    pub schemas: Vec<SchemaDef>,

    /// Seed entry point, run through `sh -c`
    pub seed: String,

    /// Configuration keys required beyond the schema connection variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_keys: Vec<String>,

    /// Working directory inside the service's container
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Directory under the local workspace root; defaults to the service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Configuration file the credentials are materialised into
    #[serde(default = "default_env_file")]
    pub env_file: String,
}

fn default_workdir() -> String {
    "/app".to_string()
}

fn default_env_file() -> String {
    ".env".to_string()
}

/// A migratable schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDef {
    /// Logical schema name
    pub name: String,

    /// Configuration key holding the connection string
    pub connection_env: String,

    /// Prisma schema file or Alembic ini file, relative to the service directory
    pub migrations: String,

    /// Owning service when the schema is shared; only the owner may drop it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_from: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_loads() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.services.len(), 6);
        assert!(config.allowed_clients.contains(&"qa".to_string()));

        let data_builder = config.service("data-builder").unwrap();
        assert_eq!(data_builder.schemas.len(), 2);
        assert_eq!(data_builder.schemas[1].shared_from.as_deref(), Some("core-api"));
    }

    #[test]
    fn test_tool_kind_display() {
        assert_eq!(ToolKind::Prisma.to_string(), "prisma");
        assert_eq!(ToolKind::Alembic.to_string(), "alembic");
    }
}
