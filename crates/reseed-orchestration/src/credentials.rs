//! Credential provider boundary
//!
//! Secrets are fetched per `(target, service)`. A missing secret is a normal
//! answer ([`Lookup::NotFound`]); anything else going wrong is an
//! [`Error::Provider`].

use crate::{Error, Result, Target};
use async_trait::async_trait;
use command_executor::{Command, Launcher, backends::LocalLauncher};
use reseed_config::{Config, resolver::render_template};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Flat key/value configuration for one service
pub type ConfigMap = BTreeMap<String, String>;

/// Result of a credential lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The secret exists
    Found(ConfigMap),
    /// No secret is provisioned for this service in this target
    NotFound,
}

/// Source of per-service configuration
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch the configuration map for a service in a target
    async fn fetch(&self, target: &Target, service: &str) -> Result<Lookup>;
}

/// Fetches secrets by running a secrets CLI
///
/// The rendered secret identifier is appended to the configured command and
/// the output must be a flat JSON object.
#[derive(Debug, Clone)]
pub struct CommandCredentialProvider {
    command: Vec<String>,
    secret_id: String,
    timeout: Duration,
}

impl CommandCredentialProvider {
    /// Create a provider from a command line and a secret id template
    pub fn new(command: Vec<String>, secret_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command,
            secret_id: secret_id.into(),
            timeout,
        }
    }

    /// Create a provider from the credentials section of the configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.credentials.command.clone(),
            config.credentials.secret_id.clone(),
            config.timeouts.probe(),
        )
    }

    /// Secret identifier for a service in a target
    pub fn secret_id(&self, target: &Target, service: &str) -> Result<String> {
        let environment = target.environment().to_string();
        Ok(render_template(
            &self.secret_id,
            &[
                ("client", target.client()),
                ("environment", &environment),
                ("service", service),
            ],
        )?)
    }
}

#[async_trait]
impl CredentialProvider for CommandCredentialProvider {
    async fn fetch(&self, target: &Target, service: &str) -> Result<Lookup> {
        let secret_id = self.secret_id(target, service)?;
        let provider_error = |reason: String| Error::Provider {
            service: service.to_string(),
            reason,
        };

        let Some((program, args)) = self.command.split_first() else {
            return Err(provider_error("no secrets command configured".to_string()));
        };

        let mut command = Command::new(program);
        command.args(args).arg(&secret_id);

        debug!(service, secret_id, "fetching credentials");
        let result = LocalLauncher
            .execute_with_timeout(command, self.timeout)
            .await
            .map_err(|e| provider_error(e.to_string()))?;

        if !result.success() {
            if result.output.contains("ResourceNotFoundException") {
                return Ok(Lookup::NotFound);
            }
            let detail = result.output.lines().last().unwrap_or("").trim().to_string();
            return Err(provider_error(format!(
                "secrets command failed with {}: {}",
                result.status, detail
            )));
        }

        parse_secret(&result.output)
            .map(Lookup::Found)
            .map_err(provider_error)
    }
}

/// Parse a secret payload: a flat JSON object of scalar values
fn parse_secret(payload: &str) -> std::result::Result<ConfigMap, String> {
    let value: serde_json::Value = serde_json::from_str(payload.trim())
        .map_err(|e| format!("secret is not valid JSON: {}", e))?;

    let serde_json::Value::Object(object) = value else {
        return Err("secret is not a JSON object".to_string());
    };

    let mut map = ConfigMap::new();
    for (key, value) in object {
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            _ => return Err(format!("secret key '{}' is not a scalar", key)),
        };
        map.insert(key, value);
    }
    Ok(map)
}

/// Fixed credentials, keyed by service name
///
/// Used for local workspaces (`--credentials <file>`) and in tests. Services
/// without an entry are reported as not found.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    services: HashMap<String, ConfigMap>,
}

impl StaticCredentialProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service's configuration
    pub fn with_service(mut self, service: impl Into<String>, config: ConfigMap) -> Self {
        self.services.insert(service.into(), config);
        self
    }

    /// Load a YAML file mapping service names to flat key/value maps
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let services: HashMap<String, ConfigMap> =
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Other(format!("invalid credentials file {}: {}", path.display(), e))
            })?;
        Ok(Self { services })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(&self, _target: &Target, service: &str) -> Result<Lookup> {
        Ok(match self.services.get(service) {
            Some(config) => Lookup::Found(config.clone()),
            None => Lookup::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllowList, Mode, TargetResolver};
    use std::io::Write;

    fn target() -> Target {
        TargetResolver::new(AllowList::new(["qa"]))
            .resolve("qa", "sandbox", Mode::Remote)
            .unwrap()
    }

    fn provider(script: &str) -> CommandCredentialProvider {
        CommandCredentialProvider::new(
            vec!["sh".into(), "-c".into(), script.into(), "secrets".into()],
            "{client}-{environment}/{service}",
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_parse_secret() {
        let map = parse_secret(r#"{"DATABASE_URL": "postgres://db", "PORT": 5432, "DEBUG": false}"#)
            .unwrap();
        assert_eq!(map["DATABASE_URL"], "postgres://db");
        assert_eq!(map["PORT"], "5432");
        assert_eq!(map["DEBUG"], "false");

        assert!(parse_secret(r#"{"nested": {"a": 1}}"#).is_err());
        assert!(parse_secret("[1, 2]").is_err());
        assert!(parse_secret("not json").is_err());
    }

    #[test]
    fn test_secret_id_template() {
        let provider = provider("true");
        assert_eq!(
            provider.secret_id(&target(), "core-api").unwrap(),
            "qa-sandbox/core-api"
        );
    }

    #[smol_potat::test]
    async fn test_command_provider_found() {
        // The secret id arrives as $1
        let provider = provider(r#"printf '{"SECRET_ID": "%s"}' "$1""#);
        let lookup = provider.fetch(&target(), "auth-api").await.unwrap();
        let Lookup::Found(map) = lookup else {
            panic!("expected secret to be found");
        };
        assert_eq!(map["SECRET_ID"], "qa-sandbox/auth-api");
    }

    #[smol_potat::test]
    async fn test_command_provider_not_found() {
        let provider = provider(
            "echo 'An error occurred (ResourceNotFoundException) when calling the GetSecretValue operation' >&2; exit 254",
        );
        let lookup = provider.fetch(&target(), "workflow-api").await.unwrap();
        assert_eq!(lookup, Lookup::NotFound);
    }

    #[smol_potat::test]
    async fn test_command_provider_error() {
        let provider = provider("echo 'Unable to locate credentials' >&2; exit 255");
        let err = provider.fetch(&target(), "core-api").await.unwrap_err();
        assert!(matches!(err, Error::Provider { ref service, .. } if service == "core-api"));
        assert!(err.to_string().contains("Unable to locate credentials"));
    }

    #[smol_potat::test]
    async fn test_static_provider_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "core-api:\n  DATABASE_URL: postgres://localhost/core").unwrap();

        let provider = StaticCredentialProvider::from_yaml_file(file.path()).unwrap();
        let found = provider.fetch(&target(), "core-api").await.unwrap();
        assert!(matches!(found, Lookup::Found(map) if map.len() == 1));
        assert_eq!(
            provider.fetch(&target(), "auth-api").await.unwrap(),
            Lookup::NotFound
        );
    }
}
