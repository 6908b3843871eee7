//! Configuration parser and validation

use crate::{
    Config, ConfigError, Result,
    resolver::{ResolutionContext, resolve_string, template_placeholders},
};
use std::collections::HashSet;
use std::path::Path;

const SUPPORTED_VERSION: &str = "1.0";

/// Parse a YAML configuration file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse YAML configuration from a string, resolving against the process environment
pub fn parse_str(content: &str) -> Result<Config> {
    parse_str_with_context(content, &ResolutionContext::new())
}

/// Parse YAML configuration from a string with an explicit resolution context
pub fn parse_str_with_context(content: &str, context: &ResolutionContext) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(content)?;
    resolve_settings(&mut config, context)?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve `${VAR}` references in the settings that accept them
///
/// Service commands are left alone: they run in a shell inside the service's
/// context and may legitimately contain `${VAR}` themselves.
fn resolve_settings(config: &mut Config, context: &ResolutionContext) -> Result<()> {
    config.remote.kube_context = resolve_optional(config.remote.kube_context.take(), context)?;
    config.remote.container = resolve_optional(config.remote.container.take(), context)?;
    config.credentials.secret_id = resolve_string(&config.credentials.secret_id, context)?;
    Ok(())
}

fn resolve_optional(value: Option<String>, context: &ResolutionContext) -> Result<Option<String>> {
    match value {
        Some(value) => {
            let resolved = resolve_string(&value, context)?;
            Ok(Some(resolved).filter(|v| !v.is_empty()))
        }
        None => Ok(None),
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.version != SUPPORTED_VERSION {
        return Err(invalid(format!(
            "Unsupported version: {}, expected {}",
            config.version, SUPPORTED_VERSION
        )));
    }

    validate_allow_list(config)?;
    validate_templates(config)?;

    if config.services.is_empty() {
        return Err(invalid("no services defined"));
    }

    let t = &config.timeouts;
    if t.probe_secs == 0 || t.migrate_secs == 0 || t.reset_secs == 0 || t.seed_secs == 0 {
        return Err(invalid("timeouts must be greater than zero"));
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            return Err(invalid("service with empty name"));
        }
        if !names.insert(service.name.as_str()) {
            return Err(invalid(format!("duplicate service '{}'", service.name)));
        }
        if service.seed.trim().is_empty() {
            return Err(invalid(format!("service '{}' has no seed command", service.name)));
        }
        if service.schemas.is_empty() {
            return Err(invalid(format!("service '{}' has no schemas", service.name)));
        }

        let mut schema_names = HashSet::new();
        for schema in &service.schemas {
            if !schema_names.insert(schema.name.as_str()) {
                return Err(invalid(format!(
                    "service '{}' declares schema '{}' twice",
                    service.name, schema.name
                )));
            }
            if schema.connection_env.is_empty() {
                return Err(invalid(format!(
                    "schema '{}' of service '{}' has no connection variable",
                    schema.name, service.name
                )));
            }
        }
    }

    validate_shared_schemas(config)
}

fn validate_allow_list(config: &Config) -> Result<()> {
    if config.allowed_clients.is_empty() {
        return Err(invalid("allowed_clients must not be empty"));
    }

    let mut seen = HashSet::new();
    for client in &config.allowed_clients {
        if client.is_empty() || client.chars().any(|c| c.is_whitespace()) {
            return Err(invalid(format!("invalid client name '{}'", client)));
        }
        if !seen.insert(client.as_str()) {
            return Err(invalid(format!("client '{}' listed twice", client)));
        }
    }
    Ok(())
}

fn validate_templates(config: &Config) -> Result<()> {
    let secret_placeholders = template_placeholders(&config.credentials.secret_id);
    // Without {service} every service would read the same secret
    if !secret_placeholders.iter().any(|p| p == "service") {
        return Err(invalid("credentials.secret_id must reference {service}"));
    }
    for placeholder in &secret_placeholders {
        if !matches!(placeholder.as_str(), "client" | "environment" | "service") {
            return Err(ConfigError::UnknownPlaceholder(placeholder.clone()));
        }
    }
    if config.credentials.command.is_empty() {
        return Err(invalid("credentials.command must not be empty"));
    }

    for placeholder in template_placeholders(&config.remote.pod_selector) {
        if placeholder != "service" {
            return Err(ConfigError::UnknownPlaceholder(placeholder));
        }
    }
    Ok(())
}

/// A shared schema must name an existing owner that declares the same schema
/// and owns it outright.
fn validate_shared_schemas(config: &Config) -> Result<()> {
    for service in &config.services {
        for schema in &service.schemas {
            let Some(owner_name) = &schema.shared_from else {
                continue;
            };

            if owner_name == &service.name {
                return Err(invalid(format!(
                    "service '{}' cannot share schema '{}' from itself",
                    service.name, schema.name
                )));
            }

            let owner = config.service(owner_name).ok_or_else(|| {
                invalid(format!(
                    "schema '{}' of service '{}' is shared from unknown service '{}'",
                    schema.name, service.name, owner_name
                ))
            })?;

            let owned = owner
                .schemas
                .iter()
                .find(|s| s.name == schema.name)
                .ok_or_else(|| {
                    invalid(format!(
                        "service '{}' does not declare schema '{}' shared with '{}'",
                        owner_name, schema.name, service.name
                    ))
                })?;

            if owned.shared_from.is_some() {
                return Err(invalid(format!(
                    "schema '{}' of service '{}' is itself shared and cannot be re-shared",
                    schema.name, owner_name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: "1.0"
allowed_clients: [qa]
services:
  - name: core-api
    tool: prisma
    schemas:
      - name: core
        connection_env: DATABASE_URL
        migrations: prisma/schema.prisma
    seed: npm run seed
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_str_with_context(MINIMAL, &ResolutionContext::empty()).unwrap();
        let service = &config.services[0];
        assert_eq!(service.workdir, "/app");
        assert_eq!(service.env_file, ".env");
        assert_eq!(config.remote.pod_selector, "app={service}");
        assert_eq!(config.timeouts.migrate_secs, 600);
        assert_eq!(config.credentials.secret_id, "{client}-{environment}/{service}");
    }

    #[test]
    fn test_unsupported_version() {
        let yaml = MINIMAL.replace("\"1.0\"", "\"2.0\"");
        let err = parse_str_with_context(&yaml, &ResolutionContext::empty()).unwrap_err();
        assert!(err.to_string().contains("Unsupported version"));
    }

    #[test]
    fn test_empty_kube_context_becomes_none() {
        let yaml = format!("{}remote:\n  kube_context: \"${{CTX:-}}\"\n", MINIMAL);
        let config = parse_str_with_context(&yaml, &ResolutionContext::empty()).unwrap();
        assert_eq!(config.remote.kube_context, None);

        let context = ResolutionContext::empty().with_var("CTX", "eks-prod");
        let config = parse_str_with_context(&yaml, &context).unwrap();
        assert_eq!(config.remote.kube_context.as_deref(), Some("eks-prod"));
    }

    #[test]
    fn test_secret_id_must_reference_service() {
        let yaml = format!(
            "{}credentials:\n  secret_id: \"{{client}}-{{environment}}\"\n",
            MINIMAL
        );
        let err = parse_str_with_context(&yaml, &ResolutionContext::empty()).unwrap_err();
        assert!(err.to_string().contains("{service}"));
    }
}
