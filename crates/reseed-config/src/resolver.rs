//! Environment variable and template placeholder resolution
//!
//! Two substitution syntaxes appear in the configuration:
//! - environment variables: `${VAR}` and `${VAR:-default}`, resolved once at load time
//! - template placeholders: `{client}`, `{environment}`, `{service}`, rendered per lookup

use crate::{ConfigError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Context for resolving variables
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Environment variables visible to the configuration
    pub env_vars: HashMap<String, String>,
}

impl ResolutionContext {
    /// Create a context from the process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Create a context with no variables at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add or override a variable
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

/// Resolve `${VAR}` and `${VAR:-default}` references in a string
pub fn resolve_string(input: &str, context: &ResolutionContext) -> Result<String> {
    let mut missing = Vec::new();

    let resolved = ENV_VAR_RE.replace_all(input, |cap: &Captures<'_>| {
        let expr = &cap[1];
        let (name, default) = match expr.find(":-") {
            Some(pos) => (&expr[..pos], Some(&expr[pos + 2..])),
            None => (expr, None),
        };

        match (context.env_vars.get(name), default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(resolved.into_owned())
}

/// Render `{placeholder}` references in a template
///
/// Every placeholder must have a value; unknown placeholders are an error
/// rather than being left in the output.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> Result<String> {
    let mut unknown = Vec::new();

    let rendered = PLACEHOLDER_RE.replace_all(template, |cap: &Captures<'_>| {
        let key = &cap[1];
        match values.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => value.to_string(),
            None => {
                unknown.push(key.to_string());
                String::new()
            }
        }
    });

    if !unknown.is_empty() {
        return Err(ConfigError::UnknownPlaceholder(unknown.join(", ")));
    }

    Ok(rendered.into_owned())
}

/// List the placeholders a template references
pub fn template_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_vars() {
        let context = ResolutionContext::empty().with_var("KUBE_CONTEXT", "prod-eu");

        assert_eq!(resolve_string("${KUBE_CONTEXT}", &context).unwrap(), "prod-eu");
        assert_eq!(resolve_string("ctx-${KUBE_CONTEXT}-1", &context).unwrap(), "ctx-prod-eu-1");
        assert_eq!(resolve_string("${MISSING:-fallback}", &context).unwrap(), "fallback");
        assert_eq!(resolve_string("${MISSING:-}", &context).unwrap(), "");
        assert_eq!(resolve_string("no refs", &context).unwrap(), "no refs");
    }

    #[test]
    fn test_missing_env_vars_are_reported_together() {
        let err = resolve_string("${A} ${B}", &ResolutionContext::empty()).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound(ref vars) if vars == "A, B"));
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "{client}-{environment}/{service}",
            &[("client", "qa"), ("environment", "sandbox"), ("service", "core-api")],
        )
        .unwrap();
        assert_eq!(rendered, "qa-sandbox/core-api");
    }

    #[test]
    fn test_render_template_rejects_unknown_placeholder() {
        let err = render_template("{client}/{region}", &[("client", "qa")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlaceholder(ref p) if p == "region"));
    }

    #[test]
    fn test_template_placeholders() {
        assert_eq!(
            template_placeholders("app={service},tier={environment}"),
            vec!["service".to_string(), "environment".to_string()]
        );
    }
}
