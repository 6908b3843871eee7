//! Target resolution and the client allow-list
//!
//! A [`Target`] is the only thing that says *where* a run may act. It is built
//! once from operator input, checked against an immutable [`AllowList`], and
//! then passed by reference through every call.

use crate::{Error, Result};
use reseed_config::Config;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Environment of a client deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Sandbox / pre-production data
    Sandbox,
    /// Production data
    Production,
}

impl Environment {
    /// Parse an environment name; only the exact lowercase names are accepted
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sandbox" => Some(Environment::Sandbox),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where services are reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Mode {
    /// Deployed pods in the `<client>-<environment>` namespace
    Remote,
    /// Checked-out service repositories under a workspace root
    Local {
        /// Workspace root holding one directory per service
        root: PathBuf,
    },
}

/// A validated run target; immutable once resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    client: String,
    environment: Environment,
    #[serde(flatten)]
    mode: Mode,
}

impl Target {
    /// Client name
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Execution mode
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Returns true for local workspace targets
    pub fn is_local(&self) -> bool {
        matches!(self.mode, Mode::Local { .. })
    }

    /// `<client>-<environment>`; the namespace for remote targets
    pub fn label(&self) -> String {
        format!("{}-{}", self.client, self.environment)
    }

    /// Namespace holding the target's pods
    pub fn namespace(&self) -> String {
        self.label()
    }

    /// Canonical identifier: the namespace, or the workspace root in local mode
    pub fn canonical_id(&self) -> String {
        match &self.mode {
            Mode::Remote => self.label(),
            Mode::Local { root } => root.display().to_string(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mode {
            Mode::Remote => write!(f, "{} (namespace {})", self.label(), self.namespace()),
            Mode::Local { root } => write!(f, "{} (workspace {})", self.label(), root.display()),
        }
    }
}

/// Clients a run may target, matched exactly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    clients: BTreeSet<String>,
}

impl AllowList {
    /// Build an allow-list from client names
    pub fn new<I, S>(clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clients: clients.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact membership test; no prefix, substring or case folding
    pub fn contains(&self, client: &str) -> bool {
        self.clients.contains(client)
    }

    /// Allowed clients in sorted order
    pub fn clients(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(String::as_str)
    }
}

/// Resolves operator input into a [`Target`]
#[derive(Debug, Clone)]
pub struct TargetResolver {
    allow_list: AllowList,
}

impl TargetResolver {
    /// Create a resolver over an allow-list
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// Create a resolver from the configured allow-list
    pub fn from_config(config: &Config) -> Self {
        Self::new(AllowList::new(config.allowed_clients.iter().cloned()))
    }

    /// Resolve `(client, environment)` in the given mode
    ///
    /// Performs no I/O; a local workspace root is only checked when services
    /// are located.
    pub fn resolve(&self, client: &str, environment: &str, mode: Mode) -> Result<Target> {
        if !self.allow_list.contains(client) {
            return Err(Error::InvalidTarget(format!(
                "client '{}' is not in the allow-list",
                client
            )));
        }

        let environment = Environment::parse(environment).ok_or_else(|| {
            Error::InvalidTarget(format!(
                "environment '{}' must be exactly 'sandbox' or 'production'",
                environment
            ))
        })?;

        Ok(Target {
            client: client.to_string(),
            environment,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TargetResolver {
        TargetResolver::new(AllowList::new(["qa", "demo"]))
    }

    #[test]
    fn test_resolve_remote_target() {
        let target = resolver().resolve("qa", "sandbox", Mode::Remote).unwrap();
        assert_eq!(target.client(), "qa");
        assert_eq!(target.environment(), Environment::Sandbox);
        assert_eq!(target.canonical_id(), "qa-sandbox");
        assert_eq!(target.namespace(), "qa-sandbox");
        assert!(!target.is_local());
    }

    #[test]
    fn test_resolve_local_target() {
        let mode = Mode::Local {
            root: PathBuf::from("/work/demo"),
        };
        let target = resolver().resolve("demo", "production", mode).unwrap();
        assert_eq!(target.canonical_id(), "/work/demo");
        assert_eq!(target.label(), "demo-production");
        assert!(target.is_local());
    }

    #[test]
    fn test_allow_list_is_exact() {
        for client in ["acme", "q", "qa2", "QA", " qa", "qa ", "qa-sandbox", ""] {
            let err = resolver().resolve(client, "sandbox", Mode::Remote).unwrap_err();
            assert!(matches!(err, Error::InvalidTarget(_)), "client {:?}", client);
        }
    }

    #[test]
    fn test_environment_is_exact() {
        for env in ["Sandbox", "prod", "staging", "sandbox ", ""] {
            let err = resolver().resolve("qa", env, Mode::Remote).unwrap_err();
            assert!(matches!(err, Error::InvalidTarget(_)), "environment {:?}", env);
        }
    }
}
