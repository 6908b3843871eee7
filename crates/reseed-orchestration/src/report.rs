//! Run directory, secret redaction and failure classification
//!
//! Every run gets its own directory holding one log per service, the
//! binary's `run.log` and a `summary.json` audit record.

use crate::{ConfigMap, Result, RunSummary, Target};
use chrono::Utc;
use futures_lite::io::AsyncWriteExt;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::info;

/// Values shorter than this are not treated as secrets
const MIN_SECRET_LEN: usize = 6;

const MASK: &str = "***";

/// Masks known secret values in text
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// Longest first so overlapping secrets are fully masked
    secrets: Vec<String>,
}

impl Redactor {
    /// Create a redactor with no secrets
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat every value of a configuration map as secret
    pub fn register(&mut self, config: &ConfigMap) {
        for value in config.values() {
            if value.len() >= MIN_SECRET_LEN && !self.secrets.contains(value) {
                self.secrets.push(value.clone());
            }
        }
        self.secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }

    /// Replace every registered secret in `text`
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*://)(?:[^@/?#]*@)?([^/?#]*)(/[^?#]*)?")
        .expect("connection string pattern is valid")
});

/// Show where a connection string points without its credentials or options
///
/// `postgres://app:s3cret@db:5432/core?sslmode=require` becomes
/// `postgres://***@db:5432/core`.
pub fn redact_connection_string(url: &str) -> String {
    match URL_RE.captures(url) {
        Some(caps) => {
            let has_userinfo = url[caps[1].len()..]
                .split(['/', '?', '#'])
                .next()
                .is_some_and(|authority| authority.contains('@'));
            format!(
                "{}{}{}{}",
                &caps[1],
                if has_userinfo { "***@" } else { "" },
                &caps[2],
                caps.get(3).map_or("", |m| m.as_str())
            )
        }
        None => MASK.to_string(),
    }
}

/// Likely cause of a failed command, derived from its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureHint {
    /// The datastore could not be reached
    DatastoreUnreachable,
    /// The datastore rejected the credentials
    AuthenticationFailed,
    /// A table, relation or schema is missing
    MissingRelation,
    /// The command hit its timeout
    TimedOut,
    /// The tool is not installed in the execution context
    CommandNotFound,
}

impl FailureHint {
    /// Short description
    pub fn description(&self) -> &'static str {
        match self {
            FailureHint::DatastoreUnreachable => "datastore unreachable",
            FailureHint::AuthenticationFailed => "datastore authentication failed",
            FailureHint::MissingRelation => "missing table or schema",
            FailureHint::TimedOut => "command timed out",
            FailureHint::CommandNotFound => "tool not installed",
        }
    }

    /// What the operator should check
    pub fn remedy(&self) -> &'static str {
        match self {
            FailureHint::DatastoreUnreachable => {
                "check the connection string host and that the database is running"
            }
            FailureHint::AuthenticationFailed => "check the credentials stored for this service",
            FailureHint::MissingRelation => {
                "migrations may be incomplete; check that the schema owner migrated first"
            }
            FailureHint::TimedOut => "raise the timeout in the configuration or check for locks",
            FailureHint::CommandNotFound => "check the service image or workspace dependencies",
        }
    }
}

impl std::fmt::Display for FailureHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

static HINT_PATTERNS: LazyLock<Vec<(Regex, FailureHint)>> = LazyLock::new(|| {
    [
        (
            r"(?i)P1001|ECONNREFUSED|connection refused|could not connect|can't reach database|could not translate host name",
            FailureHint::DatastoreUnreachable,
        ),
        (
            r"(?i)P1000|authentication failed|password authentication|access denied",
            FailureHint::AuthenticationFailed,
        ),
        (
            r#"(?i)P2021|relation "?[\w.]+"? does not exist|undefinedtable|no such table|schema "?[\w.]+"? does not exist"#,
            FailureHint::MissingRelation,
        ),
        (r"(?i)timed out|timeout expired", FailureHint::TimedOut),
        (
            r"(?i)command not found|not found in \$PATH|no such file or directory.*(npx|alembic|python)",
            FailureHint::CommandNotFound,
        ),
    ]
    .into_iter()
    .map(|(pattern, hint)| (Regex::new(pattern).expect("hint pattern is valid"), hint))
    .collect()
});

/// Classify command output; the first matching pattern wins
pub fn classify_failure(output: &str) -> Option<FailureHint> {
    HINT_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(output))
        .map(|(_, hint)| *hint)
}

/// Directory holding one run's logs and summary
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
    redactor: Arc<RwLock<Redactor>>,
}

impl RunLog {
    /// Create `reseed-<client>-<environment>-<timestamp>-XXXX` under `base`,
    /// or under the system temp directory
    pub fn create(base: Option<&Path>, target: &Target) -> Result<Self> {
        let prefix = format!(
            "reseed-{}-{}-",
            target.label(),
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        }
        .keep();

        info!(dir = %dir.display(), "run directory created");
        Ok(Self {
            dir,
            redactor: Arc::new(RwLock::new(Redactor::new())),
        })
    }

    /// Run directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file for a service
    pub fn service_log_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{}.log", service))
    }

    /// Path of the tracing log the binary writes
    pub fn run_log_path(&self) -> PathBuf {
        self.dir.join("run.log")
    }

    /// Path of the JSON summary
    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("summary.json")
    }

    /// Mask a service's configuration values in everything logged afterwards
    pub fn register_secrets(&self, config: &ConfigMap) {
        if let Ok(mut redactor) = self.redactor.write() {
            redactor.register(config);
        }
    }

    /// Redact text with every secret registered so far
    pub fn redact(&self, text: &str) -> String {
        match self.redactor.read() {
            Ok(redactor) => redactor.redact(text),
            Err(_) => MASK.to_string(),
        }
    }

    /// Append redacted text to a service's log
    pub async fn append(&self, service: &str, text: &str) -> Result<()> {
        let mut text = self.redact(text);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let mut file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.service_log_path(service))
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Write `summary.json`
    pub async fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| crate::Error::Other(format!("serializing summary: {}", e)))?;
        let path = self.summary_path();
        async_fs::write(&path, self.redact(&json)).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllowList, Mode, TargetResolver};

    #[test]
    fn test_redactor_masks_registered_values() {
        let mut redactor = Redactor::new();
        redactor.register(&ConfigMap::from([
            ("DATABASE_URL".to_string(), "postgres://app:hunter22@db/core".to_string()),
            ("PASSWORD".to_string(), "hunter22".to_string()),
            ("PORT".to_string(), "5432".to_string()),
        ]));

        let text = "connecting to postgres://app:hunter22@db/core with hunter22 on 5432";
        assert_eq!(redactor.redact(text), "connecting to *** with *** on 5432");
    }

    #[test]
    fn test_redact_connection_string() {
        assert_eq!(
            redact_connection_string("postgres://app:s3cret@db:5432/core?sslmode=require"),
            "postgres://***@db:5432/core"
        );
        assert_eq!(
            redact_connection_string("postgresql://db.internal/workflow"),
            "postgresql://db.internal/workflow"
        );
        assert_eq!(redact_connection_string("not a url"), "***");
    }

    #[test]
    fn test_classify_failure() {
        let cases = [
            (
                "Error: P1001: Can't reach database server at `db:5432`",
                Some(FailureHint::DatastoreUnreachable),
            ),
            (
                "FATAL:  password authentication failed for user \"app\"",
                Some(FailureHint::AuthenticationFailed),
            ),
            (
                "psycopg2.errors.UndefinedTable: relation \"accounts\" does not exist",
                Some(FailureHint::MissingRelation),
            ),
            ("command timed out after 600s", Some(FailureHint::TimedOut)),
            ("sh: 1: alembic: command not found", Some(FailureHint::CommandNotFound)),
            ("TypeError: cannot read properties of undefined", None),
        ];
        for (output, expected) in cases {
            assert_eq!(classify_failure(output), expected, "{}", output);
        }
    }

    #[smol_potat::test]
    async fn test_run_log_files() {
        let base = tempfile::tempdir().unwrap();
        let target = TargetResolver::new(AllowList::new(["qa"]))
            .resolve("qa", "sandbox", Mode::Remote)
            .unwrap();

        let log = RunLog::create(Some(base.path()), &target).unwrap();
        let name = log.dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("reseed-qa-sandbox-"));
        assert!(log.dir().starts_with(base.path()));

        log.register_secrets(&ConfigMap::from([(
            "JWT_SECRET".to_string(),
            "very-secret-value".to_string(),
        )]));
        log.append("auth-api", "$ alembic upgrade head").await.unwrap();
        log.append("auth-api", "using very-secret-value\n").await.unwrap();

        let content = std::fs::read_to_string(log.service_log_path("auth-api")).unwrap();
        assert_eq!(content, "$ alembic upgrade head\nusing ***\n");
    }
}
