//! Scoped materialisation of a service's configuration file
//!
//! [`ConfigScope::acquire`] writes the fetched configuration over the
//! service's `.env` file and remembers what was there before.
//! [`ConfigScope::release`] puts the previous file back, or removes the file
//! when none existed. The orchestrator releases the scope on every path out of
//! a service, including failures and interrupts; a scope dropped without
//! release restores the file synchronously.

use crate::{ConfigMap, ExecContext, Result, ServiceRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Render a configuration map as a dotenv file, one `KEY="value"` per line
pub fn render_env_file(config: &ConfigMap) -> String {
    let mut out = String::new();
    for (key, value) in config {
        out.push_str(key);
        out.push_str("=\"");
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '$' => out.push_str("\\$"),
                '`' => out.push_str("\\`"),
                '\n' => out.push_str("\\n"),
                c => out.push(c),
            }
        }
        out.push_str("\"\n");
    }
    out
}

/// A materialised configuration file that must be released
pub struct ConfigScope {
    runner: Arc<dyn ServiceRunner>,
    ctx: ExecContext,
    previous: Option<String>,
    timeout: Duration,
    released: bool,
}

impl ConfigScope {
    /// Materialise `config` as the context's env file
    ///
    /// When writing fails the previous state is restored before the error is
    /// returned, so a failed acquire leaves nothing to release.
    pub async fn acquire(
        runner: Arc<dyn ServiceRunner>,
        ctx: &ExecContext,
        config: &ConfigMap,
        timeout: Duration,
    ) -> Result<Self> {
        let previous = runner.read_file(ctx, &ctx.env_file, timeout).await?;
        let mut scope = Self {
            runner: runner.clone(),
            ctx: ctx.clone(),
            previous,
            timeout,
            released: false,
        };

        if let Err(e) = runner
            .write_file(ctx, &ctx.env_file, &render_env_file(config), timeout)
            .await
        {
            if let Err(restore) = scope.restore().await {
                warn!(service = %ctx.service, error = %restore, "failed to restore config after write failure");
            }
            scope.released = true;
            return Err(e);
        }

        debug!(
            service = %ctx.service,
            file = %ctx.env_file,
            replaced = scope.previous.is_some(),
            "materialised configuration"
        );
        Ok(scope)
    }

    /// Content of the file before the scope was acquired
    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// Restore the previous file, or remove the materialised one
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.restore().await;
        if result.is_ok() {
            debug!(service = %self.ctx.service, file = %self.ctx.env_file, "restored configuration");
        }
        result
    }

    async fn restore(&self) -> Result<()> {
        match &self.previous {
            Some(content) => {
                self.runner
                    .write_file(&self.ctx, &self.ctx.env_file, content, self.timeout)
                    .await
            }
            None => {
                self.runner
                    .remove_file(&self.ctx, &self.ctx.env_file, self.timeout)
                    .await
            }
        }
    }
}

impl std::fmt::Debug for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigScope")
            .field("ctx", &self.ctx)
            .field("replaced", &self.previous.is_some())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for ConfigScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(
            service = %self.ctx.service,
            file = %self.ctx.env_file,
            "configuration scope dropped without release; restoring"
        );
        if let Err(e) = async_io::block_on(self.restore()) {
            warn!(service = %self.ctx.service, error = %e, "configuration file left materialised");
        }
    }
}
