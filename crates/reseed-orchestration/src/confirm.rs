//! Operator confirmation before any mutation

use crate::{PreflightReport, Result, RunPlan, Target, preflight::Datastore};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::sync::Mutex;
use tracing::warn;

/// Everything the operator sees before confirming a run
#[derive(Debug, Clone, Serialize)]
pub struct ImpactSummary {
    /// `<client>-<environment>`
    pub target: String,
    /// Namespace or workspace root
    pub canonical_id: String,
    /// Services in execution order
    pub services: Vec<String>,
    /// Datastores that will be migrated and seeded
    pub datastores: Vec<Datastore>,
    /// Services that failed pre-flight, with reasons
    pub failed_validations: Vec<(String, Vec<String>)>,
    /// Services without a secret; they will be skipped
    pub not_found: Vec<String>,
    /// Services without a pod or checkout; they will be skipped
    pub unavailable: Vec<String>,
    /// Credential backend failures
    pub provider_errors: Vec<String>,
    /// Whether owned schemas are dropped before migrating
    pub destructive_reset: bool,
}

impl ImpactSummary {
    /// Assemble the summary from a plan and its pre-flight report
    pub fn new(
        target: &Target,
        plan: &RunPlan,
        report: &PreflightReport,
        destructive_reset: bool,
    ) -> Self {
        Self {
            target: target.label(),
            canonical_id: target.canonical_id(),
            services: plan.names().into_iter().map(String::from).collect(),
            datastores: report.datastores.clone(),
            failed_validations: report
                .failed()
                .into_iter()
                .map(|(name, result)| (name.to_string(), result.reasons.clone()))
                .collect(),
            not_found: report.not_found.clone(),
            unavailable: report.unavailable.clone(),
            provider_errors: report.provider_errors.clone(),
            destructive_reset,
        }
    }

    /// Phrase the operator must type
    pub fn confirmation_phrase(&self) -> String {
        format!("reset {}", self.target)
    }

    /// Human-readable rendering for the terminal
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target:   {} ({})", self.target, self.canonical_id);
        let _ = writeln!(out, "Services: {}", self.services.join(", "));
        if self.destructive_reset {
            let _ = writeln!(out, "Mode:     owned schemas are DROPPED and rebuilt");
        }

        let _ = writeln!(out, "\nAffected datastores:");
        if self.datastores.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for datastore in &self.datastores {
            let _ = writeln!(out, "  - {}", datastore);
        }

        if !self.not_found.is_empty() {
            let _ = writeln!(out, "\nNo secret (skipped): {}", self.not_found.join(", "));
        }
        if !self.unavailable.is_empty() {
            let _ = writeln!(out, "Not running (skipped): {}", self.unavailable.join(", "));
        }
        if !self.failed_validations.is_empty() {
            let _ = writeln!(out, "\nPre-flight failures:");
            for (service, reasons) in &self.failed_validations {
                let _ = writeln!(out, "  - {}: {}", service, reasons.join("; "));
            }
        }
        for error in &self.provider_errors {
            let _ = writeln!(out, "Warning: {}", error);
        }
        out
    }
}

/// Decides whether a run may mutate its target
pub trait ConfirmationGate: Send + Sync {
    /// Return `Ok(true)` only on explicit operator approval
    fn confirm(&self, impact: &ImpactSummary) -> Result<bool>;
}

/// Compare typed input with the expected phrase
///
/// Only the trailing line terminator is removed; any other difference,
/// including surrounding whitespace or case, declines.
pub fn phrase_matches(input: &str, phrase: &str) -> bool {
    let input = input.strip_suffix('\n').unwrap_or(input);
    let input = input.strip_suffix('\r').unwrap_or(input);
    input == phrase
}

/// Interactive gate reading one line from the terminal
pub struct TerminalGate<R, W> {
    io: Mutex<(R, W)>,
}

impl<R: BufRead + Send, W: Write + Send> TerminalGate<R, W> {
    /// Create a gate over arbitrary input and output
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

impl TerminalGate<std::io::BufReader<std::io::Stdin>, std::io::Stderr> {
    /// Gate reading stdin and prompting on stderr
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R: BufRead + Send, W: Write + Send> ConfirmationGate for TerminalGate<R, W> {
    fn confirm(&self, impact: &ImpactSummary) -> Result<bool> {
        let mut guard = self
            .io
            .lock()
            .map_err(|_| crate::Error::Other("terminal gate poisoned".to_string()))?;
        let (input, output) = &mut *guard;
        let phrase = impact.confirmation_phrase();

        write!(output, "{}", impact.render())?;
        write!(output, "\nType '{}' to confirm: ", phrase)?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;

        let confirmed = phrase_matches(&line, &phrase);
        if !confirmed {
            writeln!(output, "Confirmation phrase did not match; nothing was changed.")?;
        }
        Ok(confirmed)
    }
}

/// Approves every run; only constructed for an explicit `--yes`
#[derive(Debug, Clone, Copy)]
pub struct AssumeYesGate;

impl ConfirmationGate for AssumeYesGate {
    fn confirm(&self, impact: &ImpactSummary) -> Result<bool> {
        warn!(target_id = %impact.target, "confirmation skipped by --yes");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn impact() -> ImpactSummary {
        ImpactSummary {
            target: "qa-sandbox".into(),
            canonical_id: "qa-sandbox".into(),
            services: vec!["core-api".into(), "data-builder".into()],
            datastores: vec![Datastore {
                service: "data-builder".into(),
                schema: "core".into(),
                location: "postgres://***@db/core".into(),
                shared_from: Some("core-api".into()),
            }],
            failed_validations: vec![],
            not_found: vec!["workflow-api".into()],
            unavailable: vec![],
            provider_errors: vec![],
            destructive_reset: false,
        }
    }

    fn answer(line: &str) -> (bool, String) {
        let gate = TerminalGate::new(Cursor::new(line.as_bytes().to_vec()), Vec::new());
        let confirmed = gate.confirm(&impact()).unwrap();
        let (_, output) = gate.io.into_inner().unwrap();
        (confirmed, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_phrase_matching() {
        assert!(phrase_matches("reset qa-sandbox\n", "reset qa-sandbox"));
        assert!(phrase_matches("reset qa-sandbox\r\n", "reset qa-sandbox"));
        assert!(phrase_matches("reset qa-sandbox", "reset qa-sandbox"));

        for near_miss in [
            "reset qa-sandbox \n",
            " reset qa-sandbox\n",
            "Reset qa-sandbox\n",
            "reset qa-sandbox\n\n",
            "reset qa-production\n",
            "reset qa\n",
            "yes\n",
            "\n",
            "",
        ] {
            assert!(!phrase_matches(near_miss, "reset qa-sandbox"), "{:?}", near_miss);
        }
    }

    #[test]
    fn test_terminal_gate_confirms_exact_phrase() {
        let (confirmed, output) = answer("reset qa-sandbox\n");
        assert!(confirmed);
        assert!(
            output.contains("data-builder / core -> postgres://***@db/core (owned by core-api)")
        );
        assert!(output.contains("No secret (skipped): workflow-api"));
        assert!(output.contains("Type 'reset qa-sandbox' to confirm"));
    }

    #[test]
    fn test_terminal_gate_declines_near_miss() {
        let (confirmed, output) = answer("reset qa-sandbox.\n");
        assert!(!confirmed);
        assert!(output.contains("nothing was changed"));

        // End of input declines
        let (confirmed, _) = answer("");
        assert!(!confirmed);
    }

    #[test]
    fn test_assume_yes() {
        assert!(AssumeYesGate.confirm(&impact()).unwrap());
    }
}
