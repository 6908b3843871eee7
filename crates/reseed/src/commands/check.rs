use super::{Session, prepare, refuse};
use crate::{TargetArgs, logging};
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use reseed_orchestration::{PreflightReport, ResetOrchestrator};
use std::path::Path;

/// Pre-flight only; exits 0 when every in-scope service passed
pub async fn run(config_path: Option<&Path>, args: TargetArgs, verbose: bool) -> Result<i32> {
    let Session {
        config,
        target,
        plan,
        provider,
        runner,
    } = match prepare(config_path, &args) {
        Ok(session) => session,
        Err(e) => return Ok(refuse(&e)),
    };
    let _guard = logging::init(verbose, None)?;

    println!("Checking {} ({} services)\n", target, plan.len());
    let report = ResetOrchestrator::new(provider, runner, config.timeouts)
        .preflight(&target, &plan)
        .await;

    display_report(&report);

    if report.all_passed() {
        println!("\nAll checks passed.");
        Ok(0)
    } else {
        println!("\n{} service(s) failed pre-flight.", report.failed().len());
        Ok(1)
    }
}

fn display_report(report: &PreflightReport) {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "RESULT", "REASONS"]);

    for (service, result) in &report.results {
        let (label, color) = if result.passed {
            ("passed", Color::Green)
        } else {
            ("failed", Color::Red)
        };
        let reasons = if result.reasons.is_empty() {
            "-".to_string()
        } else {
            result.reasons.join("\n")
        };
        table.add_row(vec![
            Cell::new(service),
            Cell::new(label).fg(color),
            Cell::new(reasons),
        ]);
    }
    for service in &report.not_found {
        table.add_row(vec![
            Cell::new(service),
            Cell::new("no secret").fg(Color::DarkGrey),
            Cell::new("not provisioned for this target; will be skipped"),
        ]);
    }
    for service in &report.unavailable {
        table.add_row(vec![
            Cell::new(service),
            Cell::new("unavailable").fg(Color::DarkGrey),
            Cell::new("no running pod or workspace checkout; will be skipped"),
        ]);
    }
    println!("{}", table);

    for error in &report.provider_errors {
        println!("warning: {}", error);
    }

    if !report.datastores.is_empty() {
        println!("\nDatastores:");
        for datastore in &report.datastores {
            println!("  {}", datastore);
        }
    }
}
