use super::{Session, prepare, refuse};
use crate::{EXIT_REFUSED, ResetArgs, logging, signals};
use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use reseed_orchestration::{
    AssumeYesGate, ConfirmationGate, Interrupt, ResetOrchestrator, RunLog, RunOptions, RunSummary,
    Status, TerminalGate,
};
use std::path::Path;
use tracing::info;

pub async fn run(config_path: Option<&Path>, args: ResetArgs, verbose: bool) -> Result<i32> {
    let Session {
        config,
        target,
        plan,
        provider,
        runner,
    } = match prepare(config_path, &args.target) {
        Ok(session) => session,
        Err(e) => return Ok(refuse(&e)),
    };

    if args.reset_schemas && !target.is_local() {
        eprintln!("Error: --reset-schemas only applies to --local workspaces");
        return Ok(EXIT_REFUSED);
    }

    let run_log = RunLog::create(args.log_dir.as_deref(), &target)
        .context("Failed to create run log directory")?;
    let _guard = logging::init(verbose, Some(run_log.dir()))?;

    let interrupt = Interrupt::new();
    signals::install(interrupt.clone())?;

    let options = RunOptions {
        dry_run: args.dry_run,
        reset_schemas: args.reset_schemas,
        parallel: args.parallel,
    };
    let orchestrator = ResetOrchestrator::new(provider, runner, config.timeouts)
        .with_options(options)
        .with_interrupt(interrupt)
        .with_run_log(run_log.clone());

    let gate: Box<dyn ConfirmationGate> = if args.yes {
        Box::new(AssumeYesGate)
    } else {
        Box::new(TerminalGate::stdio())
    };

    let report = orchestrator.reset(&target, &plan, gate.as_ref()).await?;
    let summary = &report.summary;

    if let Some(reason) = &summary.aborted {
        eprintln!("Aborted: {}. Nothing was changed.", reason);
        return Ok(summary.exit_code());
    }

    println!();
    display_outcomes(summary);
    if summary.dry_run {
        display_planned_commands(summary);
    }
    display_guidance(summary);

    println!("\nLogs:    {}", run_log.dir().display());
    println!("Summary: {}", run_log.summary_path().display());

    info!(verdict = ?summary.verdict(), exit_code = summary.exit_code(), "reset finished");
    Ok(summary.exit_code())
}

fn display_outcomes(summary: &RunSummary) {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "STATUS", "STAGE", "DETAIL"]);

    for outcome in summary.outcomes.values() {
        let color = match outcome.status {
            Status::Success => Color::Green,
            Status::PartialSuccess => Color::Yellow,
            Status::Failed => Color::Red,
            Status::Skipped => Color::DarkGrey,
        };

        let mut detail = outcome.reason.clone().unwrap_or_else(|| "-".to_string());
        if let Some(hint) = &outcome.hint {
            detail.push_str(&format!("\n{}: {}", hint, hint.remedy()));
        }
        for warning in &outcome.warnings {
            detail.push_str(&format!("\nwarning: {}", warning));
        }

        table.add_row(vec![
            Cell::new(&outcome.service),
            Cell::new(outcome.status.to_string()).fg(color),
            Cell::new(outcome.stage_reached.to_string()),
            Cell::new(detail),
        ]);
    }

    println!("{}", table);
}

fn display_planned_commands(summary: &RunSummary) {
    println!("\nPlanned commands (dry run):");
    for outcome in summary.outcomes.values() {
        if outcome.planned_commands.is_empty() {
            continue;
        }
        println!("  {}:", outcome.service);
        for command in &outcome.planned_commands {
            println!("    {}", command);
        }
    }
}

fn display_guidance(summary: &RunSummary) {
    if summary.interrupted {
        println!("\nRun interrupted; services not started were skipped.");
    }

    let seed_only = summary.retry_seed_only();
    if !seed_only.is_empty() {
        println!(
            "\nSucceeded with warnings: retry seed only for {}",
            seed_only.join(", ")
        );
    }

    let full = summary.full_rerun_required();
    if !full.is_empty() {
        println!("\nFull rerun required for {}", full.join(", "));
    }
}
