//! SIGINT / SIGTERM handling
//!
//! While a run is mutating state the first signal stops it cleanly through the
//! orchestrator's interrupt, and later signals are ignored until the in-flight
//! service has restored its configuration file and the run is disarmed. Outside
//! that window (at the confirmation prompt or during pre-flight) the process
//! exits with 130.

use anyhow::{Context, Result};
use reseed_orchestration::Interrupt;

/// Exit code for an interrupted run
pub const EXIT_INTERRUPTED: i32 = 130;

/// Start the signal thread feeding `interrupt`
#[cfg(unix)]
pub fn install(interrupt: Interrupt) -> Result<()> {
    use signal_hook::{
        consts::{SIGINT, SIGTERM},
        iterator::Signals,
    };
    use std::thread;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handler")?;

    thread::spawn(move || {
        for sig in signals.forever() {
            match interrupt_action(&interrupt) {
                SignalAction::Trigger => {
                    tracing::warn!(signal = sig, "interrupt received; stopping after cleanup");
                    interrupt.trigger();
                }
                SignalAction::Ignore => {
                    tracing::warn!(
                        signal = sig,
                        "cleanup in progress; waiting for configuration restore"
                    );
                }
                SignalAction::Exit => {
                    eprintln!("\nInterrupted.");
                    std::process::exit(EXIT_INTERRUPTED);
                }
            }
        }
    });
    Ok(())
}

/// What a SIGINT / SIGTERM does in the run's current state
#[cfg(any(unix, test))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Stop the run through the interrupt
    Trigger,
    /// Already stopping; let cleanup finish
    Ignore,
    /// Nothing is materialised; leave now
    Exit,
}

#[cfg(any(unix, test))]
fn interrupt_action(interrupt: &Interrupt) -> SignalAction {
    if !interrupt.is_armed() {
        SignalAction::Exit
    } else if interrupt.is_triggered() {
        SignalAction::Ignore
    } else {
        SignalAction::Trigger
    }
}

/// Signals are not handled on this platform
#[cfg(not(unix))]
pub fn install(_interrupt: Interrupt) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_while_disarmed_exits() {
        let interrupt = Interrupt::new();
        assert_eq!(interrupt_action(&interrupt), SignalAction::Exit);
    }

    #[test]
    fn test_repeated_signal_waits_for_cleanup() {
        let interrupt = Interrupt::new();
        interrupt.arm();
        assert_eq!(interrupt_action(&interrupt), SignalAction::Trigger);

        interrupt.trigger();
        assert_eq!(interrupt_action(&interrupt), SignalAction::Ignore);
        assert_eq!(interrupt_action(&interrupt), SignalAction::Ignore);

        interrupt.disarm();
        assert_eq!(interrupt_action(&interrupt), SignalAction::Exit);
    }
}
