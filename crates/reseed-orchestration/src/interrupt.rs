//! Cooperative interruption of a run
//!
//! The binary's signal thread calls [`Interrupt::trigger`]; every runner call
//! is raced against the interrupt through [`Interrupt::guard`], so the
//! in-flight command is dropped (and its child killed) as soon as the operator
//! asks to stop.

use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Inner {
    armed: AtomicBool,
    triggered: AtomicBool,
    /// Dropped on trigger, which closes the channel and wakes every waiter
    sender: Mutex<Option<async_channel::Sender<()>>>,
    receiver: async_channel::Receiver<()>,
}

/// Shared interrupt flag; clones observe the same state
#[derive(Debug, Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// Create an untriggered interrupt
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        Self {
            inner: Arc::new(Inner {
                armed: AtomicBool::new(false),
                triggered: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Mark that mutations are running; signal handlers check this to decide
    /// between stopping the run and exiting immediately
    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    /// Mark that no mutation is running
    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
    }

    /// Whether a run is currently mutating state
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Request the run to stop
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }
    }

    /// Whether the interrupt has fired
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once the interrupt fires
    pub async fn triggered(&self) {
        if self.is_triggered() {
            return;
        }
        // Nothing is ever sent; recv only returns once the sender is dropped
        let _ = self.inner.receiver.recv().await;
    }

    /// Run `future` unless the interrupt fires first
    pub async fn guard<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_triggered() {
            return Err(Error::Interrupted);
        }
        futures_lite::future::or(future, async {
            self.triggered().await;
            Err(Error::Interrupted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_guard_passes_through() {
        let interrupt = Interrupt::new();
        let value = interrupt.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[smol_potat::test]
    async fn test_trigger_cancels_pending_future() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });

        let result: Result<()> = interrupt
            .guard(async {
                smol::Timer::after(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(interrupt.is_triggered());
    }

    #[smol_potat::test]
    async fn test_guard_after_trigger_never_polls() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let polled = AtomicBool::new(false);
        let result: Result<()> = interrupt
            .guard(async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_arming() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_armed());
        interrupt.arm();
        assert!(interrupt.clone().is_armed());
        interrupt.disarm();
        assert!(!interrupt.is_armed());
    }
}
