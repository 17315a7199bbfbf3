//! Cooperative shutdown via OS signals.
//!
//! Handlers do nothing but set an atomic flag; the loop polls it at
//! iteration and phase boundaries. A phase already in flight finishes or
//! hits its own timeout rather than being killed mid-flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::Result;

/// Shared shutdown flag. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from signal context.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Register SIGINT/SIGTERM/SIGHUP listeners that set the flag.
///
/// The listener tasks outlive the loop; they hold only a clone of the
/// flag and exit with the runtime.
pub fn register_signal_handlers(shutdown: &ShutdownFlag) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let mut stream = signal(kind)?;
            let flag = shutdown.clone();
            tokio::spawn(async move {
                if stream.recv().await.is_some() {
                    info!("received {name}, requesting shutdown");
                    flag.set();
                }
            });
        }
    }

    #[cfg(windows)]
    {
        let flag = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, requesting shutdown");
                flag.set();
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_clear() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
    }

    #[test]
    fn test_set_is_visible_through_clones() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
        assert!(clone.is_set());
    }

    #[tokio::test]
    async fn test_register_handlers() {
        let flag = ShutdownFlag::new();
        register_signal_handlers(&flag).expect("registration should succeed");
        assert!(!flag.is_set());
    }
}
