//! Ctrl-C handling for the daemon

use crate::runtime::Coordinator;

/// Two-step exit confirmation while workers are running
#[derive(Debug, Default)]
pub struct ExitConfirmation {
    warned: bool,
}

impl ExitConfirmation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an exit request with `running` live workers may proceed
    ///
    /// With no running workers the exit always proceeds. Otherwise the
    /// first request only arms the confirmation and the next one proceeds.
    pub fn request(&mut self, running: usize) -> bool {
        if running == 0 || self.warned {
            return true;
        }
        self.warned = true;
        false
    }

    /// Forget a pending warning
    pub fn reset(&mut self) {
        self.warned = false;
    }
}

/// Wait until the process should shut down
///
/// A Ctrl-C while workers are running only warns; a second one confirms.
pub async fn wait_for_shutdown(coordinator: &Coordinator) {
    let mut confirmation = ExitConfirmation::new();

    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[Signals] Failed to listen for Ctrl-C: {}", e);
            return;
        }

        let running = coordinator.running_workers();
        if confirmation.request(running) {
            tracing::info!("[Signals] Shutdown requested");
            return;
        }

        tracing::warn!(
            "[Signals] {} worker(s) still running; press Ctrl-C again to stop them and exit",
            running
        );
    }
}
