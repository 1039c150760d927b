use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Owns the process-wide cancellation token and cancels it on SIGTERM or Ctrl-C.
#[derive(Debug)]
pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Share an existing token, e.g. one the REPL also cancels.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// The cancellation token that all tasks should monitor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a background task that turns the first OS stop signal into cancellation.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                signal = wait_for_stop_signal() => {
                    tracing::info!(signal, "stop signal received, initiating shutdown");
                }
            }
            token.cancel();
        });
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            let _ = signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = signal::ctrl_c() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    let _ = signal::ctrl_c().await;
    "ctrl-c"
}
