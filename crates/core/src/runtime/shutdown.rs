use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Owns the runtime's CancellationToken and cancels it on SIGTERM or SIGHUP
/// (terminal closed). Ctrl+C is a key event in raw mode, so the front-end
/// cancels explicitly.
#[derive(Debug, Clone, Default)]
pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cancellation token that all tasks should monitor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a background task that listens for OS signals and triggers cancellation.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use signal::unix::{SignalKind, signal as unix_signal};
                let (mut term, mut hup) = match (
                    unix_signal(SignalKind::terminate()),
                    unix_signal(SignalKind::hangup()),
                ) {
                    (Ok(t), Ok(h)) => (t, h),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!(error = %e, "failed to register signal handlers");
                        return;
                    }
                };
                tokio::select! {
                    _ = term.recv() => tracing::info!("received SIGTERM, initiating shutdown"),
                    _ = hup.recv() => tracing::info!("received SIGHUP, initiating shutdown"),
                    _ = token.cancelled() => return,
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = signal::ctrl_c() => tracing::info!("received Ctrl+C, initiating shutdown"),
                    _ = token.cancelled() => return,
                }
            }
            token.cancel();
        });
    }
}
