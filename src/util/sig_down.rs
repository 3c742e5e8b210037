use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token on SIGTERM or SIGINT (Ctrl-C elsewhere).
///
/// The server passes [`SigDown::cancellation_token`] to axum's graceful shutdown so
/// in-flight requests finish before the ledger is dropped.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal listeners. Must be called inside a tokio runtime.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let listener = listen(token.clone())?;
        task_tracker.spawn(listener);
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Resolves once a signal arrived and the listener task has exited.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

#[cfg(unix)]
fn listen(
    token: CancellationToken,
) -> Result<impl std::future::Future<Output = ()> + Send + 'static, std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    })
}

#[cfg(not(unix))]
fn listen(
    token: CancellationToken,
) -> Result<impl std::future::Future<Output = ()> + Send + 'static, std::io::Error> {
    Ok(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(%err, "ctrl-c listener failed");
                }
                tracing::info!("interrupt received, shutting down");
            }
            _ = token.cancelled() => return,
        }
        token.cancel();
    })
}
