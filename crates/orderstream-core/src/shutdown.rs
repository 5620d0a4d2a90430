//! Process shutdown signals.

use std::future::Future;
use std::io;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `shutdown` on ctrl-c or, on unix, SIGTERM.
///
/// A handler that cannot be installed is logged and ignored; the other
/// signal still works, and with neither the process runs until killed.
pub async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        sigterm.recv().await;
        Ok::<(), io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<io::Result<()>>();

    cancel_on_signal(shutdown, tokio::signal::ctrl_c(), terminate).await;
}

async fn cancel_on_signal<C, T>(shutdown: CancellationToken, ctrl_c: C, terminate: T)
where
    C: Future<Output = io::Result<()>>,
    T: Future<Output = io::Result<()>>,
{
    tokio::select! {
        _ = listen("ctrl-c", ctrl_c) => {},
        _ = listen("SIGTERM", terminate) => {},
    }
    info!("received shutdown signal");
    shutdown.cancel();
}

/// Resolves when the signal arrives; never resolves if its handler failed.
async fn listen(name: &str, signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        error!(signal = name, error = %e, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn never() -> impl Future<Output = io::Result<()>> {
        std::future::pending()
    }

    #[tokio::test]
    async fn signal_cancels_token() {
        let token = CancellationToken::new();
        cancel_on_signal(token.clone(), async { Ok::<(), io::Error>(()) }, never()).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handler_does_not_cancel() {
        let token = CancellationToken::new();
        let denied = async { Err::<(), _>(io::Error::other("signal handler denied")) };
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            cancel_on_signal(token.clone(), denied, never()),
        )
        .await;
        assert!(result.is_err());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn other_signal_still_cancels_after_failed_handler() {
        let token = CancellationToken::new();
        let denied = async { Err::<(), _>(io::Error::other("signal handler denied")) };
        cancel_on_signal(token.clone(), denied, async { Ok::<(), io::Error>(()) }).await;
        assert!(token.is_cancelled());
    }
}
