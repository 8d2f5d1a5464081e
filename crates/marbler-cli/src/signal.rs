//! Turns Ctrl-C and SIGTERM into a raised [`AbortSignal`].
//!
//! Running rollouts notice the abort at their next step and drop their
//! sessions, which terminates the spawned simulation processes.

use std::{future::Future, io, thread};

use anyhow::Context as _;
use marbler_training::rollout::AbortSignal;
use tokio::runtime;

/// Raises `abort` when the process is asked to shut down.
pub(crate) fn abort_on_shutdown(abort: &AbortSignal) -> anyhow::Result<()> {
    watch(abort.clone(), shutdown_requested())?;
    Ok(())
}

/// Raises `abort` once `signal` resolves, on a dedicated thread.
fn watch<F>(abort: AbortSignal, signal: F) -> anyhow::Result<thread::JoinHandle<()>>
where
    F: Future<Output = io::Result<&'static str>> + Send + 'static,
{
    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the signal runtime")?;
    thread::Builder::new()
        .name("signal".to_owned())
        .spawn(move || match runtime.block_on(signal) {
            Ok(name) => {
                tracing::warn!(signal = name, "shutdown requested, stopping rollouts");
                abort.raise();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for shutdown signals"),
        })
        .context("Failed to spawn the signal thread")
}

#[cfg(unix)]
async fn shutdown_requested() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "interrupt"),
        _ = terminate.recv() => Ok("terminate"),
    }
}

#[cfg(not(unix))]
async fn shutdown_requested() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "interrupt")
}
