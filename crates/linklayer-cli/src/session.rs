//! Session controller: drives one link socket through its lifecycle and
//! guarantees it is closed on every path.

use anyhow::Context;
use linklayer_transport::{
    InterfaceResolver, LinkSocket, Reactor, ReactorStats, StopHandle, StopSignal, SystemResolver,
    stop_channel,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use crate::config::SessionConfig;

/// Run a session against the system's interfaces until Ctrl-C or SIGTERM.
pub async fn run(config: &SessionConfig) -> anyhow::Result<ReactorStats> {
    let (handle, mut stop) = stop_channel();
    tokio::spawn(forward_shutdown(handle));
    run_with(config, &SystemResolver, &mut stop).await
}

/// Run a session with an explicit resolver and stop signal.
///
/// The socket is closed whether or not the session succeeded. A teardown
/// failure after a session failure is logged and the session failure is
/// returned.
pub async fn run_with(
    config: &SessionConfig,
    resolver: &dyn InterfaceResolver,
    stop: &mut StopSignal,
) -> anyhow::Result<ReactorStats> {
    let mut socket = LinkSocket::new(config.link_config());
    let outcome = drive(&mut socket, config, resolver, stop).await;
    let teardown = socket.close();
    info!("link socket closed");

    match (outcome, teardown) {
        (Ok(stats), Ok(())) => Ok(stats),
        (Ok(_), Err(e)) => Err(anyhow::Error::new(e).context("Failed to close link socket")),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            error!(error = %teardown, "teardown after failed session also failed");
            Err(e)
        }
    }
}

async fn drive(
    socket: &mut LinkSocket,
    config: &SessionConfig,
    resolver: &dyn InterfaceResolver,
    stop: &mut StopSignal,
) -> anyhow::Result<ReactorStats> {
    socket
        .open(resolver)
        .with_context(|| format!("Failed to open link socket on {}", config.interface))?;
    socket.bind().context("Failed to bind link socket")?;
    socket.start().context("Failed to start link socket")?;

    let stats = {
        let mut reactor = Reactor::new();
        let watcher = socket
            .watcher(&config.traffic())
            .context("Failed to register link socket")?;
        reactor.register(watcher)?;
        reactor.run(stop).await.context("Reactor failed")?
    };

    socket.stop().context("Failed to stop link socket")?;
    info!(
        iterations = stats.iterations,
        dispatched = stats.dispatched,
        handled = stats.handled,
        frame_errors = stats.frame_errors,
        deregistered = stats.deregistered,
        "session finished"
    );
    Ok(stats)
}

async fn forward_shutdown(handle: StopHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, stopping"),
        () = terminate => info!("received SIGTERM, stopping"),
    }
    handle.stop();
}
