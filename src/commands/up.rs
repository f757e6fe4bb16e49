use crate::output::{print_event, CliOutput, UserOutput};
use service_fleet::{config::Config, Options, Orchestrator};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

pub async fn run_up(config: &Config, options: Options, out: &dyn UserOutput) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config, &options)?;
    let enabled = orchestrator.registry().enabled(&options).len();
    if enabled == 0 {
        out.warning("No services enabled for this environment");
        return Ok(());
    }

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event, &CliOutput),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer fell behind, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    out.status(&format!("Starting {} service(s)...", enabled));
    let session = match orchestrator
        .start_with_cancellation(options, cancel.clone())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            settle_printer(printer).await;
            return Err(e.into());
        }
    };

    if session.failures().is_empty() {
        out.success("Fleet is up. Press Ctrl+C to stop.");
    } else {
        out.warning(&format!(
            "Fleet is up with {} failed service(s). Press Ctrl+C to stop.",
            session.failures().len()
        ));
    }

    session.wait().await;
    out.status("Stopping services...");
    session.shutdown().await;
    settle_printer(printer).await;

    session.result()?;
    out.success("Services stopped");
    Ok(())
}

/// First SIGINT/SIGTERM cancels the session; a second SIGINT exits at once.
fn install_signal_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to create SIGINT handler: {}", e);
                None
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to create SIGTERM handler: {}", e);
                None
            }
        };

        if sigint.is_none() && sigterm.is_none() {
            tracing::warn!(
                "No signal handlers available - process can only be terminated externally"
            );
            return;
        }

        let mut signal_count = 0;
        loop {
            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigint {
                        s.recv().await
                    } else {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    signal_count += 1;
                    if signal_count == 1 {
                        println!("\n\nStopping services... (Press Ctrl+C again to force quit)");
                        cancel.cancel();
                    } else {
                        eprintln!("\n\nForce quitting. Run `fleet down` to stop leftover processes.");
                        std::process::exit(130);
                    }
                }
                _ = async {
                    if let Some(ref mut s) = sigterm {
                        s.recv().await
                    } else {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    println!("\n\nReceived SIGTERM, stopping services gracefully...");
                    cancel.cancel();
                    break;
                }
            }
        }
    });
}

/// Give the printer a moment to drain buffered events, then stop it.
async fn settle_printer(printer: tokio::task::JoinHandle<()>) {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    printer.abort();
}
