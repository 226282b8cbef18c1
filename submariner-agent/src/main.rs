use std::sync::Arc;

use clap::Parser;
use submariner_agent::config::{Cli, Commands};
use submariner_agent::metrics::Metrics;
use submariner_agent::{Error, Result, http, routeagent};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::RouteAgent(args) => {
            setup_subscriber();

            let metrics = Arc::new(Metrics::default());
            let cancel = CancellationToken::new();
            let mut metrics_handle = tokio::spawn(http::serve_metrics(
                args.metrics_address,
                metrics.clone(),
                cancel.child_token(),
            ));
            let mut agent_handle =
                tokio::spawn(routeagent::start(args, metrics, cancel.child_token()));
            let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
            tokio::select! {
                h = &mut metrics_handle => exit("metrics", h),
                h = &mut agent_handle => exit("route agent", h),
                _ = &mut shutdown_handle => {
                    cancel.cancel();
                    let (metrics, agent) = tokio::join!(metrics_handle, agent_handle);
                    if let Err(m) = metrics {
                        error!("metrics exited with error: {}", m);
                    }
                    if let Err(a) = agent {
                        error!("route agent exited with error: {}", a);
                    }
                },
            };
            info!("Exiting...");
        }
        Commands::Globalnet(args) => {
            setup_subscriber();

            let metrics = Arc::new(Metrics::default());
            let cancel = CancellationToken::new();
            let mut metrics_handle = tokio::spawn(http::serve_metrics(
                args.metrics_address,
                metrics.clone(),
                cancel.child_token(),
            ));
            let config = submariner_globalnet::Config {
                pool_cidr: args.global_cidr,
                local_subnets: args.local_subnets,
            };
            let token = cancel.child_token();
            let mut globalnet_handle = tokio::spawn(async move {
                submariner_globalnet::start(config, token)
                    .await
                    .map_err(Error::from)
            });
            let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
            tokio::select! {
                h = &mut metrics_handle => exit("metrics", h),
                h = &mut globalnet_handle => exit("globalnet", h),
                _ = &mut shutdown_handle => {
                    cancel.cancel();
                    let (metrics, globalnet) = tokio::join!(metrics_handle, globalnet_handle);
                    if let Err(m) = metrics {
                        error!("metrics exited with error: {}", m);
                    }
                    if let Err(g) = globalnet {
                        error!("globalnet exited with error: {}", g);
                    }
                },
            };
            info!("Exiting...");
        }
        Commands::Crds => {
            submariner_crds::crd_gen_all()?;
        }
    }
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
          info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited")
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}")
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}")
        }
    }
}
