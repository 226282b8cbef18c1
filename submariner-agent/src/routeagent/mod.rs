mod events;
mod overlay;
mod state;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::runtime::watcher;
use submariner_crds::ROUTE_AGENT_POD_SELECTOR;
use submariner_crds::v1::{Cluster, Endpoint};
use submariner_iptables::Iptables;
use submariner_netlink::Netlink;
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RouteAgentArgs;
use crate::kubernetes::forward_watch_events;
use crate::metrics::{EventLabels, Metrics};
use crate::routeagent::events::{QueuedEvent, RouteEvent, backoff_delay, map_watch_event};
use crate::routeagent::overlay::{NatRules, OverlayDriver, RouteController};
use crate::routeagent::state::RouteState;
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Runs the per-node reconciler until cancelled. All watches feed one
/// channel; one task owns the state and the kernel.
pub async fn start(
    args: RouteAgentArgs,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> Result<()> {
    let client = kube::Client::try_default().await?;

    let netlink = Netlink::new()?;
    let (host_ip, host_prefix) = netlink.host_ipv4(&args.iface).await?;
    info!(
        "starting route agent on node {} in cluster {}, host address {}/{}",
        args.node_name, args.cluster_id, host_ip, host_prefix
    );

    let state = RouteState::new(args.cluster_id, args.node_name, host_ip, host_prefix);
    let controller = RouteController::new(state, netlink, Iptables::default());
    controller.init().await?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let clusters: Api<Cluster> = Api::all(client.clone());
    tokio::spawn(forward_watch_events(
        clusters,
        watcher::Config::default().any_semantic(),
        tx.clone(),
        |event| map_watch_event(event, RouteEvent::ClusterApplied, RouteEvent::ClusterDeleted),
    ));

    let endpoints: Api<Endpoint> = Api::all(client.clone());
    tokio::spawn(forward_watch_events(
        endpoints,
        watcher::Config::default().any_semantic(),
        tx.clone(),
        |event| map_watch_event(event, RouteEvent::EndpointApplied, RouteEvent::EndpointDeleted),
    ));

    let pods: Api<Pod> = Api::namespaced(client, &args.namespace);
    tokio::spawn(forward_watch_events(
        pods,
        watcher::Config::default().labels(ROUTE_AGENT_POD_SELECTOR),
        tx.clone(),
        |event| map_watch_event(event, RouteEvent::PodApplied, RouteEvent::PodDeleted),
    ));

    run(controller, metrics, tx, rx, cancel).await
}

async fn run<D: OverlayDriver, N: NatRules>(
    mut controller: RouteController<D, N>,
    metrics: Arc<Metrics>,
    tx: Sender<QueuedEvent>,
    mut rx: Receiver<QueuedEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("route agent shutting down");
                return Ok(());
            }
            queued = rx.recv() => {
                let Some(queued) = queued else {
                    return Err(Error::ChannelClosed);
                };

                let kind = queued.event.kind();
                metrics.route_events.get_or_create(&EventLabels { kind }).inc();

                if let Err(e) = controller.handle(&queued.event).await {
                    metrics
                        .route_event_errors
                        .get_or_create(&EventLabels { kind })
                        .inc();
                    metrics.route_requeues.inc();

                    let delay = backoff_delay(queued.attempt);
                    error!(
                        "error handling {} event (attempt {}), retrying in {:?}: {}",
                        kind, queued.attempt, delay, e
                    );

                    let tx = tx.clone();
                    let retry = queued.retry();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(retry).await;
                    });
                }
            }
        }
    }
}
