use std::sync::Arc;

use futures::StreamExt;
use ipnet::Ipv4Net;
use kube::api::PostParams;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client};
use submariner_crds::v1::globalegressip::CLUSTER_EGRESS_IP_NAME;
use submariner_crds::v1::{ClusterGlobalEgressIP, ClusterGlobalEgressIPSpec};
use submariner_ipam::IpPool;
use submariner_iptables::{Executor, Iptables};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::{error_policy, program_egress_rules, reconcile};
use crate::{Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    /// CIDR the globally-routable egress IPs are drawn from.
    pub pool_cidr: Ipv4Net,
    /// Local CIDRs whose egress is SNATed to the allocated IPs.
    pub local_subnets: Vec<String>,
}

/// Bootstraps the singleton and the pool, then runs the controller until
/// cancelled. Failures before the controller loop are fatal to the caller.
pub async fn start(config: Config, cancel: CancellationToken) -> Result<()> {
    let client = Client::try_default().await?;
    let api: Api<ClusterGlobalEgressIP> = Api::all(client.clone());

    let iptables = Iptables::default();
    iptables.ensure_chains().await?;

    let context = Arc::new(Context {
        client,
        api: api.clone(),
        pool: IpPool::new(config.pool_cidr),
        iptables,
        local_subnets: config.local_subnets,
    });

    let egress_ip = ensure_singleton(&context).await?;
    reserve_allocated_ips(&context, &egress_ip).await?;

    Controller::new(api, watcher::Config::default().any_semantic())
        .graceful_shutdown_on(shutdown(cancel))
        .run(reconcile, error_policy, context)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// The well-known instance is created if absent so users only ever patch it.
async fn ensure_singleton<E: Executor>(ctx: &Context<E>) -> Result<ClusterGlobalEgressIP> {
    match ctx.api.get(CLUSTER_EGRESS_IP_NAME).await {
        Ok(egress_ip) => Ok(egress_ip),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!("creating ClusterGlobalEgressIP {}", CLUSTER_EGRESS_IP_NAME);
            let egress_ip = ClusterGlobalEgressIP::new(
                CLUSTER_EGRESS_IP_NAME,
                ClusterGlobalEgressIPSpec::default(),
            );
            Ok(ctx.api.create(&PostParams::default(), &egress_ip).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Re-adopts an allocation persisted in the object's status so pool and
/// kernel agree with it across restarts.
async fn reserve_allocated_ips<E: Executor>(
    ctx: &Context<E>,
    egress_ip: &ClusterGlobalEgressIP,
) -> Result<()> {
    let Some(status) = &egress_ip.status else {
        return Ok(());
    };
    if status.allocated_ips.is_empty() {
        return Ok(());
    }

    info!(
        "reserving previously allocated global IPs {:?}",
        status.allocated_ips
    );
    ctx.pool.reserve(&status.allocated_ips)?;
    program_egress_rules(ctx, &status.allocated_ips).await?;

    Ok(())
}

async fn shutdown(cancel: CancellationToken) {
    cancel.cancelled().await;
}
