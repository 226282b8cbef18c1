use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::{controller::Action, finalizer};
use submariner_crds::v1::ClusterGlobalEgressIP;
use submariner_crds::v1::globalegressip::{
    CLUSTER_EGRESS_IP_NAME, GlobalEgressIPStatus, REASON_INVALID_INPUT, REASON_INVALID_INSTANCE,
    REASON_POOL_ALLOCATION_FAILED, REASON_SUCCESS, REASON_ZERO_INPUT,
};
use submariner_iptables::{Executor, GLOBALNET_MARK, snat_target};
use tracing::{debug, error, info};

use crate::conditions;
use crate::{Context, Error, Result};

const GLOBALNET_FINALIZER: &str = "submariner.io/globalnet-cleanup";
const ALLOCATION_RETRY_REQUEUE: Duration = Duration::from_secs(5);
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

pub(crate) async fn reconcile<E: Executor + 'static>(
    egress_ip: Arc<ClusterGlobalEgressIP>,
    ctx: Arc<Context<E>>,
) -> Result<Action> {
    let name = egress_ip.name_any();
    info!("Reconciling ClusterGlobalEgressIP {}", name);

    let action = finalizer(&ctx.api, GLOBALNET_FINALIZER, egress_ip, |event| async {
        match event {
            finalizer::Event::Apply(egress_ip) => apply(egress_ip, ctx.clone()).await,
            finalizer::Event::Cleanup(egress_ip) => cleanup(egress_ip, ctx.clone()).await,
        }
    })
    .await?;

    Ok(action)
}

pub(crate) fn error_policy<E: Executor>(
    egress_ip: Arc<ClusterGlobalEgressIP>,
    error: &Error,
    _ctx: Arc<Context<E>>,
) -> Action {
    let name = egress_ip.name_any();
    error!(?error, "reconcile error for ClusterGlobalEgressIP {}", name);
    Action::requeue(ERROR_REQUEUE)
}

async fn apply<E: Executor>(
    egress_ip: Arc<ClusterGlobalEgressIP>,
    ctx: Arc<Context<E>>,
) -> Result<Action> {
    let (status, outcome) = process(&ctx, &egress_ip).await;
    publish_status(&ctx, &egress_ip, status).await?;

    match outcome {
        Outcome::Requeue => Ok(Action::requeue(ALLOCATION_RETRY_REQUEUE)),
        Outcome::Steady => Ok(Action::await_change()),
    }
}

async fn cleanup<E: Executor>(
    egress_ip: Arc<ClusterGlobalEgressIP>,
    ctx: Arc<Context<E>>,
) -> Result<Action> {
    if let Some(status) = &egress_ip.status
        && !status.allocated_ips.is_empty()
    {
        info!(
            "releasing global IPs {:?} of removed ClusterGlobalEgressIP",
            status.allocated_ips
        );
        flush_egress_rules(&ctx, &status.allocated_ips).await;
        if let Err(e) = ctx.pool.release(&status.allocated_ips) {
            error!("error releasing global IPs: {}", e);
        }
    }

    Ok(Action::await_change())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Steady,
    Requeue,
}

/// Computes the status the object should carry after this event, mutating
/// pool and kernel state on the way. Publishing is left to the caller so the
/// unchanged-status short-circuit stays in one place.
pub(crate) async fn process<E: Executor>(
    ctx: &Context<E>,
    egress_ip: &ClusterGlobalEgressIP,
) -> (GlobalEgressIPStatus, Outcome) {
    let mut status = egress_ip.status.clone().unwrap_or_default();
    let number_of_ips = egress_ip.number_of_ips();
    debug!(
        "processing ClusterGlobalEgressIP {}: numberOfIPs {}, allocated {:?}",
        egress_ip.name_any(),
        number_of_ips,
        status.allocated_ips
    );

    if !validate(egress_ip, number_of_ips, &mut status) {
        return (status, Outcome::Steady);
    }

    let outcome = on_create_or_update(ctx, number_of_ips as usize, &mut status).await;
    (status, outcome)
}

fn validate(
    egress_ip: &ClusterGlobalEgressIP,
    number_of_ips: i32,
    status: &mut GlobalEgressIPStatus,
) -> bool {
    if egress_ip.name_any() != CLUSTER_EGRESS_IP_NAME {
        conditions::try_append(
            &mut status.conditions,
            conditions::allocated(
                false,
                REASON_INVALID_INSTANCE,
                format!(
                    "Only the ClusterGlobalEgressIP instance with the well-known name {:?} is supported",
                    CLUSTER_EGRESS_IP_NAME
                ),
            ),
        );
        return false;
    }

    if number_of_ips < 0 {
        conditions::try_append(
            &mut status.conditions,
            conditions::allocated(
                false,
                REASON_INVALID_INPUT,
                "The numberOfIPs cannot be negative".into(),
            ),
        );
        return false;
    }

    if number_of_ips == 0 {
        conditions::try_append(
            &mut status.conditions,
            conditions::allocated(false, REASON_ZERO_INPUT, "The specified numberOfIPs is 0".into()),
        );
    }

    true
}

async fn on_create_or_update<E: Executor>(
    ctx: &Context<E>,
    number_of_ips: usize,
    status: &mut GlobalEgressIPStatus,
) -> Outcome {
    if number_of_ips == status.allocated_ips.len() {
        debug!("{} IP(s) already allocated", number_of_ips);
        return Outcome::Steady;
    }

    // A changed count always releases the whole previous allocation; resizes
    // are never incremental.
    if !status.allocated_ips.is_empty() {
        info!("releasing previously allocated IPs {:?}", status.allocated_ips);
        flush_egress_rules(ctx, &status.allocated_ips).await;
        if let Err(e) = ctx.pool.release(&status.allocated_ips) {
            error!("error releasing global IPs: {}", e);
        }
    }

    allocate_global_ips(ctx, number_of_ips, status).await
}

async fn allocate_global_ips<E: Executor>(
    ctx: &Context<E>,
    number_of_ips: usize,
    status: &mut GlobalEgressIPStatus,
) -> Outcome {
    status.allocated_ips.clear();

    if number_of_ips == 0 {
        return Outcome::Steady;
    }

    info!("allocating {} global IP(s)", number_of_ips);
    let allocated = match ctx.pool.allocate(number_of_ips) {
        Ok(ips) => ips,
        Err(e) => {
            error!("error allocating global IPs: {}", e);
            conditions::try_append(
                &mut status.conditions,
                conditions::allocated(
                    false,
                    REASON_POOL_ALLOCATION_FAILED,
                    format!(
                        "Error allocating {} global IP(s) from the pool: {}",
                        number_of_ips, e
                    ),
                ),
            );
            return Outcome::Requeue;
        }
    };

    if let Err(e) = program_egress_rules(ctx, &allocated).await {
        error!("error programming egress rules: {}", e);
        if let Err(e) = ctx.pool.release(&allocated) {
            error!("error releasing global IPs after rollback: {}", e);
        }
        return Outcome::Requeue;
    }

    conditions::try_append(
        &mut status.conditions,
        conditions::allocated(
            true,
            REASON_SUCCESS,
            format!("Allocated {} global IP(s)", number_of_ips),
        ),
    );
    status.allocated_ips = allocated;

    Outcome::Steady
}

/// Installs the SNAT rule for every local subnet; a mid-loop failure unwinds
/// the rules installed so far and surfaces the error.
pub(crate) async fn program_egress_rules<E: Executor>(
    ctx: &Context<E>,
    ips: &[Ipv4Addr],
) -> Result<()> {
    let snat = snat_target(ips);
    let mut programmed: Vec<String> = Vec::new();

    for subnet in &ctx.local_subnets {
        if let Err(e) = ctx
            .iptables
            .add_cluster_egress_rule(subnet, &snat, GLOBALNET_MARK)
            .await
        {
            delete_egress_rules(ctx, &programmed, &snat).await;
            return Err(e.into());
        }
        programmed.push(subnet.clone());
    }

    Ok(())
}

pub(crate) async fn flush_egress_rules<E: Executor>(ctx: &Context<E>, ips: &[Ipv4Addr]) {
    if ips.is_empty() {
        return;
    }
    delete_egress_rules(ctx, &ctx.local_subnets, &snat_target(ips)).await;
}

async fn delete_egress_rules<E: Executor>(ctx: &Context<E>, subnets: &[String], snat: &str) {
    for subnet in subnets {
        if let Err(e) = ctx
            .iptables
            .remove_cluster_egress_rule(subnet, snat, GLOBALNET_MARK)
            .await
        {
            error!("error removing egress rule for {}: {}", subnet, e);
        }
    }
}

async fn publish_status<E: Executor>(
    ctx: &Context<E>,
    egress_ip: &ClusterGlobalEgressIP,
    status: GlobalEgressIPStatus,
) -> Result<()> {
    let current = egress_ip.status.clone().unwrap_or_default();
    if current == status {
        debug!("status unchanged, skipping publish");
        return Ok(());
    }

    let patch = serde_json::json!({ "status": status });
    ctx.api
        .patch_status(
            &egress_ip.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
    Ok(())
}
