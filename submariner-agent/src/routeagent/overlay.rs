use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::Pod;
use submariner_crds::v1::{Cluster, Endpoint};
use submariner_iptables::{Executor, Iptables};
use submariner_netlink::vxlan::{VXLAN_IFACE, vtep_address};
use submariner_netlink::{Netlink, VxlanLink, VxlanSpec, sysctl, xfrm};
use tracing::{debug, info, warn};

use crate::Result;
use crate::routeagent::events::RouteEvent;
use crate::routeagent::state::RouteState;

/// Kernel mutations of the overlay device, its FDB, and its route table.
/// The production implementation talks netlink; tests substitute an
/// in-memory kernel.
#[async_trait]
pub(crate) trait OverlayDriver: Send + Sync {
    async fn ensure_device(&self, spec: &VxlanSpec) -> Result<VxlanLink>;
    async fn lookup_device(&self) -> Result<Option<VxlanLink>>;
    async fn assign_address(&self, link: VxlanLink, ip: Ipv4Addr, prefix: u8) -> Result<()>;
    async fn add_fdb_entry(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()>;
    async fn del_fdb_entry(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()>;
    async fn list_overlay_routes(&self, link: VxlanLink) -> Result<Vec<(Ipv4Net, Ipv4Addr)>>;
    async fn add_overlay_route(&self, link: VxlanLink, dst: Ipv4Net, gw: Ipv4Addr) -> Result<()>;
    async fn del_overlay_route(&self, link: VxlanLink, dst: Ipv4Net, gw: Ipv4Addr) -> Result<()>;
    async fn flush_xfrm_policies(&self) -> Result<()>;
    async fn enable_loose_rp_filter(&self, iface: &str) -> Result<()>;
}

/// Packet-filter state for inter-cluster traffic.
#[async_trait]
pub(crate) trait NatRules: Send + Sync {
    async fn ensure_nat_chains(&self) -> Result<()>;
    async fn add_bypass_rules(&self, cidr: &str) -> Result<()>;
    async fn remove_bypass_rules(&self, cidr: &str) -> Result<()>;
}

#[async_trait]
impl OverlayDriver for Netlink {
    async fn ensure_device(&self, spec: &VxlanSpec) -> Result<VxlanLink> {
        Ok(Netlink::ensure_vxlan(self, spec).await?)
    }

    async fn lookup_device(&self) -> Result<Option<VxlanLink>> {
        match self.link_index(VXLAN_IFACE).await {
            Ok(index) => Ok(Some(VxlanLink { index })),
            Err(submariner_netlink::Error::LinkNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn assign_address(&self, link: VxlanLink, ip: Ipv4Addr, prefix: u8) -> Result<()> {
        Ok(self.add_address(link, ip, prefix).await?)
    }

    async fn add_fdb_entry(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
        Ok(self.add_fdb(link, vtep).await?)
    }

    async fn del_fdb_entry(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
        Ok(self.del_fdb(link, vtep).await?)
    }

    async fn list_overlay_routes(&self, link: VxlanLink) -> Result<Vec<(Ipv4Net, Ipv4Addr)>> {
        let routes = self.list_routes(link).await?;
        Ok(routes.iter().map(|r| (r.destination, r.gateway)).collect())
    }

    async fn add_overlay_route(&self, link: VxlanLink, dst: Ipv4Net, gw: Ipv4Addr) -> Result<()> {
        Ok(self.add_route(link, dst, gw).await?)
    }

    async fn del_overlay_route(&self, link: VxlanLink, dst: Ipv4Net, gw: Ipv4Addr) -> Result<()> {
        for route in self.list_routes(link).await? {
            if route.destination == dst && route.gateway == gw {
                self.del_route(route).await?;
            }
        }
        Ok(())
    }

    async fn flush_xfrm_policies(&self) -> Result<()> {
        Ok(xfrm::flush_policies().await?)
    }

    async fn enable_loose_rp_filter(&self, iface: &str) -> Result<()> {
        Ok(sysctl::set_loose_rp_filter(iface).await?)
    }
}

#[async_trait]
impl<E: Executor> NatRules for Iptables<E> {
    async fn ensure_nat_chains(&self) -> Result<()> {
        Ok(self.ensure_chains().await?)
    }

    async fn add_bypass_rules(&self, cidr: &str) -> Result<()> {
        Ok(self.add_inter_cluster_bypass(cidr).await?)
    }

    async fn remove_bypass_rules(&self, cidr: &str) -> Result<()> {
        Ok(self.remove_inter_cluster_bypass(cidr).await?)
    }
}

pub(crate) struct RouteController<D, N> {
    state: RouteState,
    driver: D,
    nat: N,
}

impl<D: OverlayDriver, N: NatRules> RouteController<D, N> {
    pub(crate) fn new(state: RouteState, driver: D, nat: N) -> Self {
        Self { state, driver, nat }
    }

    /// Chain bootstrap must precede any rule installation; a failure here is
    /// fatal to startup.
    pub(crate) async fn init(&self) -> Result<()> {
        self.nat.ensure_nat_chains().await
    }

    pub(crate) async fn handle(&mut self, event: &RouteEvent) -> Result<()> {
        match event {
            RouteEvent::ClusterApplied(cluster) => self.on_cluster_applied(cluster).await,
            RouteEvent::ClusterDeleted(cluster) => self.on_cluster_deleted(cluster).await,
            RouteEvent::EndpointApplied(endpoint) => self.on_endpoint_applied(endpoint).await,
            RouteEvent::EndpointDeleted(endpoint) => self.on_endpoint_deleted(endpoint).await,
            RouteEvent::PodApplied(pod) => self.on_pod_applied(pod).await,
            RouteEvent::PodDeleted(pod) => self.on_pod_deleted(pod).await,
        }
    }

    async fn on_cluster_applied(&mut self, cluster: &Cluster) -> Result<()> {
        if cluster.spec.cluster_id == self.state.cluster_id {
            debug!("ignoring cluster event for the local cluster");
            return Ok(());
        }

        let added = self
            .state
            .merge_cluster_subnets(&cluster.spec.cluster_id, parse_subnets(cluster));
        for (i, cidr) in added.iter().enumerate() {
            info!(
                "adding inter-cluster bypass for {} of cluster {}",
                cidr, cluster.spec.cluster_id
            );
            if let Err(e) = self.nat.add_bypass_rules(&cidr.to_string()).await {
                // forget the uninstalled CIDRs so the retried event sees them
                self.state
                    .unmerge_cluster_subnets(&cluster.spec.cluster_id, &added[i..]);
                return Err(e);
            }
        }

        if !added.is_empty() && !self.state.is_gateway_node && self.state.vxlan.is_some() {
            self.reconcile_routes().await?;
        }

        Ok(())
    }

    async fn on_cluster_deleted(&mut self, cluster: &Cluster) -> Result<()> {
        if cluster.spec.cluster_id == self.state.cluster_id {
            return Ok(());
        }

        let removed = self.state.remove_cluster_subnets(&cluster.spec.cluster_id);
        for (i, cidr) in removed.iter().enumerate() {
            info!(
                "removing inter-cluster bypass for {} of deleted cluster {}",
                cidr, cluster.spec.cluster_id
            );
            if let Err(e) = self.nat.remove_bypass_rules(&cidr.to_string()).await {
                // keep the unremoved CIDRs so the retried event tears them down
                self.state.merge_cluster_subnets(
                    &cluster.spec.cluster_id,
                    removed[i..].iter().copied(),
                );
                return Err(e);
            }
        }

        if !removed.is_empty() && !self.state.is_gateway_node && self.state.vxlan.is_some() {
            self.reconcile_routes().await?;
        }

        Ok(())
    }

    async fn on_endpoint_applied(&mut self, endpoint: &Endpoint) -> Result<()> {
        if endpoint.spec.cluster_id != self.state.cluster_id {
            debug!("ignoring endpoint of cluster {}", endpoint.spec.cluster_id);
            return Ok(());
        }

        let gateway_node_ip = endpoint.spec.private_ip;
        self.state.gateway_node_ip = Some(gateway_node_ip);
        self.state.vxlan_gateway_vtep = Some(vtep_address(gateway_node_ip));

        if endpoint.spec.hostname == self.state.node_name {
            info!("this node ({}) is the gateway", self.state.node_name);
            self.become_gateway().await
        } else {
            info!(
                "gateway is {} ({}), reconciling as worker",
                endpoint.spec.hostname, gateway_node_ip
            );
            self.become_worker(gateway_node_ip).await
        }
    }

    /// A removed endpoint naming this node takes its overlay routes with it.
    async fn on_endpoint_deleted(&mut self, endpoint: &Endpoint) -> Result<()> {
        if endpoint.spec.cluster_id != self.state.cluster_id {
            return Ok(());
        }
        if endpoint.spec.hostname != self.state.node_name {
            return Ok(());
        }

        info!("endpoint for this node removed, cleaning overlay routes");
        self.clean_overlay_routes().await
    }

    async fn on_pod_applied(&mut self, pod: &Pod) -> Result<()> {
        let Some(vtep) = pod_ipv4(pod) else {
            return Ok(());
        };

        if self.state.add_vtep(vtep)
            && self.state.is_gateway_node
            && let Some(link) = self.state.vxlan
        {
            if let Err(e) = self.driver.add_fdb_entry(link, vtep).await {
                self.state.remove_vtep(vtep);
                return Err(e);
            }
        }

        Ok(())
    }

    async fn on_pod_deleted(&mut self, pod: &Pod) -> Result<()> {
        let Some(vtep) = pod_ipv4(pod) else {
            return Ok(());
        };

        if self.state.remove_vtep(vtep)
            && self.state.is_gateway_node
            && let Some(link) = self.state.vxlan
        {
            if let Err(e) = self.driver.del_fdb_entry(link, vtep).await {
                self.state.add_vtep(vtep);
                return Err(e);
            }
        }

        Ok(())
    }

    async fn become_gateway(&mut self) -> Result<()> {
        self.clean_overlay_routes().await?;
        self.state.is_gateway_node = true;

        let link = self.driver.ensure_device(&VxlanSpec::gateway()).await?;
        self.state.vxlan = Some(link);

        for vtep in self.state.remote_vteps.clone() {
            self.driver.add_fdb_entry(link, vtep).await?;
        }

        self.driver
            .assign_address(link, self.state.local_vtep(), self.state.host_prefix)
            .await?;
        self.driver.enable_loose_rp_filter(VXLAN_IFACE).await?;

        Ok(())
    }

    async fn become_worker(&mut self, gateway_node_ip: Ipv4Addr) -> Result<()> {
        self.state.is_gateway_node = false;

        let local_vtep = self.state.local_vtep();
        if self.state.vxlan_gateway_vtep == Some(local_vtep) {
            warn!(
                "gateway VTEP {} collides with the local VTEP; two nodes share the same last three address octets",
                local_vtep
            );
        }

        let link = self
            .driver
            .ensure_device(&VxlanSpec::worker(gateway_node_ip, local_vtep))
            .await?;
        self.state.vxlan = Some(link);

        self.driver
            .assign_address(link, local_vtep, self.state.host_prefix)
            .await?;
        self.driver.flush_xfrm_policies().await?;
        self.reconcile_routes().await
    }

    /// Drives the overlay route table to exactly one route per remote
    /// subnet, gatewayed at the gateway's VTEP. Converges from any starting
    /// state.
    async fn reconcile_routes(&self) -> Result<()> {
        let (Some(link), Some(gateway)) = (self.state.vxlan, self.state.vxlan_gateway_vtep) else {
            return Ok(());
        };
        let desired = self.state.remote_subnets();

        for (dst, gw) in self.driver.list_overlay_routes(link).await? {
            if !desired.contains(&dst) || gw != gateway {
                debug!("removing route {} via {}", dst, gw);
                self.driver.del_overlay_route(link, dst, gw).await?;
            }
        }

        let current = self.driver.list_overlay_routes(link).await?;
        for dst in desired {
            if !current.contains(&(dst, gateway)) {
                debug!("adding route {} via {}", dst, gateway);
                self.driver.add_overlay_route(link, dst, gateway).await?;
            }
        }

        Ok(())
    }

    /// Removes every overlay route for a known remote subnet, regardless of
    /// its gateway. The device is looked up in the kernel so routes left by
    /// a previous agent run are cleaned as well.
    async fn clean_overlay_routes(&self) -> Result<()> {
        let link = match self.state.vxlan {
            Some(link) => link,
            None => match self.driver.lookup_device().await? {
                Some(link) => link,
                None => return Ok(()),
            },
        };

        let desired = self.state.remote_subnets();
        for (dst, gw) in self.driver.list_overlay_routes(link).await? {
            if desired.contains(&dst) {
                debug!("removing route {} via {}", dst, gw);
                self.driver.del_overlay_route(link, dst, gw).await?;
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &RouteState {
        &self.state
    }

    #[cfg(test)]
    fn driver(&self) -> &D {
        &self.driver
    }

    #[cfg(test)]
    fn nat(&self) -> &N {
        &self.nat
    }
}

fn parse_subnets(cluster: &Cluster) -> Vec<Ipv4Net> {
    cluster
        .subnets()
        .filter_map(|cidr| match cidr.parse() {
            Ok(net) => Some(net),
            Err(e) => {
                warn!(
                    "skipping unparseable CIDR {:?} of cluster {}: {}",
                    cidr, cluster.spec.cluster_id, e
                );
                None
            }
        })
        .collect()
}

fn pod_ipv4(pod: &Pod) -> Option<Ipv4Addr> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_ref()?
        .parse::<Ipv4Addr>()
        .ok()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;
    use std::sync::{Mutex, MutexGuard};

    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;
    use submariner_crds::v1::{ClusterSpec, EndpointSpec};

    use super::*;

    #[derive(Default)]
    struct FakeKernel {
        device: Option<(VxlanSpec, VxlanLink)>,
        addresses: BTreeSet<(Ipv4Addr, u8)>,
        fdb: BTreeSet<Ipv4Addr>,
        routes: BTreeSet<(Ipv4Net, Ipv4Addr)>,
        xfrm_flushes: usize,
        rp_filter_loose: BTreeSet<String>,
    }

    #[derive(Default)]
    struct FakeDriver {
        kernel: Mutex<FakeKernel>,
    }

    impl FakeDriver {
        fn kernel(&self) -> MutexGuard<'_, FakeKernel> {
            self.kernel.lock().unwrap()
        }
    }

    #[async_trait]
    impl OverlayDriver for FakeDriver {
        async fn ensure_device(&self, spec: &VxlanSpec) -> Result<VxlanLink> {
            let mut kernel = self.kernel();
            let link = kernel
                .device
                .map(|(_, link)| link)
                .unwrap_or(VxlanLink { index: 7 });
            kernel.device = Some((*spec, link));
            Ok(link)
        }

        async fn lookup_device(&self) -> Result<Option<VxlanLink>> {
            Ok(self.kernel().device.map(|(_, link)| link))
        }

        async fn assign_address(&self, _link: VxlanLink, ip: Ipv4Addr, prefix: u8) -> Result<()> {
            self.kernel().addresses.insert((ip, prefix));
            Ok(())
        }

        async fn add_fdb_entry(&self, _link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
            self.kernel().fdb.insert(vtep);
            Ok(())
        }

        async fn del_fdb_entry(&self, _link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
            self.kernel().fdb.remove(&vtep);
            Ok(())
        }

        async fn list_overlay_routes(
            &self,
            _link: VxlanLink,
        ) -> Result<Vec<(Ipv4Net, Ipv4Addr)>> {
            Ok(self.kernel().routes.iter().copied().collect())
        }

        async fn add_overlay_route(
            &self,
            _link: VxlanLink,
            dst: Ipv4Net,
            gw: Ipv4Addr,
        ) -> Result<()> {
            self.kernel().routes.insert((dst, gw));
            Ok(())
        }

        async fn del_overlay_route(
            &self,
            _link: VxlanLink,
            dst: Ipv4Net,
            gw: Ipv4Addr,
        ) -> Result<()> {
            self.kernel().routes.remove(&(dst, gw));
            Ok(())
        }

        async fn flush_xfrm_policies(&self) -> Result<()> {
            self.kernel().xfrm_flushes += 1;
            Ok(())
        }

        async fn enable_loose_rp_filter(&self, iface: &str) -> Result<()> {
            self.kernel().rp_filter_loose.insert(iface.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNat {
        chains_ensured: Mutex<bool>,
        bypass: Mutex<BTreeSet<String>>,
    }

    #[async_trait]
    impl NatRules for FakeNat {
        async fn ensure_nat_chains(&self) -> Result<()> {
            *self.chains_ensured.lock().unwrap() = true;
            Ok(())
        }

        async fn add_bypass_rules(&self, cidr: &str) -> Result<()> {
            self.bypass.lock().unwrap().insert(cidr.to_string());
            Ok(())
        }

        async fn remove_bypass_rules(&self, cidr: &str) -> Result<()> {
            self.bypass.lock().unwrap().remove(cidr);
            Ok(())
        }
    }

    const LOCAL_CLUSTER: &str = "east";
    const LOCAL_NODE: &str = "node-a";

    fn controller() -> RouteController<FakeDriver, FakeNat> {
        let state = RouteState::new(
            LOCAL_CLUSTER.into(),
            LOCAL_NODE.into(),
            Ipv4Addr::new(10, 1, 2, 3),
            24,
        );
        RouteController::new(state, FakeDriver::default(), FakeNat::default())
    }

    fn cluster(id: &str, cluster_cidr: &[&str], service_cidr: &[&str]) -> Cluster {
        Cluster::new(
            id,
            ClusterSpec {
                cluster_id: id.into(),
                cluster_cidr: cluster_cidr.iter().map(|c| c.to_string()).collect(),
                service_cidr: service_cidr.iter().map(|c| c.to_string()).collect(),
                color_codes: vec![],
            },
        )
    }

    fn endpoint(cluster_id: &str, hostname: &str, private_ip: Ipv4Addr) -> Endpoint {
        Endpoint::new(
            &format!("{cluster_id}-{hostname}"),
            EndpointSpec {
                cluster_id: cluster_id.into(),
                cable_name: format!("submariner-cable-{cluster_id}-{hostname}"),
                hostname: hostname.into(),
                private_ip,
                public_ip: None,
                subnets: vec![],
                nat_enabled: false,
                backend: "strongswan".into(),
            },
        )
    }

    fn pod(name: &str, ip: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: Some(ip.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn net(s: &str) -> Ipv4Net {
        s.parse().expect("valid cidr")
    }

    #[tokio::test]
    async fn test_worker_endpoint_programs_overlay() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &["10.96.0.0/12"],
            )))
            .await
            .expect("cluster handled");

        let gateway_ip = Ipv4Addr::new(10, 1, 2, 10);
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                "node-b",
                gateway_ip,
            )))
            .await
            .expect("endpoint handled");

        assert!(!controller.state().is_gateway_node);

        let kernel = controller.driver().kernel();
        let (spec, _) = kernel.device.expect("device created");
        assert_eq!(
            spec,
            VxlanSpec::worker(gateway_ip, Ipv4Addr::new(240, 1, 2, 3))
        );
        assert!(kernel.addresses.contains(&(Ipv4Addr::new(240, 1, 2, 3), 24)));
        assert_eq!(kernel.xfrm_flushes, 1);

        let gateway_vtep = Ipv4Addr::new(240, 1, 2, 10);
        assert_eq!(
            kernel.routes,
            BTreeSet::from([
                (net("10.32.0.0/16"), gateway_vtep),
                (net("10.96.0.0/12"), gateway_vtep),
            ])
        );
    }

    #[tokio::test]
    async fn test_reconcile_replaces_stale_routes() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &[],
            )))
            .await
            .expect("cluster handled");

        // a route from a previous gateway and one owned by nobody
        {
            let mut kernel = controller.driver().kernel();
            kernel
                .routes
                .insert((net("10.32.0.0/16"), Ipv4Addr::new(240, 9, 9, 9)));
            kernel
                .routes
                .insert((net("172.16.0.0/24"), Ipv4Addr::new(240, 9, 9, 9)));
        }

        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                "node-b",
                Ipv4Addr::new(10, 1, 2, 10),
            )))
            .await
            .expect("endpoint handled");

        let kernel = controller.driver().kernel();
        assert_eq!(
            kernel.routes,
            BTreeSet::from([(net("10.32.0.0/16"), Ipv4Addr::new(240, 1, 2, 10))])
        );
    }

    #[tokio::test]
    async fn test_gateway_endpoint_installs_fdb_for_known_vteps() {
        let mut controller = controller();
        for ip in ["10.1.2.4", "10.1.2.5"] {
            controller
                .handle(&RouteEvent::PodApplied(pod(ip, ip)))
                .await
                .expect("pod handled");
        }

        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                LOCAL_NODE,
                Ipv4Addr::new(10, 1, 2, 3),
            )))
            .await
            .expect("endpoint handled");

        assert!(controller.state().is_gateway_node);

        let kernel = controller.driver().kernel();
        let (spec, _) = kernel.device.expect("device created");
        assert_eq!(spec, VxlanSpec::gateway());
        assert_eq!(
            kernel.fdb,
            BTreeSet::from([Ipv4Addr::new(10, 1, 2, 4), Ipv4Addr::new(10, 1, 2, 5)])
        );
        assert!(kernel.rp_filter_loose.contains(VXLAN_IFACE));
        assert!(kernel.addresses.contains(&(Ipv4Addr::new(240, 1, 2, 3), 24)));
    }

    #[tokio::test]
    async fn test_gateway_handoff_clears_worker_routes() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &[],
            )))
            .await
            .expect("cluster handled");

        // worker first, routes towards node-b
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                "node-b",
                Ipv4Addr::new(10, 1, 2, 10),
            )))
            .await
            .expect("worker endpoint handled");
        assert!(!controller.driver().kernel().routes.is_empty());

        // then this node takes over the gateway role
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                LOCAL_NODE,
                Ipv4Addr::new(10, 1, 2, 3),
            )))
            .await
            .expect("gateway endpoint handled");

        assert!(controller.state().is_gateway_node);
        let kernel = controller.driver().kernel();
        assert!(kernel.routes.is_empty());
        let (spec, _) = kernel.device.expect("device present");
        assert_eq!(spec, VxlanSpec::gateway());
    }

    #[tokio::test]
    async fn test_pod_add_on_gateway_updates_fdb() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                LOCAL_NODE,
                Ipv4Addr::new(10, 1, 2, 3),
            )))
            .await
            .expect("endpoint handled");

        let vtep = Ipv4Addr::new(10, 1, 2, 99);
        controller
            .handle(&RouteEvent::PodApplied(pod("peer", "10.1.2.99")))
            .await
            .expect("pod handled");

        assert!(controller.state().remote_vteps.contains(&vtep));
        assert!(controller.driver().kernel().fdb.contains(&vtep));

        controller
            .handle(&RouteEvent::PodDeleted(pod("peer", "10.1.2.99")))
            .await
            .expect("pod removal handled");

        assert!(!controller.state().remote_vteps.contains(&vtep));
        assert!(!controller.driver().kernel().fdb.contains(&vtep));
    }

    #[tokio::test]
    async fn test_cluster_events_manage_bypass_rules() {
        let mut controller = controller();

        // the local cluster never gets bypass rules
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                LOCAL_CLUSTER,
                &["10.42.0.0/16"],
                &[],
            )))
            .await
            .expect("local cluster handled");
        assert!(controller.nat().bypass.lock().unwrap().is_empty());

        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &["10.96.0.0/12"],
            )))
            .await
            .expect("remote cluster handled");
        assert_eq!(
            *controller.nat().bypass.lock().unwrap(),
            BTreeSet::from(["10.32.0.0/16".to_string(), "10.96.0.0/12".to_string()])
        );
    }

    #[tokio::test]
    async fn test_cluster_delete_retracts_subnets_and_routes() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &[],
            )))
            .await
            .expect("cluster handled");
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                "node-b",
                Ipv4Addr::new(10, 1, 2, 10),
            )))
            .await
            .expect("endpoint handled");
        assert!(!controller.driver().kernel().routes.is_empty());

        controller
            .handle(&RouteEvent::ClusterDeleted(cluster(
                "west",
                &["10.32.0.0/16"],
                &[],
            )))
            .await
            .expect("cluster removal handled");

        assert!(controller.nat().bypass.lock().unwrap().is_empty());
        assert!(controller.driver().kernel().routes.is_empty());
        assert!(controller.state().remote_subnets().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_endpoint_is_ignored() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                "west",
                "node-z",
                Ipv4Addr::new(10, 9, 9, 9),
            )))
            .await
            .expect("endpoint handled");

        assert!(controller.driver().kernel().device.is_none());
        assert!(controller.state().gateway_node_ip.is_none());
    }

    #[tokio::test]
    async fn test_endpoint_removal_for_this_node_cleans_routes() {
        let mut controller = controller();
        controller
            .handle(&RouteEvent::ClusterApplied(cluster(
                "west",
                &["10.32.0.0/16"],
                &[],
            )))
            .await
            .expect("cluster handled");
        controller
            .handle(&RouteEvent::EndpointApplied(endpoint(
                LOCAL_CLUSTER,
                "node-b",
                Ipv4Addr::new(10, 1, 2, 10),
            )))
            .await
            .expect("endpoint handled");
        assert!(!controller.driver().kernel().routes.is_empty());

        controller
            .handle(&RouteEvent::EndpointDeleted(endpoint(
                LOCAL_CLUSTER,
                LOCAL_NODE,
                Ipv4Addr::new(10, 1, 2, 3),
            )))
            .await
            .expect("endpoint removal handled");

        assert!(controller.driver().kernel().routes.is_empty());
    }
}
