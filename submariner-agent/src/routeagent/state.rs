use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use submariner_netlink::VxlanLink;
use submariner_netlink::vxlan::vtep_address;

/// Node-local view of the overlay. Owned by the single reconcile loop; no
/// other task reads or writes it.
pub(crate) struct RouteState {
    pub cluster_id: String,
    pub node_name: String,
    pub host_ip: Ipv4Addr,
    pub host_prefix: u8,

    pub is_gateway_node: bool,
    pub gateway_node_ip: Option<Ipv4Addr>,
    pub vxlan_gateway_vtep: Option<Ipv4Addr>,
    pub vxlan: Option<VxlanLink>,
    pub remote_vteps: BTreeSet<Ipv4Addr>,

    /// Remote CIDRs keyed by the owning cluster, so a cluster deletion can
    /// retract exactly the CIDRs that no other cluster still claims.
    subnets_by_cluster: BTreeMap<String, BTreeSet<Ipv4Net>>,
}

impl RouteState {
    pub(crate) fn new(
        cluster_id: String,
        node_name: String,
        host_ip: Ipv4Addr,
        host_prefix: u8,
    ) -> Self {
        Self {
            cluster_id,
            node_name,
            host_ip,
            host_prefix,
            is_gateway_node: false,
            gateway_node_ip: None,
            vxlan_gateway_vtep: None,
            vxlan: None,
            remote_vteps: BTreeSet::new(),
            subnets_by_cluster: BTreeMap::new(),
        }
    }

    pub(crate) fn local_vtep(&self) -> Ipv4Addr {
        vtep_address(self.host_ip)
    }

    /// Union of all remote cluster CIDRs.
    pub(crate) fn remote_subnets(&self) -> BTreeSet<Ipv4Net> {
        self.subnets_by_cluster
            .values()
            .flatten()
            .copied()
            .collect()
    }

    /// Records a cluster's CIDRs and returns the ones new to the union.
    pub(crate) fn merge_cluster_subnets(
        &mut self,
        cluster_id: &str,
        cidrs: impl IntoIterator<Item = Ipv4Net>,
    ) -> Vec<Ipv4Net> {
        let before = self.remote_subnets();
        self.subnets_by_cluster
            .entry(cluster_id.to_string())
            .or_default()
            .extend(cidrs);

        self.remote_subnets()
            .difference(&before)
            .copied()
            .collect()
    }

    /// Forgets specific CIDRs of one cluster, e.g. when installing their
    /// bypass rules failed and the event will be retried.
    pub(crate) fn unmerge_cluster_subnets(&mut self, cluster_id: &str, cidrs: &[Ipv4Net]) {
        if let Some(subnets) = self.subnets_by_cluster.get_mut(cluster_id) {
            for cidr in cidrs {
                subnets.remove(cidr);
            }
            if subnets.is_empty() {
                self.subnets_by_cluster.remove(cluster_id);
            }
        }
    }

    /// Drops a cluster's CIDRs and returns the ones that left the union,
    /// i.e. those no remaining cluster still claims.
    pub(crate) fn remove_cluster_subnets(&mut self, cluster_id: &str) -> Vec<Ipv4Net> {
        let before = self.remote_subnets();
        self.subnets_by_cluster.remove(cluster_id);

        let after = self.remote_subnets();
        before.difference(&after).copied().collect()
    }

    pub(crate) fn add_vtep(&mut self, vtep: Ipv4Addr) -> bool {
        self.remote_vteps.insert(vtep)
    }

    pub(crate) fn remove_vtep(&mut self, vtep: Ipv4Addr) -> bool {
        self.remote_vteps.remove(&vtep)
    }
}
