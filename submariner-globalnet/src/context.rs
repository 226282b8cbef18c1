use kube::Api;
use submariner_crds::v1::ClusterGlobalEgressIP;
use submariner_ipam::IpPool;
use submariner_iptables::{Executor, Iptables, ShellExecutor};

pub struct Context<E: Executor = ShellExecutor> {
    pub client: kube::Client,
    pub api: Api<ClusterGlobalEgressIP>,
    pub pool: IpPool,
    pub iptables: Iptables<E>,
    /// Local CIDRs whose egress traffic is SNATed to the allocated global
    /// IPs.
    pub local_subnets: Vec<String>,
}
