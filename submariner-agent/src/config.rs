use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Per-node overlay reconciler
    RouteAgent(RouteAgentArgs),
    /// Cluster-wide global egress IP reconciler
    Globalnet(GlobalnetArgs),
    /// Print the submariner CRDs as YAML
    Crds,
}

#[derive(Parser, Debug, Clone)]
pub struct RouteAgentArgs {
    /// Name of the node the agent is running on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// ID of the local cluster within the federation
    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// Namespace the route-agent daemonset pods run in
    #[arg(long, env = "SUBMARINER_NAMESPACE", default_value = "submariner")]
    pub namespace: String,

    /// Host interface carrying the node's primary IPv4 address
    #[arg(long, default_value = "eth0")]
    pub iface: String,

    /// Metrics listener for the agent
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,
}

#[derive(Parser, Debug, Clone)]
pub struct GlobalnetArgs {
    /// CIDR the globally-routable egress IPs are allocated from
    #[arg(long, env = "GLOBALNET_CIDR")]
    pub global_cidr: Ipv4Net,

    /// Local subnets whose egress is SNATed to the allocated IPs
    #[arg(
        long = "local-subnet",
        env = "LOCAL_SUBNETS",
        value_delimiter = ',',
        required = true
    )]
    pub local_subnets: Vec<String>,

    /// Metrics listener for the agent
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,
}
