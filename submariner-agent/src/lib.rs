pub mod config;
pub mod http;
pub mod kubernetes;
pub mod metrics;
pub mod routeagent;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("netlink error: {0}")]
    NetlinkError(#[from] submariner_netlink::Error),

    #[error("iptables error: {0}")]
    IptablesError(#[from] submariner_iptables::Error),

    #[error("globalnet error: {0}")]
    GlobalnetError(#[from] submariner_globalnet::Error),

    #[error("crd error: {0}")]
    CrdError(#[from] submariner_crds::Error),

    #[error("invalid CIDR: {0}")]
    CidrParseError(#[from] ipnet::AddrParseError),

    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
