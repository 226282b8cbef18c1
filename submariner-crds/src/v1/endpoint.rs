use std::net::Ipv4Addr;

use kube::CustomResource;
use kube::KubeSchema;
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_ENDPOINT: &str = "endpoints.submariner.io";

/// Published by the active gateway of a cluster; the route agents on every
/// node of that cluster derive their overlay wiring from it.
#[derive(CustomResource, KubeSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "Endpoint",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// ID of the cluster the gateway belongs to
    pub cluster_id: String,
    pub cable_name: String,
    /// Node hosting the gateway
    pub hostname: String,
    /// Node-local address of the gateway
    pub private_ip: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub nat_enabled: bool,
    /// Cable driver the gateway runs, e.g. "strongswan"
    #[serde(default)]
    pub backend: String,
}
