use kube::CustomResource;
use kube::KubeSchema;
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_CLUSTER: &str = "clusters.submariner.io";

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "Cluster",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Unique ID of the cluster within the federation
    pub cluster_id: String,
    /// Pod CIDRs of the cluster
    pub cluster_cidr: Vec<String>,
    /// Service CIDRs of the cluster
    pub service_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub color_codes: Vec<String>,
}

impl Cluster {
    /// All CIDRs a peer cluster exposes to the federation.
    pub fn subnets(&self) -> impl Iterator<Item = &String> {
        self.spec.cluster_cidr.iter().chain(self.spec.service_cidr.iter())
    }
}
