use std::net::Ipv4Addr;

use kube::CustomResource;
use kube::KubeSchema;
use schemars::json_schema;
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_GLOBAL_EGRESS_IP: &str = "clusterglobalegressips.submariner.io";

/// Well-known name of the only legal ClusterGlobalEgressIP instance.
pub const CLUSTER_EGRESS_IP_NAME: &str = "cluster-egress-ip";

pub const CONDITION_ALLOCATED: &str = "Allocated";

pub const REASON_SUCCESS: &str = "Success";
pub const REASON_INVALID_INSTANCE: &str = "InvalidInstance";
pub const REASON_INVALID_INPUT: &str = "InvalidInput";
pub const REASON_ZERO_INPUT: &str = "ZeroInput";
pub const REASON_POOL_ALLOCATION_FAILED: &str = "IPPoolAllocationFailed";

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use schemars::JsonSchema;

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "ClusterGlobalEgressIP",
    status = "GlobalEgressIPStatus",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGlobalEgressIPSpec {
    /// Number of globally-routable egress IPs to allocate for the cluster.
    /// Absent means 1.
    #[serde(default, rename = "numberOfIPs", skip_serializing_if = "Option::is_none")]
    pub number_of_ips: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalEgressIPStatus {
    #[serde(default, rename = "allocatedIPs", skip_serializing_if = "Vec::is_empty")]
    pub allocated_ips: Vec<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "conditions")]
    pub conditions: Vec<Condition>,
}

impl ClusterGlobalEgressIP {
    pub fn number_of_ips(&self) -> i32 {
        self.spec.number_of_ips.unwrap_or(1)
    }
}

fn conditions(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    json_schema!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_number_of_ips_defaults_to_one() {
        let egress_ip = ClusterGlobalEgressIP::new(
            CLUSTER_EGRESS_IP_NAME,
            ClusterGlobalEgressIPSpec::default(),
        );
        assert_eq!(egress_ip.number_of_ips(), 1);

        let egress_ip = ClusterGlobalEgressIP::new(
            CLUSTER_EGRESS_IP_NAME,
            ClusterGlobalEgressIPSpec {
                number_of_ips: Some(3),
            },
        );
        assert_eq!(egress_ip.number_of_ips(), 3);
    }

    #[test]
    fn test_status_serializes_ips_as_strings() {
        let status = GlobalEgressIPStatus {
            allocated_ips: vec![Ipv4Addr::new(169, 254, 0, 1)],
            conditions: vec![],
        };
        let value = serde_json::to_value(&status).expect("status to json");
        assert_eq!(value["allocatedIPs"][0], "169.254.0.1");
    }
}
