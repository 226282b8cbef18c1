pub mod cluster;
pub mod endpoint;
pub mod globalegressip;

pub use cluster::{Cluster, ClusterSpec};
pub use endpoint::{Endpoint, EndpointSpec};
pub use globalegressip::{
    ClusterGlobalEgressIP, ClusterGlobalEgressIPSpec, GlobalEgressIPStatus,
};
