use thiserror::Error;

pub mod v1;

use kube::CustomResourceExt;

/// Label selector identifying route-agent daemonset pods.
pub const ROUTE_AGENT_POD_SELECTOR: &str = "app=submariner-routeagent";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub fn crd_gen_cluster() -> Result<()> {
    print!("---\n{}", serde_yaml::to_string(&v1::cluster::Cluster::crd())?);
    Ok(())
}

pub fn crd_gen_endpoint() -> Result<()> {
    print!(
        "---\n{}",
        serde_yaml::to_string(&v1::endpoint::Endpoint::crd())?
    );
    Ok(())
}

pub fn crd_gen_global_egress_ip() -> Result<()> {
    print!(
        "---\n{}",
        serde_yaml::to_string(&v1::globalegressip::ClusterGlobalEgressIP::crd())?
    );
    Ok(())
}

pub fn crd_gen_all() -> Result<()> {
    let crds = vec![
        v1::cluster::Cluster::crd(),
        v1::endpoint::Endpoint::crd(),
        v1::globalegressip::ClusterGlobalEgressIP::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
