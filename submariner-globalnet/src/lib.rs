mod conditions;
mod context;
mod controller;
mod runtime;

use kube::runtime::finalizer;
use thiserror::Error;

pub use context::Context;
pub use runtime::{Config, start};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("ipam error: {0}")]
    IpamError(#[from] submariner_ipam::Error),

    #[error("iptables error: {0}")]
    IptablesError(#[from] submariner_iptables::Error),

    #[error("other error: {0}")]
    Other(String),
}

impl From<finalizer::Error<Error>> for Error {
    fn from(err: finalizer::Error<Error>) -> Self {
        match err {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
            finalizer::Error::AddFinalizer(e) | finalizer::Error::RemoveFinalizer(e) => {
                Error::KubeError(e)
            }
            finalizer::Error::UnnamedObject => Error::Other("object has no name".into()),
            finalizer::Error::InvalidFinalizer => Error::Other("invalid finalizer".into()),
        }
    }
}
