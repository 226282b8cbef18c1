pub mod routes;
pub mod sysctl;
pub mod vxlan;
pub mod xfrm;

use std::io;
use std::net::{IpAddr, Ipv4Addr};

use futures::TryStreamExt;
use rtnetlink::Handle;
use rtnetlink::packet_route::address::AddressAttribute;
use thiserror::Error;

pub use routes::OverlayRoute;
pub use vxlan::{VxlanLink, VxlanSpec};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("link {0} not found")]
    LinkNotFound(String),

    #[error("no IPv4 address on link {0}")]
    NoIpv4Address(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

impl Error {
    /// Netlink errors carrying EEXIST, raised when an idempotent ensure
    /// re-applies state the kernel already holds.
    pub(crate) fn is_already_exists(err: &rtnetlink::Error) -> bool {
        matches!(err, rtnetlink::Error::NetlinkError(e)
            if e.to_io().kind() == io::ErrorKind::AlreadyExists)
    }

    pub(crate) fn is_not_found(err: &rtnetlink::Error) -> bool {
        matches!(err, rtnetlink::Error::NetlinkError(e)
            if e.to_io().kind() == io::ErrorKind::NotFound)
    }
}

/// Owns a route-netlink connection; all kernel mutations of the route agent
/// go through this handle.
pub struct Netlink {
    handle: Handle,
}

impl Netlink {
    pub fn new() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub async fn link_index(&self, name: &str) -> Result<u32> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        let link = links
            .try_next()
            .await
            .map_err(|_| Error::LinkNotFound(name.to_string()))?
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))?;
        Ok(link.header.index)
    }

    /// First IPv4 address (with prefix length) configured on the named link.
    pub async fn host_ipv4(&self, name: &str) -> Result<(Ipv4Addr, u8)> {
        let index = self.link_index(name).await?;
        let mut addresses = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute();

        while let Some(msg) = addresses.try_next().await? {
            for attr in msg.attributes {
                if let AddressAttribute::Address(IpAddr::V4(ip)) = attr {
                    return Ok((ip, msg.header.prefix_len));
                }
            }
        }

        Err(Error::NoIpv4Address(name.to_string()))
    }
}
