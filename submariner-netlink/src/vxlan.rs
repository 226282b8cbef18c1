use std::net::{IpAddr, Ipv4Addr};

use rtnetlink::packet_route::AddressFamily;
use rtnetlink::packet_route::link::{InfoData, InfoKind, InfoVxlan};
use rtnetlink::packet_route::neighbour::{
    NeighbourAddress, NeighbourAttribute, NeighbourFlags, NeighbourMessage, NeighbourState,
};
use rtnetlink::{LinkMessageBuilder, LinkUnspec, LinkVxlan};
use tracing::debug;

use crate::{Error, Netlink, Result};

pub const VXLAN_IFACE: &str = "vxlan100";
pub const VXLAN_VNI: u32 = 100;
pub const VXLAN_PORT: u16 = 4800;
pub const VXLAN_MTU: u32 = 1450;

/// First octet of every VTEP address in the overlay.
pub const VTEP_NETWORK_PREFIX: u8 = 240;

/// All-zero destination MAC selects head-end replication on the VXLAN device.
const ZERO_MAC: [u8; 6] = [0; 6];

/// Desired shape of the overlay device. The gateway runs without a remote
/// group (it learns peers through explicit FDB entries); workers point the
/// device at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VxlanSpec {
    pub group: Option<Ipv4Addr>,
    pub local: Option<Ipv4Addr>,
}

impl VxlanSpec {
    pub fn gateway() -> Self {
        Self {
            group: None,
            local: None,
        }
    }

    pub fn worker(gateway_node_ip: Ipv4Addr, local_vtep: Ipv4Addr) -> Self {
        Self {
            group: Some(gateway_node_ip),
            local: Some(local_vtep),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VxlanLink {
    pub index: u32,
}

/// The VTEP address of a node is its primary IPv4 address with the first
/// octet replaced by the overlay prefix, which keeps peer VTEPs derivable
/// without an allocator.
pub fn vtep_address(node_ip: Ipv4Addr) -> Ipv4Addr {
    let [_, b, c, d] = node_ip.octets();
    Ipv4Addr::new(VTEP_NETWORK_PREFIX, b, c, d)
}

impl Netlink {
    /// Creates `vxlan100` with the requested attributes if absent, and brings
    /// it up. An existing device is reused.
    pub async fn ensure_vxlan(&self, spec: &VxlanSpec) -> Result<VxlanLink> {
        let mut info = vec![InfoVxlan::Id(VXLAN_VNI), InfoVxlan::Port(VXLAN_PORT)];
        if let Some(group) = spec.group {
            info.push(InfoVxlan::Group(group));
        }
        if let Some(local) = spec.local {
            info.push(InfoVxlan::Local(local));
        }

        let message = LinkMessageBuilder::<LinkVxlan>::new_with_info_kind(InfoKind::Vxlan)
            .name(VXLAN_IFACE.to_string())
            .mtu(VXLAN_MTU)
            .set_info_data(InfoData::Vxlan(info))
            .build();

        match self.handle().link().add(message).execute().await {
            Ok(()) => {}
            Err(e) if Error::is_already_exists(&e) => {
                debug!("link {} already exists", VXLAN_IFACE);
            }
            Err(e) => return Err(e.into()),
        }

        let index = self.link_index(VXLAN_IFACE).await?;
        self.handle()
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await?;

        Ok(VxlanLink { index })
    }

    pub async fn destroy_vxlan(&self) -> Result<()> {
        let index = match self.link_index(VXLAN_IFACE).await {
            Ok(index) => index,
            Err(Error::LinkNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        match self.handle().link().del(index).execute().await {
            Ok(()) => Ok(()),
            Err(e) if Error::is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_address(&self, link: VxlanLink, ip: Ipv4Addr, prefix: u8) -> Result<()> {
        match self
            .handle()
            .address()
            .add(link.index, IpAddr::V4(ip), prefix)
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Error::is_already_exists(&e) => {
                debug!("address {}/{} already assigned", ip, prefix);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Installs a head-end replication FDB entry for a peer VTEP.
    pub async fn add_fdb(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
        let mut request = self
            .handle()
            .neighbours()
            .add(link.index, IpAddr::V4(vtep))
            .replace();

        let message = request.message_mut();
        message.header.family = AddressFamily::Bridge;
        message.header.state = NeighbourState::Permanent;
        message.header.flags = NeighbourFlags::Own;
        message
            .attributes
            .push(NeighbourAttribute::LinkLocalAddress(ZERO_MAC.to_vec()));

        request.execute().await?;
        Ok(())
    }

    pub async fn del_fdb(&self, link: VxlanLink, vtep: Ipv4Addr) -> Result<()> {
        let mut message = NeighbourMessage::default();
        message.header.family = AddressFamily::Bridge;
        message.header.ifindex = link.index;
        message.header.state = NeighbourState::Permanent;
        message.header.flags = NeighbourFlags::Own;
        message
            .attributes
            .push(NeighbourAttribute::Destination(NeighbourAddress::Inet(
                vtep,
            )));
        message
            .attributes
            .push(NeighbourAttribute::LinkLocalAddress(ZERO_MAC.to_vec()));

        match self.handle().neighbours().del(message).execute().await {
            Ok(()) => Ok(()),
            Err(e) if Error::is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
