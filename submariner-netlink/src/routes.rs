use std::net::Ipv4Addr;

use futures::TryStreamExt;
use ipnet::Ipv4Net;
use rtnetlink::RouteMessageBuilder;
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope,
};

use crate::{Error, Netlink, Result, VxlanLink};

/// An IPv4 route on the overlay device. The raw message is retained so a
/// listed route can be deleted without reconstructing it.
pub struct OverlayRoute {
    pub destination: Ipv4Net,
    pub gateway: Ipv4Addr,
    message: RouteMessage,
}

impl Netlink {
    /// All IPv4 routes on the given link that carry both a destination and a
    /// gateway.
    pub async fn list_routes(&self, link: VxlanLink) -> Result<Vec<OverlayRoute>> {
        let filter = RouteMessageBuilder::<Ipv4Addr>::new().build();
        let mut stream = self.handle().route().get(filter).execute();

        let mut routes = Vec::new();
        while let Some(message) = stream.try_next().await? {
            let mut destination = None;
            let mut gateway = None;
            let mut oif = None;
            for attr in &message.attributes {
                match attr {
                    RouteAttribute::Destination(RouteAddress::Inet(ip)) => {
                        destination = Ipv4Net::new(*ip, message.header.destination_prefix_length).ok();
                    }
                    RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gateway = Some(*ip),
                    RouteAttribute::Oif(index) => oif = Some(*index),
                    _ => {}
                }
            }

            if oif != Some(link.index) {
                continue;
            }
            if let (Some(destination), Some(gateway)) = (destination, gateway) {
                routes.push(OverlayRoute {
                    destination,
                    gateway,
                    message,
                });
            }
        }

        Ok(routes)
    }

    pub async fn add_route(
        &self,
        link: VxlanLink,
        destination: Ipv4Net,
        gateway: Ipv4Addr,
    ) -> Result<()> {
        let message = RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(destination.addr(), destination.prefix_len())
            .gateway(gateway)
            .output_interface(link.index)
            .protocol(RouteProtocol::Static)
            .scope(RouteScope::Universe)
            .build();

        match self.handle().route().add(message).execute().await {
            Ok(()) => Ok(()),
            Err(e) if Error::is_already_exists(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn del_route(&self, route: OverlayRoute) -> Result<()> {
        match self.handle().route().del(route.message).execute().await {
            Ok(()) => Ok(()),
            Err(e) if Error::is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
