//! Local address resolution.
//!
//! The exporter labels traffic from this host's point of view, so it needs
//! to know which address the network stack would pick for outbound traffic.
//! The probe is an explicit capability so tests can substitute a fixed
//! address without touching the network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::{FleetmapError, Result};

/// Resolves the address this host uses to reach the rest of the fleet.
pub trait LocalAddrResolver: Send + Sync {
    fn local_addr(&self) -> Result<IpAddr>;
}

/// Resolves the default outbound address by connecting a UDP socket toward
/// a well-known external destination. Connecting a datagram socket only
/// selects a route; no packet is sent.
pub struct DefaultRouteResolver {
    probe_target: SocketAddr,
}

impl DefaultRouteResolver {
    pub fn new() -> Self {
        Self {
            probe_target: SocketAddr::from((Ipv4Addr::new(8, 8, 8, 8), 80)),
        }
    }

    pub fn with_probe_target(probe_target: SocketAddr) -> Self {
        Self { probe_target }
    }
}

impl Default for DefaultRouteResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAddrResolver for DefaultRouteResolver {
    fn local_addr(&self) -> Result<IpAddr> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|e| FleetmapError::LocalAddr(e.to_string()))?;
        socket
            .connect(self.probe_target)
            .map_err(|e| FleetmapError::LocalAddr(e.to_string()))?;
        let addr = socket
            .local_addr()
            .map_err(|e| FleetmapError::LocalAddr(e.to_string()))?;

        Ok(addr.ip())
    }
}

/// Always returns a fixed address. Used when the operator pins the local
/// address in configuration, and in tests.
pub struct FixedAddrResolver {
    addr: IpAddr,
}

impl FixedAddrResolver {
    pub fn new(addr: IpAddr) -> Self {
        Self { addr }
    }
}

impl LocalAddrResolver for FixedAddrResolver {
    fn local_addr(&self) -> Result<IpAddr> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_resolver() {
        let resolver = FixedAddrResolver::new("10.0.0.1".parse().unwrap());
        assert_eq!(
            resolver.local_addr().unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
    }
}
