//! Outbound OSC endpoint
//!
//! The bridge only needs "send this address with these arguments" from its
//! destination. [`UdpEndpoint`] implements that over UDP for liblo-style
//! URLs such as `osc.udp://localhost:9951/`.

use parking_lot::Mutex;
use rosc::{OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, info, trace, warn};

use crate::error::EndpointError;

/// Destination for translated control messages.
pub trait OscEndpoint: Send + Sync {
    /// URL the endpoint was resolved from
    fn url(&self) -> &str;

    fn send(&self, addr: &str, args: Vec<OscType>) -> Result<(), EndpointError>;
}

/// Parsed OSC destination URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscUrl {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl OscUrl {
    /// Parse `osc.udp://host:port/`, `osc://host:port`, `host:port` or a bare port.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let invalid = || EndpointError::InvalidUrl(url.to_string());
        let url = url.trim();

        let (protocol, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                let protocol = match scheme {
                    "osc" => "udp",
                    s => s.strip_prefix("osc.").ok_or_else(invalid)?,
                };
                (protocol.to_string(), rest)
            }
            None => ("udp".to_string(), url),
        };

        // Path component is not part of the destination
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid());
        }

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, port) = v6.split_once("]:").ok_or_else(invalid)?;
            (host.to_string(), port)
        } else if let Some((host, port)) = authority.rsplit_once(':') {
            let host = if host.is_empty() { "localhost" } else { host };
            (host.to_string(), port)
        } else if authority.chars().all(|c| c.is_ascii_digit()) {
            ("localhost".to_string(), authority)
        } else {
            return Err(invalid());
        };

        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            protocol,
            host,
            port,
        })
    }
}

/// Resolved destination and the socket used to reach it
struct Route {
    target: SocketAddr,
    socket: UdpSocket,
}

/// OSC over UDP
///
/// The destination host is resolved when the endpoint is built. If that
/// fails, every send retries until the host becomes reachable.
pub struct UdpEndpoint {
    url: String,
    dest: OscUrl,
    route: Mutex<Option<Route>>,
}

impl UdpEndpoint {
    /// Parse a destination URL and try to resolve it.
    ///
    /// Only a malformed URL or a non-UDP protocol is an error; an
    /// unresolvable host is reported and retried on send.
    pub fn resolve(url: &str) -> Result<Self, EndpointError> {
        let dest = OscUrl::parse(url)?;
        if dest.protocol != "udp" {
            return Err(EndpointError::UnsupportedProtocol(dest.protocol));
        }

        let route = match connect(&dest) {
            Ok(route) => {
                debug!("OSC destination {} resolved to {}", url, route.target);
                Some(route)
            }
            Err(e) => {
                warn!("{}, will retry on send", e);
                None
            }
        };

        Ok(Self {
            url: url.to_string(),
            dest,
            route: Mutex::new(route),
        })
    }

    /// Resolved destination address, if resolution has succeeded yet
    pub fn target(&self) -> Option<SocketAddr> {
        self.route.lock().as_ref().map(|r| r.target)
    }
}

fn connect(dest: &OscUrl) -> Result<Route, EndpointError> {
    let resolve_err = |source| EndpointError::Resolve {
        host: dest.host.clone(),
        port: dest.port,
        source,
    };

    let target = (dest.host.as_str(), dest.port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses",
            ))
        })?;

    let bind_addr = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind_addr).map_err(resolve_err)?;
    Ok(Route { target, socket })
}

impl OscEndpoint for UdpEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    fn send(&self, addr: &str, args: Vec<OscType>) -> Result<(), EndpointError> {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let buf = rosc::encoder::encode(&packet)?;

        let mut guard = self.route.lock();
        let route = match guard.take() {
            Some(route) => route,
            None => {
                let route = connect(&self.dest)?;
                info!("OSC destination {} resolved to {}", self.url, route.target);
                route
            }
        };
        let route = guard.insert(route);

        trace!("OSC -> {} {}", route.target, addr);
        route
            .socket
            .send_to(&buf, route.target)
            .map_err(|source| EndpointError::Send {
                addr: addr.to_string(),
                source,
            })?;
        Ok(())
    }
}
