//! Socket address parsing, ported from the teacher's `shared/netutils.rs`.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use anyhow::Result;

pub fn parse_addr(address: &Option<String>, port: u16) -> Result<SocketAddr> {
    let addr = match address {
        | Some(addr) => IpAddr::from_str(addr)?,
        | None => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };

    Ok(SocketAddr::from((addr, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unspecified_v6() {
        let addr = parse_addr(&None, 8080).unwrap();
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.ip(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
    }

    #[test]
    fn parses_explicit_address() {
        let addr = parse_addr(&Some("127.0.0.1".to_string()), 9090).unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
    }
}
