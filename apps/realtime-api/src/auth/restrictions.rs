//! Network restrictions attached to app tokens.

use std::net::IpAddr;

/// Where an app token may be used from. Empty lists mean "anywhere".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restrictions {
    pub netmasks: Vec<Netmask>,
    pub origins: Vec<String>,
    /// A stored netmask could not be parsed. The token is then refused everywhere.
    pub unparseable: bool,
}

impl Restrictions {
    /// Build from the stored string lists. A malformed netmask marks the whole set as
    /// unparseable, so the token is refused rather than widened to "anywhere".
    pub fn parse<S: AsRef<str>>(netmasks: &[S], origins: &[S]) -> Self {
        let mut unparseable = false;
        let netmasks = netmasks
            .iter()
            .filter_map(|raw| {
                let raw = raw.as_ref();
                let parsed = Netmask::parse(raw);
                if parsed.is_none() {
                    tracing::warn!(netmask = %raw, "malformed token netmask, refusing token");
                    unparseable = true;
                }
                parsed
            })
            .collect();
        Self {
            netmasks,
            origins: origins.iter().map(|o| o.as_ref().to_string()).collect(),
            unparseable,
        }
    }

    /// Whether a connection from `addr` with the given `Origin` header may use the token.
    pub fn permits(&self, addr: Option<IpAddr>, origin: Option<&str>) -> bool {
        if self.unparseable {
            return false;
        }
        let addr_ok = self.netmasks.is_empty()
            || addr.is_some_and(|addr| self.netmasks.iter().any(|mask| mask.contains(addr)));
        let origin_ok = self.origins.is_empty()
            || origin.is_some_and(|origin| self.origins.iter().any(|o| o == origin));
        addr_ok && origin_ok
    }
}

/// A CIDR block such as `10.0.0.0/8` or `2001:db8::/32`. A bare address is a /32 or /128.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Netmask {
    network: IpAddr,
    prefix: u8,
}

impl Netmask {
    pub fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
            None => (raw.trim(), None),
        };
        let network: IpAddr = addr.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { network, prefix })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        // IPv4 clients reaching a dual-stack listener show up as mapped IPv6.
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
            v4 => v4,
        };
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                prefix_match(u32::from(net) as u128, u32::from(addr) as u128, self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                prefix_match(u128::from(net), u128::from(addr), self.prefix, 128)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: u128, addr: u128, prefix: u8, width: u32) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = width - prefix as u32;
    (net >> shift) == (addr >> shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn netmask_matches_v4_block() {
        let mask = Netmask::parse("10.1.0.0/16").unwrap();
        assert!(mask.contains(ip("10.1.200.3")));
        assert!(!mask.contains(ip("10.2.0.1")));
    }

    #[test]
    fn bare_address_is_host_route() {
        let mask = Netmask::parse("192.168.1.7").unwrap();
        assert!(mask.contains(ip("192.168.1.7")));
        assert!(!mask.contains(ip("192.168.1.8")));
    }

    #[test]
    fn mapped_v4_address_matches_v4_mask() {
        let mask = Netmask::parse("127.0.0.0/8").unwrap();
        assert!(mask.contains(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn v6_block() {
        let mask = Netmask::parse("2001:db8::/32").unwrap();
        assert!(mask.contains(ip("2001:db8:1::1")));
        assert!(!mask.contains(ip("2001:db9::1")));
    }

    #[test]
    fn rejects_malformed_masks() {
        assert!(Netmask::parse("10.0.0.0/33").is_none());
        assert!(Netmask::parse("not-an-ip").is_none());
    }

    #[test]
    fn malformed_netmask_refuses_every_address() {
        let r = Restrictions::parse(&["10.0.0.0/33"], &[]);
        assert!(r.netmasks.is_empty());
        assert!(!r.permits(Some(ip("203.0.113.9")), None));
        assert!(!r.permits(Some(ip("10.0.0.1")), None));
        assert!(!r.permits(None, None));

        // One good mask does not rescue a list with a bad one.
        let r = Restrictions::parse(&["10.0.0.0/8", "not-an-ip"], &[]);
        assert!(!r.permits(Some(ip("10.1.1.1")), None));
    }

    #[test]
    fn empty_restrictions_permit_everything() {
        assert!(Restrictions::default().permits(None, None));
    }

    #[test]
    fn netmask_restriction_requires_known_address() {
        let r = Restrictions::parse(&["10.0.0.0/8"], &[]);
        assert!(r.permits(Some(ip("10.9.9.9")), None));
        assert!(!r.permits(Some(ip("11.0.0.1")), None));
        assert!(!r.permits(None, None));
    }

    #[test]
    fn origin_restriction() {
        let r = Restrictions::parse::<&str>(&[], &["https://client.example"]);
        assert!(r.permits(None, Some("https://client.example")));
        assert!(!r.permits(None, Some("https://evil.example")));
        assert!(!r.permits(None, None));
    }
}
