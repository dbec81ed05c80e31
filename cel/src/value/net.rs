//! IP address and CIDR values (§3.1, §4.10 network extension).
//!
//! Neither the teacher crate nor its siblings carry a network value type;
//! `ipnet` is the standard crate for typed IPv4/IPv6 network values and is
//! added for this purpose (see SPEC_FULL.md §2).

use ipnet::IpNet;
use std::net::IpAddr;
use std::rc::Rc;

/// An IP address plus a cached canonical string form, per §3.1 ("4 or 16 raw
/// octets plus canonical string cache").
#[derive(Clone, Debug)]
pub struct IpValue {
    addr: IpAddr,
    canonical: Rc<str>,
}

impl IpValue {
    pub fn parse(s: &str) -> Option<IpValue> {
        if s.contains('%') {
            // Zone identifiers are rejected (§4.10).
            return None;
        }
        let addr: IpAddr = s.parse().ok()?;
        if is_rejected_v4_mapped_textual(&addr, s) {
            return None;
        }
        Some(IpValue::from_addr(addr))
    }

    pub fn from_addr(addr: IpAddr) -> IpValue {
        let canonical = Rc::from(addr.to_string().as_str());
        IpValue { addr, canonical }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn family(&self) -> u8 {
        match self.addr {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.addr.is_unspecified()
    }

    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }

    pub fn is_canonical(&self, input: &str) -> bool {
        input == self.canonical.as_ref()
    }

    pub fn is_global_unicast(&self) -> bool {
        !self.addr.is_unspecified()
            && !self.addr.is_loopback()
            && !self.addr.is_multicast()
            && !self.is_link_local_unicast()
    }

    pub fn is_link_local_unicast(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }

    pub fn is_link_local_multicast(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4.is_multicast() && v4.octets()[0..3] == [224, 0, 0],
            IpAddr::V6(v6) => v6.is_multicast() && (v6.segments()[0] & 0x000f) == 0x0002,
        }
    }

    /// Equal under §4.2: "by family then bytes, with IPv4-mapped IPv6 equal
    /// to the corresponding IPv4".
    pub fn cel_eq(&self, other: &IpValue) -> bool {
        self.to_v4_mapped() == other.to_v4_mapped()
    }

    fn to_v4_mapped(&self) -> IpAddr {
        match self.addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(self.addr),
            v4 => v4,
        }
    }
}

/// An IPv6 textual form with an embedded IPv4 dotted-decimal tail (e.g.
/// `"::ffff:192.168.0.1"`, RFC 4291 §2.2) parses to a valid address but is
/// rejected by the string parsers (§3.1): plain IPv6 text never contains
/// `.`, so any `.` alongside a successful V6 parse means this form was used.
fn is_rejected_v4_mapped_textual(addr: &IpAddr, s: &str) -> bool {
    matches!(addr, IpAddr::V6(_)) && s.contains('.')
}

impl PartialEq for IpValue {
    fn eq(&self, other: &Self) -> bool {
        self.cel_eq(other)
    }
}

/// A CIDR network value: an IP plus a prefix length (§3.1).
#[derive(Clone, Debug, PartialEq)]
pub struct CidrValue {
    net: IpNet,
}

impl CidrValue {
    pub fn parse(s: &str) -> Option<CidrValue> {
        if s.contains('%') {
            return None;
        }
        let net: IpNet = s.parse().ok()?;
        if is_rejected_v4_mapped_textual(&net.addr(), s) {
            return None;
        }
        Some(CidrValue { net })
    }

    pub fn new(ip: IpAddr, prefix_len: u8) -> Option<CidrValue> {
        IpNet::new(ip, prefix_len).ok().map(|net| CidrValue { net })
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn network_ip(&self) -> IpAddr {
        self.net.network()
    }

    pub fn contains_ip(&self, ip: &IpValue) -> bool {
        self.net.contains(&ip.addr)
    }

    pub fn contains_cidr(&self, other: &CidrValue) -> bool {
        self.net.contains(&other.net)
    }

    pub fn masked(&self) -> CidrValue {
        CidrValue { net: self.net.trunc() }
    }

    pub fn to_string_canonical(&self) -> String {
        self.net.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_mapped_v6_equals_v4() {
        // The dotted-decimal textual form is rejected by the parser, but the
        // address itself (however constructed) still compares equal by bytes.
        let a = IpValue::parse("192.168.0.1").unwrap();
        let b = IpValue::from_addr(std::net::Ipv4Addr::new(192, 168, 0, 1).to_ipv6_mapped().into());
        assert!(a.cel_eq(&b));
    }

    #[test]
    fn v4_mapped_v6_dotted_decimal_is_rejected() {
        assert!(IpValue::parse("::ffff:192.168.0.1").is_none());
    }

    #[test]
    fn zone_identifiers_are_rejected() {
        assert!(IpValue::parse("fe80::1%eth0").is_none());
    }

    #[test]
    fn cidr_contains_ip() {
        let cidr = CidrValue::parse("192.168.0.0/24").unwrap();
        assert!(cidr.contains_ip(&IpValue::parse("192.168.0.42").unwrap()));
        assert!(!cidr.contains_ip(&IpValue::parse("192.168.1.1").unwrap()));
    }
}
