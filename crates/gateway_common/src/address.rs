//! Address predicates used when validating provisioning data.

use std::net::Ipv6Addr;

/// Dotted-quad IPv4 address, four decimal octets 0-255, no leading zeros.
pub fn is_valid_ipv4_address(address: &str) -> bool {
    let octets: Vec<&str> = address.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| is_valid_ipv4_octet(o))
}

fn is_valid_ipv4_octet(octet: &str) -> bool {
    if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if octet.len() > 1 && octet.starts_with('0') {
        return false;
    }
    octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
}

/// IPv6 address in full, compressed or mixed (`::ffff:192.0.2.1`) notation.
pub fn is_valid_ipv6_address(address: &str) -> bool {
    if address.contains('.') {
        // Mixed notation: the embedded IPv4 part follows the stricter rules above
        let Some(idx) = address.rfind(':') else {
            return false;
        };
        if !is_valid_ipv4_address(&address[idx + 1..]) {
            return false;
        }
    }
    address.parse::<Ipv6Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_addresses() {
        assert!(is_valid_ipv4_address("192.168.0.1"));
        assert!(is_valid_ipv4_address("0.0.0.0"));
        assert!(is_valid_ipv4_address("255.255.255.255"));

        assert!(!is_valid_ipv4_address("256.1.1.1"));
        assert!(!is_valid_ipv4_address("192.168.01.1"));
        assert!(!is_valid_ipv4_address("192.168.1"));
        assert!(!is_valid_ipv4_address("192.168.1.1.1"));
        assert!(!is_valid_ipv4_address("a.b.c.d"));
        assert!(!is_valid_ipv4_address(""));
        assert!(!is_valid_ipv4_address(" 10.0.0.1"));
    }

    #[test]
    fn test_ipv6_addresses() {
        assert!(is_valid_ipv6_address("2001:db8::1"));
        assert!(is_valid_ipv6_address("2001:0db8:0000:0000:0000:ff00:0042:8329"));
        assert!(is_valid_ipv6_address("::1"));
        assert!(is_valid_ipv6_address("::ffff:192.0.2.128"));

        assert!(!is_valid_ipv6_address("2001:db8::1::2"));
        assert!(!is_valid_ipv6_address("::ffff:192.0.2.256"));
        assert!(!is_valid_ipv6_address("12345::1"));
        assert!(!is_valid_ipv6_address("fe80::1%eth0"));
        assert!(!is_valid_ipv6_address(""));
    }
}
