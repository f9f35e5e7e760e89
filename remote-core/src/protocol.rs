//! SOCKS5-like request/reply plaintext layout. This module only deals with
//! plaintext byte layout; framing and encryption happen in `frame`/`cipher`.

use byteorder::{BigEndian, ByteOrder};

pub const NONCE_SIZE: usize = 8;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const RSP_SUCCEEDED: u8 = 0x00;

const HEADER_SIZE: usize = 4; // ver, cmd, rsv, atyp
const PORT_SIZE: usize = 2;
const IPV4_ADDR_SIZE: usize = 4;

/// The destination address as carried on the wire, still in its original
/// encoding — IPv4 and port are kept as raw bytes (not parsed into
/// `std::net::Ipv4Addr`) so the reply can echo them back byte-for-byte, and
/// the connector receives the address in whichever form (dotted-quad string
/// or DNS name) it needs for `connect_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    V4([u8; 4]),
    Domain(Vec<u8>),
}

impl Address {
    /// Renders the address as the host string the connector expects:
    /// a dotted-quad for IPv4, the ASCII domain name unchanged for domains.
    pub fn host_string(&self) -> String {
        match self {
            Address::V4(octets) => format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
            Address::Domain(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub ver: u8,
    pub cmd: u8,
    pub rsv: u8,
    pub address: Address,
    pub port: u16,
}

#[derive(Debug)]
pub enum ParseError {
    /// Decrypted plaintext was too short to contain a full request.
    Truncated,
    /// `atyp` named IPv6, which this endpoint does not support (non-goal).
    UnsupportedIpv6,
    /// `atyp` was not one of the known values.
    UnknownAddressType(u8),
}

/// Parses a decrypted request plaintext. `plain` must already have the
/// leading random nonce stripped (see `split_nonce`).
pub fn parse_request(plain: &[u8]) -> Result<Request, ParseError> {
    if plain.len() < HEADER_SIZE {
        return Err(ParseError::Truncated);
    }

    let ver = plain[0];
    let cmd = plain[1];
    let rsv = plain[2];
    let atyp = plain[3];

    match atyp {
        ATYP_IPV4 => {
            if plain.len() < HEADER_SIZE + IPV4_ADDR_SIZE + PORT_SIZE {
                return Err(ParseError::Truncated);
            }

            let mut octets = [0u8; 4];
            octets.copy_from_slice(&plain[HEADER_SIZE..HEADER_SIZE + IPV4_ADDR_SIZE]);
            let port = BigEndian::read_u16(&plain[HEADER_SIZE + IPV4_ADDR_SIZE..HEADER_SIZE + IPV4_ADDR_SIZE + PORT_SIZE]);

            Ok(Request {
                ver,
                cmd,
                rsv,
                address: Address::V4(octets),
                port,
            })
        }
        ATYP_DOMAIN => {
            if plain.len() < HEADER_SIZE + 1 {
                return Err(ParseError::Truncated);
            }

            let domain_len = plain[HEADER_SIZE] as usize;
            let domain_start = HEADER_SIZE + 1;
            let domain_end = domain_start + domain_len;
            let port_end = domain_end + PORT_SIZE;

            if plain.len() < port_end {
                return Err(ParseError::Truncated);
            }

            let domain = plain[domain_start..domain_end].to_vec();
            let port = BigEndian::read_u16(&plain[domain_end..port_end]);

            Ok(Request {
                ver,
                cmd,
                rsv,
                address: Address::Domain(domain),
                port,
            })
        }
        ATYP_IPV6 => Err(ParseError::UnsupportedIpv6),
        other => Err(ParseError::UnknownAddressType(other)),
    }
}

/// Strips and returns the leading 8-byte random nonce, handing back the
/// remainder of the buffer. The nonce's value is never inspected; it exists
/// only to vary the plaintext across requests at the framing layer.
pub fn split_nonce(plain: &[u8]) -> Option<(&[u8], &[u8])> {
    if plain.len() < NONCE_SIZE {
        return None;
    }
    Some(plain.split_at(NONCE_SIZE))
}

/// Builds the plaintext reply for a successful CONNECT, mirroring the
/// request's `ver`, `rsv`, `atyp`, address bytes and port verbatim, with a
/// fresh random nonce and `cmd` forced to `SUCCEEDED`.
pub fn build_reply(request: &Request) -> Vec<u8> {
    let mut reply = vec![0u8; NONCE_SIZE];
    flux::rand::fill(&mut reply[..NONCE_SIZE]);

    reply.push(request.ver);
    reply.push(RSP_SUCCEEDED);
    reply.push(request.rsv);

    match &request.address {
        Address::V4(octets) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(octets);
        }
        Address::Domain(domain) => {
            reply.push(ATYP_DOMAIN);
            reply.push(domain.len() as u8);
            reply.extend_from_slice(domain);
        }
    }

    let mut port_bytes = [0u8; PORT_SIZE];
    BigEndian::write_u16(&mut port_bytes, request.port);
    reply.extend_from_slice(&port_bytes);

    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_request_plaintext() -> Vec<u8> {
        // nonce (8 bytes, arbitrary) ++ ver cmd rsv atyp ++ 93.184.216.34 ++ port 80
        let mut plain = vec![0u8; NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, ATYP_IPV4]);
        plain.extend_from_slice(&[93, 184, 216, 34]);
        plain.extend_from_slice(&[0x00, 0x50]);
        plain
    }

    fn domain_request_plaintext() -> Vec<u8> {
        let mut plain = vec![0u8; NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, ATYP_DOMAIN]);
        plain.push(11);
        plain.extend_from_slice(b"example.com");
        plain.extend_from_slice(&[0x01, 0xBB]);
        plain
    }

    #[test]
    fn parses_ipv4_connect_request() {
        let plain = ipv4_request_plaintext();
        let (_, body) = split_nonce(&plain).unwrap();
        let request = parse_request(body).unwrap();

        assert_eq!(request.address, Address::V4([93, 184, 216, 34]));
        assert_eq!(request.port, 80);
        assert_eq!(request.address.host_string(), "93.184.216.34");
    }

    #[test]
    fn parses_domain_connect_request() {
        let plain = domain_request_plaintext();
        let (_, body) = split_nonce(&plain).unwrap();
        let request = parse_request(body).unwrap();

        assert_eq!(request.address, Address::Domain(b"example.com".to_vec()));
        assert_eq!(request.port, 443);
        assert_eq!(request.address.host_string(), "example.com");
    }

    #[test]
    fn rejects_ipv6() {
        let mut plain = vec![0u8; NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, ATYP_IPV6]);
        plain.extend_from_slice(&[0u8; 18]);
        let (_, body) = split_nonce(&plain).unwrap();

        assert!(matches!(parse_request(body), Err(ParseError::UnsupportedIpv6)));
    }

    #[test]
    fn rejects_unknown_address_type() {
        let mut plain = vec![0u8; NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, 0x7F]);
        let (_, body) = split_nonce(&plain).unwrap();

        assert!(matches!(parse_request(body), Err(ParseError::UnknownAddressType(0x7F))));
    }

    #[test]
    fn reply_echoes_ipv4_request_fields() {
        let plain = ipv4_request_plaintext();
        let (_, body) = split_nonce(&plain).unwrap();
        let request = parse_request(body).unwrap();

        let reply_plain = build_reply(&request);
        let (_, reply_body) = split_nonce(&reply_plain).unwrap();

        // cmd is forced to SUCCEEDED; ver/rsv/atyp/address/port are echoed.
        assert_eq!(reply_body[0], request.ver);
        assert_eq!(reply_body[1], RSP_SUCCEEDED);
        assert_eq!(reply_body[2], request.rsv);
        assert_eq!(reply_body[3], ATYP_IPV4);
        assert_eq!(&reply_body[4..8], &[93, 184, 216, 34]);
        assert_eq!(BigEndian::read_u16(&reply_body[8..10]), 80);
    }

    #[test]
    fn reply_echoes_domain_request_fields() {
        let plain = domain_request_plaintext();
        let (_, body) = split_nonce(&plain).unwrap();
        let request = parse_request(body).unwrap();

        let reply_plain = build_reply(&request);
        let (_, reply_body) = split_nonce(&reply_plain).unwrap();
        let reparsed = parse_request(reply_body).unwrap();

        assert_eq!(reparsed.address, Address::Domain(b"example.com".to_vec()));
        assert_eq!(reparsed.port, 443);
        assert_eq!(reply_body[1], RSP_SUCCEEDED);
    }
}
