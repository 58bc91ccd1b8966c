//! The Decoder/Encoder contract between UDP bytes and the backend, plus a
//! reference implementation good enough to drive every other module.
//!
//! This is explicitly not a full RFC 2865 attribute dictionary — see the
//! crate-level design notes for why, and how to swap it for a richer one.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use indexmap::IndexMap;
use md5::{Digest, Md5};
use packed_struct::prelude::*;

use crate::enums::AttributeValue;
use crate::error::RadGuardError;

/// Duck-typed read access to a packet's code/id/attributes. Implemented by
/// whatever a [`Decoder`] returns, and by the backend's synthesized
/// reply-view used for dialog persistence.
pub trait PacketView: std::fmt::Debug {
    fn code(&self) -> u8;
    fn id(&self) -> u8;
    fn attribute_names(&self) -> Vec<&str>;
    fn get(&self, name: &str) -> Option<&[AttributeValue]>;
}

/// A decoded inbound packet.
#[derive(Debug, Clone)]
pub struct Request {
    pub code: u8,
    pub id: u8,
    pub authenticator: [u8; 16],
    pub attributes: IndexMap<String, Vec<AttributeValue>>,
}

impl PacketView for Request {
    fn code(&self) -> u8 {
        self.code
    }
    fn id(&self) -> u8 {
        self.id
    }
    fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(|s| s.as_str()).collect()
    }
    fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.attributes.get(name).map(|v| v.as_slice())
    }
}

/// A simple owned [`PacketView`], used by the backend to build a
/// persistence-only view of the reply it just produced, and by tests.
#[derive(Debug, Clone)]
pub struct StaticPacketView {
    code: u8,
    id: u8,
    attributes: IndexMap<String, Vec<AttributeValue>>,
}

impl StaticPacketView {
    pub fn new(code: u8, id: u8, attributes: IndexMap<String, Vec<AttributeValue>>) -> Self {
        StaticPacketView {
            code,
            id,
            attributes,
        }
    }
}

impl PacketView for StaticPacketView {
    fn code(&self) -> u8 {
        self.code
    }
    fn id(&self) -> u8 {
        self.id
    }
    fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(|s| s.as_str()).collect()
    }
    fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.attributes.get(name).map(|v| v.as_slice())
    }
}

pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Request, RadGuardError>;
}

pub trait Encoder: Send + Sync {
    fn encode(
        &self,
        reply_code: u8,
        reply_attributes: &IndexMap<String, AttributeValue>,
        request: &Request,
    ) -> Result<Vec<u8>, RadGuardError>;
}

/// The fixed 20-byte RADIUS header, RFC 2865 §3.
#[derive(Debug, PackedStruct, Clone)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "20")]
struct RadiusHeader {
    #[packed_field(bits = "0..=7")]
    code: u8,
    #[packed_field(bits = "8..=15")]
    identifier: u8,
    #[packed_field(bits = "16..=31", endian = "msb")]
    length: u16,
    #[packed_field(bits = "32..=159")]
    authenticator: [u8; 16],
}

fn attr_name_table() -> &'static HashMap<&'static str, u8> {
    static TABLE: std::sync::OnceLock<HashMap<&'static str, u8>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("User-Name", 1u8);
        m.insert("User-Password", 2);
        m.insert("NAS-IP-Address", 4);
        m.insert("NAS-Port", 5);
        m.insert("Service-Type", 6);
        m.insert("Framed-IP-Address", 8);
        m.insert("Filter-Id", 11);
        m.insert("Reply-Message", 18);
        m.insert("State", 24);
        m.insert("Class", 25);
        m.insert("Session-Timeout", 27);
        m.insert("Called-Station-Id", 30);
        m.insert("Calling-Station-Id", 31);
        m.insert("Acct-Status-Type", 40);
        m.insert("Acct-Session-Id", 44);
        m.insert("Framed-IPv6-Prefix", 97);
        m.insert("Delegated-IPv6-Prefix", 123);
        m
    })
}

fn attr_code_table() -> &'static HashMap<u8, &'static str> {
    static TABLE: std::sync::OnceLock<HashMap<u8, &'static str>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| attr_name_table().iter().map(|(&k, &v)| (v, k)).collect())
}

/// Attribute codes whose value is conventionally a 4-byte IPv4 address.
const IPADDR_CODES: [u8; 2] = [4, 8];
/// Attribute codes whose value is conventionally a 4-byte integer.
const INTEGER_CODES: [u8; 2] = [6, 27];

/// The reference [`Decoder`]/[`Encoder`] implementation. Packs attributes as
/// flat type-length-value records after the fixed header, and derives the
/// reply authenticator as `MD5(code||id||length||request_authenticator||attrs||secret)`.
pub struct WireCodec {
    shared_secret: Vec<u8>,
}

impl WireCodec {
    pub fn new(shared_secret: impl Into<Vec<u8>>) -> Self {
        WireCodec {
            shared_secret: shared_secret.into(),
        }
    }

    fn encode_attribute(name: &str, value: &AttributeValue) -> Vec<u8> {
        let code = *attr_name_table().get(name).unwrap_or(&0);
        let value_bytes: Vec<u8> = match value {
            AttributeValue::Text(s) => s.as_bytes().to_vec(),
            AttributeValue::Integer(i) => i.to_be_bytes().to_vec(),
            AttributeValue::IpAddr(a) => a.octets().to_vec(),
            AttributeValue::Octets(b) => b.clone(),
        };
        let mut out = Vec::with_capacity(2 + value_bytes.len());
        out.push(code);
        out.push((2 + value_bytes.len()) as u8);
        out.extend(value_bytes);
        out
    }

    fn decode_attribute(code: u8, bytes: &[u8]) -> (String, AttributeValue) {
        let name = attr_code_table()
            .get(&code)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("Attr-{code}"));
        let value = if IPADDR_CODES.contains(&code) && bytes.len() == 4 {
            AttributeValue::IpAddr(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
        } else if INTEGER_CODES.contains(&code) && bytes.len() == 4 {
            AttributeValue::Integer(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        } else {
            match std::str::from_utf8(bytes) {
                Ok(s) => AttributeValue::Text(s.to_string()),
                Err(_) => AttributeValue::Octets(bytes.to_vec()),
            }
        };
        (name, value)
    }
}

impl Decoder for WireCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Request, RadGuardError> {
        if bytes.len() < 20 {
            return Err(RadGuardError::DecodeError(format!(
                "packet too short: {} bytes, need at least 20",
                bytes.len()
            )));
        }
        let mut header_bytes = [0u8; 20];
        header_bytes.copy_from_slice(&bytes[0..20]);
        let header = RadiusHeader::unpack(&header_bytes)?;

        if (header.length as usize) > bytes.len() {
            return Err(RadGuardError::DecodeError(format!(
                "header length {} exceeds packet size {}",
                header.length,
                bytes.len()
            )));
        }

        let mut attributes: IndexMap<String, Vec<AttributeValue>> = IndexMap::new();
        let mut cursor = 20usize;
        let end = header.length as usize;
        while cursor + 2 <= end {
            let attr_type = bytes[cursor];
            let attr_len = bytes[cursor + 1] as usize;
            if attr_len < 2 || cursor + attr_len > end {
                return Err(RadGuardError::DecodeError(format!(
                    "malformed attribute at offset {cursor}"
                )));
            }
            let value_bytes = &bytes[cursor + 2..cursor + attr_len];
            let (name, value) = Self::decode_attribute(attr_type, value_bytes);
            attributes.entry(name).or_default().push(value);
            cursor += attr_len;
        }

        Ok(Request {
            code: header.code,
            id: header.identifier,
            authenticator: header.authenticator,
            attributes,
        })
    }
}

impl Encoder for WireCodec {
    fn encode(
        &self,
        reply_code: u8,
        reply_attributes: &IndexMap<String, AttributeValue>,
        request: &Request,
    ) -> Result<Vec<u8>, RadGuardError> {
        let mut attr_bytes = Vec::new();
        for (name, value) in reply_attributes {
            attr_bytes.extend(Self::encode_attribute(name, value));
        }

        let total_len = (20 + attr_bytes.len()) as u16;

        let mut hasher = Md5::new();
        hasher.update([reply_code]);
        hasher.update([request.id]);
        hasher.update(total_len.to_be_bytes());
        hasher.update(request.authenticator);
        hasher.update(&attr_bytes);
        hasher.update(&self.shared_secret);
        let response_authenticator: [u8; 16] = hasher.finalize().into();

        let header = RadiusHeader {
            code: reply_code,
            identifier: request.id,
            length: total_len,
            authenticator: response_authenticator,
        };
        let header_bytes = header.pack()?;

        let mut out = Vec::with_capacity(total_len as usize);
        out.extend(header_bytes);
        out.extend(attr_bytes);
        Ok(out)
    }
}
