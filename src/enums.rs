use packed_struct::prelude::*;
use std::fmt::Display;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Agent {
    Backend,
    DialogStore,
    UdpServer { port: u16 },
}

#[derive(Clone, Debug)]
pub enum AgentState {
    Started { agent: Agent },
    Stopped { agent: Agent },
}

#[derive(Debug, PartialEq, Eq)]
pub enum SystemState {
    Server,
    ConfigCheck,
    ShuttingDown,
}

#[derive(Debug, Eq, PartialEq, PrimitiveEnum_u8, Copy, Clone)]
/// RADIUS packet codes, RFC 2865 §3 and RFC 2866 §3.
pub enum PacketCode {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    /// RFC 5176 Disconnect-Request, keying-only in this server.
    DisconnectRequest = 40,
    /// RFC 5176 CoA-Request, keying-only in this server.
    CoARequest = 43,
    AccessChallenge = 11,
    /// Anything this server doesn't otherwise recognise.
    Reserved = 0,
}

impl From<u8> for PacketCode {
    fn from(input: u8) -> Self {
        match input {
            1 => Self::AccessRequest,
            2 => Self::AccessAccept,
            3 => Self::AccessReject,
            4 => Self::AccountingRequest,
            5 => Self::AccountingResponse,
            11 => Self::AccessChallenge,
            40 => Self::DisconnectRequest,
            43 => Self::CoARequest,
            _ => Self::Reserved,
        }
    }
}

impl From<PacketCode> for u8 {
    fn from(val: PacketCode) -> u8 {
        match val {
            PacketCode::AccessRequest => 1,
            PacketCode::AccessAccept => 2,
            PacketCode::AccessReject => 3,
            PacketCode::AccountingRequest => 4,
            PacketCode::AccountingResponse => 5,
            PacketCode::AccessChallenge => 11,
            PacketCode::DisconnectRequest => 40,
            PacketCode::CoARequest => 43,
            PacketCode::Reserved => 0,
        }
    }
}

impl Display for PacketCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketCode::AccessRequest => "Access-Request",
            PacketCode::AccessAccept => "Access-Accept",
            PacketCode::AccessReject => "Access-Reject",
            PacketCode::AccountingRequest => "Accounting-Request",
            PacketCode::AccountingResponse => "Accounting-Response",
            PacketCode::AccessChallenge => "Access-Challenge",
            PacketCode::DisconnectRequest => "Disconnect-Request",
            PacketCode::CoARequest => "CoA-Request",
            PacketCode::Reserved => "Reserved",
        };
        f.write_str(name)
    }
}

/// Which reply table a packet's code selects from (auth vs acct), used by
/// both the match engine and the dialog store's key-selection table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyCategory {
    Auth,
    Acct,
}

impl Display for ReplyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyCategory::Auth => f.write_str("auth"),
            ReplyCategory::Acct => f.write_str("acct"),
        }
    }
}

/// RADIUS attribute value shapes, matching the subset the reference codec
/// packs/unpacks. `Octets` is free-form binary, always hex-encoded on
/// persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    Integer(u32),
    IpAddr(std::net::Ipv4Addr),
    Octets(Vec<u8>),
}

impl AttributeValue {
    pub fn as_display_string(&self) -> String {
        match self {
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::IpAddr(a) => a.to_string(),
            AttributeValue::Octets(b) => hex::encode(b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}
