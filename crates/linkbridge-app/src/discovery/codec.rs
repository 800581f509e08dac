//! Discovery packet format
//!
//! ```text
//! [0..2]    magic fa 01
//! [18..20]  command, big-endian
//! [26..28]  payload length, big-endian
//! [28..]    payload
//! [28+len]  CRC-16 over everything before it
//! ```
//!
//! Requests carry the checksum high byte first, replies low byte first.

use std::net::Ipv4Addr;

use linkbridge_core::checksum::crc16_ccitt;
use linkbridge_core::MacAddr;

pub const MAGIC: [u8; 2] = [0xfa, 0x01];
pub const HEADER_LEN: usize = 28;

/// Payload lengths at or above this are rejected
pub const MAX_PAYLOAD_LEN: usize = 1000;

/// Locate modules on the LAN
pub const CMD_MODULE_DISCOVERY: u16 = 0xff01;
const CMD_DISCOVERY_REPLY: [u8; 2] = [0xff, 0x02];

pub const REPLY_LEN: usize = 42;
const REPLY_HEADER: [u8; 18] = [
    0xfa, 0x01, 0x34, 0x33, 0x21, 0x56, 0x23, 0xa5, 0x7b, 0x29, 0xc5, 0x5d, 0x3c, 0x32, 0x12, 0xfe,
    0x00, 0x00,
];
const REPLY_PAYLOAD_LEN: u8 = 12;
const REPLY_TRAILER: [u8; 2] = [0x02, 0x16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("packet of {0} bytes is too short")]
    TooShort(usize),

    #[error("bad magic")]
    BadMagic,

    #[error("payload length {0} out of range")]
    Length(usize),

    #[error("checksum {received:#06x} does not match {computed:#06x}")]
    Checksum { received: u16, computed: u16 },
}

/// A request that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub command: u16,
    pub payload: &'a [u8],
}

/// Validate a received datagram
pub fn decode(data: &[u8]) -> Result<Request<'_>, Rejected> {
    if data.len() <= MAGIC.len() {
        return Err(Rejected::TooShort(data.len()));
    }
    if data[..2] != MAGIC {
        return Err(Rejected::BadMagic);
    }
    if data.len() < HEADER_LEN {
        return Err(Rejected::TooShort(data.len()));
    }

    let len = usize::from(be_u16(&data[26..28]));
    if len >= MAX_PAYLOAD_LEN {
        return Err(Rejected::Length(len));
    }
    let end = HEADER_LEN + len;
    if data.len() < end + 2 {
        return Err(Rejected::TooShort(data.len()));
    }

    let computed = crc16_ccitt(&data[..end]);
    let received = be_u16(&data[end..end + 2]);
    if computed != received {
        return Err(Rejected::Checksum { received, computed });
    }

    Ok(Request {
        command: be_u16(&data[18..20]),
        payload: &data[HEADER_LEN..end],
    })
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// What a discovery reply advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub dev_type: u8,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

/// Build the module discovery reply
pub fn encode_reply(info: &DeviceInfo) -> [u8; REPLY_LEN] {
    let mut reply = [0u8; REPLY_LEN];
    reply[..18].copy_from_slice(&REPLY_HEADER);
    reply[18..20].copy_from_slice(&CMD_DISCOVERY_REPLY);
    reply[20] = info.dev_type;
    reply[27] = REPLY_PAYLOAD_LEN;
    reply[28..34].copy_from_slice(&info.mac.0);
    reply[34..38].copy_from_slice(&info.ip.octets());
    reply[38..40].copy_from_slice(&REPLY_TRAILER);
    let crc = crc16_ccitt(&reply[..40]);
    reply[40..42].copy_from_slice(&crc.to_le_bytes());
    reply
}

/// A request as companion software sends it. `None` if the payload is too
/// long to be accepted.
pub fn encode_request(command: u16, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() >= MAX_PAYLOAD_LEN {
        return None;
    }
    let len = u16::try_from(payload.len()).ok()?;
    let mut packet = vec![0u8; HEADER_LEN];
    packet[..2].copy_from_slice(&MAGIC);
    packet[18..20].copy_from_slice(&command.to_be_bytes());
    packet[26..28].copy_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(payload);
    let crc = crc16_ccitt(&packet);
    packet.extend_from_slice(&crc.to_be_bytes());
    Some(packet)
}
