use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::RconError;
use crate::text::{decode_latin1, encode_latin1};

/// Every out-of-band packet, request or reply, starts with this header (`FF FF FF FF`).
pub const OOB_HEADER: i32 = -1;

/// Reply body the server sends when the rcon password is wrong.
pub const BAD_PASSWORD_BODY: &str = "print\nBad rcon_password.\n";

const PRINT_PREFIX: &str = "print\n";

/// Replies are read in one go into a buffer of this size; longer replies are truncated.
pub const MAX_PACKET_SIZE: usize = 2048;

#[derive(Debug, PartialEq, Eq)]
pub enum RequestPacket {
    /// `rcon <password> <command>`
    Rcon { password: String, command: String },
    /// Public status query, no password involved.
    Status,
}

impl RequestPacket {
    pub fn rcon(password: &str, command: &str) -> Self {
        RequestPacket::Rcon {
            password: password.to_owned(),
            command: command.to_owned(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            RequestPacket::Rcon { password, command } => format!("rcon {password} {command}\n"),
            RequestPacket::Status => "status\n".to_owned(),
        }
    }

    /// Serializes the request: header followed by the latin-1 body.
    pub fn pack(&self) -> Vec<u8> {
        let body = encode_latin1(&self.body());
        let mut payload: Vec<u8> = Vec::with_capacity(4 + body.len());
        // writing into a Vec cannot fail
        let _ = payload.write_i32::<LittleEndian>(OOB_HEADER);
        payload.extend_from_slice(&body);
        payload
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResponsePacket {
    body: String,
}

impl ResponsePacket {
    /// Deserializes an incoming datagram, checking the header and decoding the body as latin-1.
    pub fn unpack(incoming: &[u8]) -> Result<Self, RconError> {
        let mut cursor = Cursor::new(incoming);
        let header = cursor.read_i32::<LittleEndian>()
            .map_err(|_| RconError::TruncatedPacket(incoming.len()))?;
        if header != OOB_HEADER {
            return Err(RconError::UnknownPacketHeader(header));
        }
        Ok(ResponsePacket {
            body: decode_latin1(&incoming[4..]),
        })
    }

    pub fn is_bad_password(&self) -> bool {
        self.body == BAD_PASSWORD_BODY
    }

    /// The whole body, including the `print` line.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The text after the `print` line.
    pub fn payload(&self) -> &str {
        self.body.strip_prefix(PRINT_PREFIX).unwrap_or(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_rcon() {
        let packed = RequestPacket::rcon("hello", "sv players").pack();
        assert_eq!(&packed[..4], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&packed[4..], b"rcon hello sv players\n");
    }

    #[test]
    fn pack_status() {
        assert_eq!(RequestPacket::Status.pack(), b"\xff\xff\xff\xffstatus\n".to_vec());
    }

    #[test]
    fn unpack_reply() {
        let packet = ResponsePacket::unpack(b"\xff\xff\xff\xffprint\nmap is airtime\n").unwrap();
        assert_eq!(packet.payload(), "map is airtime\n");
        assert!(!packet.is_bad_password());

        let packet = ResponsePacket::unpack(b"\xff\xff\xff\xffprint\nBad rcon_password.\n").unwrap();
        assert!(packet.is_bad_password());
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(matches!(ResponsePacket::unpack(b"\xff\xff"), Err(RconError::TruncatedPacket(2))));
        assert!(matches!(ResponsePacket::unpack(b"\xfe\xff\xff\xffprint\n"), Err(RconError::UnknownPacketHeader(-2))));
    }
}
