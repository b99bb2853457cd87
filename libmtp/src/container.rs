//! USB container framing: every command, data block and response travels in a
//! container with a 12 byte header.

use crate::codec::{Decoder, Encoder};
use crate::codes::container as kind;
use crate::error::{MtpError, Result};

pub const HEADER_LEN: usize = 12;
pub const MAX_PARAMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u32,
    pub kind: u16,
    pub code: u16,
    pub transaction_id: u32,
}

impl Header {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf, "container header");
        let header = Header {
            length: dec.u32()?,
            kind: dec.u16()?,
            code: dec.u16()?,
            transaction_id: dec.u32()?,
        };
        if (header.length as usize) < HEADER_LEN {
            return Err(MtpError::Protocol(format!(
                "container length {} shorter than header",
                header.length
            )));
        }
        Ok(header)
    }

    pub fn payload_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    fn encode_into(&self, enc: &mut Encoder) {
        enc.u32(self.length)
            .u16(self.kind)
            .u16(self.code)
            .u32(self.transaction_id);
    }
}

/// Builds a command container carrying `params`.
pub fn command(code: u16, transaction_id: u32, params: &[u32]) -> Result<Vec<u8>> {
    if params.len() > MAX_PARAMS {
        return Err(MtpError::Protocol(format!(
            "{} parameters exceed the limit of {MAX_PARAMS}",
            params.len()
        )));
    }
    let header = Header {
        length: (HEADER_LEN + 4 * params.len()) as u32,
        kind: kind::COMMAND,
        code,
        transaction_id,
    };
    let mut enc = Encoder::new();
    header.encode_into(&mut enc);
    for p in params {
        enc.u32(*p);
    }
    Ok(enc.finish())
}

/// Header of a data container announcing `payload_len` bytes.
pub fn data_header(code: u16, transaction_id: u32, payload_len: usize) -> Vec<u8> {
    // Payloads of 4GiB and more announce 0xFFFFFFFF and rely on the short
    // packet that ends the transfer.
    let length = u32::try_from(HEADER_LEN + payload_len).unwrap_or(u32::MAX);
    let header = Header {
        length,
        kind: kind::DATA,
        code,
        transaction_id,
    };
    let mut enc = Encoder::new();
    header.encode_into(&mut enc);
    enc.finish()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub transaction_id: u32,
    pub params: Vec<u32>,
}

impl Response {
    pub fn decode(header: &Header, payload: &[u8]) -> Result<Self> {
        if header.kind != kind::RESPONSE {
            return Err(MtpError::Protocol(format!(
                "expected response container, got type {}",
                header.kind
            )));
        }
        let mut dec = Decoder::new(payload, "response parameters");
        let mut params = Vec::with_capacity(MAX_PARAMS);
        while dec.remaining() >= 4 && params.len() < MAX_PARAMS {
            params.push(dec.u32()?);
        }
        Ok(Response {
            code: header.code,
            transaction_id: header.transaction_id,
            params,
        })
    }

    #[cfg(any(test, feature = "mock"))]
    pub fn encode(&self) -> Vec<u8> {
        let header = Header {
            length: (HEADER_LEN + 4 * self.params.len()) as u32,
            kind: kind::RESPONSE,
            code: self.code,
            transaction_id: self.transaction_id,
        };
        let mut enc = Encoder::new();
        header.encode_into(&mut enc);
        for p in &self.params {
            enc.u32(*p);
        }
        enc.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{op, response};

    #[test]
    fn command_container_layout() {
        let bytes = command(op::GET_STORAGE_INFO, 7, &[0x0001_0001]).unwrap();
        assert_eq!(bytes.len(), 16);
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.length, 16);
        assert_eq!(header.kind, kind::COMMAND);
        assert_eq!(header.code, op::GET_STORAGE_INFO);
        assert_eq!(header.transaction_id, 7);
        assert_eq!(&bytes[12..], &[1, 0, 1, 0]);
    }

    #[test]
    fn too_many_params_are_rejected() {
        assert!(command(op::GET_OBJECT_PROP_LIST, 1, &[0; 6]).is_err());
    }

    #[test]
    fn response_keeps_its_parameters() {
        let resp = Response {
            code: response::OK,
            transaction_id: 3,
            params: vec![0x10001, 0xFFFF_FFFF, 42],
        };
        let bytes = resp.encode();
        let header = Header::decode(&bytes).unwrap();
        let back = Response::decode(&header, &bytes[HEADER_LEN..]).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn data_container_is_not_a_response() {
        let bytes = data_header(op::GET_OBJECT, 1, 0);
        let header = Header::decode(&bytes).unwrap();
        assert!(Response::decode(&header, &[]).is_err());
    }

    #[test]
    fn header_shorter_than_itself_is_a_protocol_error() {
        let mut bytes = command(op::OPEN_SESSION, 0, &[1]).unwrap();
        bytes[0] = 4;
        assert!(matches!(Header::decode(&bytes), Err(MtpError::Protocol(_))));
    }
}
