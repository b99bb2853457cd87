//! Little-endian primitives shared by every PTP dataset.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{MtpError, Result};

/// Longest string a PTP string field can carry, terminator included.
pub const MAX_STRING_CHARS: usize = 255;

#[derive(Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    /// Writes a PTP string: a one byte character count (terminator included)
    /// followed by UTF-16LE code units. Empty strings are a single zero byte.
    /// Over-long strings are cut at a character boundary.
    pub fn string(&mut self, s: &str) -> &mut Self {
        if s.is_empty() {
            return self.u8(0);
        }
        let mut units: Vec<u16> = Vec::with_capacity(s.len() + 1);
        for c in s.chars() {
            let mut tmp = [0u16; 2];
            let encoded = c.encode_utf16(&mut tmp);
            if units.len() + encoded.len() > MAX_STRING_CHARS - 1 {
                break;
            }
            units.extend_from_slice(encoded);
        }
        units.push(0);
        self.u8(units.len() as u8);
        for unit in units {
            self.u16(unit);
        }
        self
    }

    pub fn u32_array(&mut self, values: &[u32]) -> &mut Self {
        self.u32(values.len() as u32);
        for v in values {
            self.u32(*v);
        }
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

pub struct Decoder<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(MtpError::decode(
                self.what,
                format!("need {n} bytes, {} left", self.buf.remaining()),
            ));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }

    pub fn string(&mut self) -> Result<String> {
        let count = self.u8()? as usize;
        if count == 0 {
            return Ok(String::new());
        }
        self.need(count * 2)?;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.buf.get_u16_le());
        }
        while units.last() == Some(&0) {
            units.pop();
        }
        String::from_utf16(&units).map_err(|e| MtpError::decode(self.what, e.to_string()))
    }

    pub fn u16_array(&mut self) -> Result<Vec<u16>> {
        let n = self.u32()? as usize;
        self.need(n.saturating_mul(2))?;
        (0..n).map(|_| self.u16()).collect()
    }

    pub fn u32_array(&mut self) -> Result<Vec<u32>> {
        let n = self.u32()? as usize;
        self.need(n.saturating_mul(4))?;
        (0..n).map(|_| self.u32()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_carry_terminator_and_utf16() {
        let mut enc = Encoder::new();
        enc.string("Hé");
        let bytes = enc.finish();
        assert_eq!(bytes, vec![3, b'H', 0, 0xE9, 0, 0, 0]);

        let mut dec = Decoder::new(&bytes, "string");
        assert_eq!(dec.string().unwrap(), "Hé");
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn empty_string_is_a_single_zero_byte() {
        let mut enc = Encoder::new();
        enc.string("");
        assert_eq!(enc.finish(), vec![0]);
    }

    #[test]
    fn long_strings_are_cut_to_the_field_limit() {
        let long = "x".repeat(400);
        let mut enc = Encoder::new();
        enc.string(&long);
        let bytes = enc.finish();
        assert_eq!(bytes[0] as usize, MAX_STRING_CHARS);
        let decoded = Decoder::new(&bytes, "string").string().unwrap();
        assert_eq!(decoded.len(), MAX_STRING_CHARS - 1);
    }

    #[test]
    fn short_input_is_a_decode_error() {
        let mut dec = Decoder::new(&[1, 0], "u32");
        let err = dec.u32().unwrap_err();
        assert!(matches!(err, MtpError::Decode { what: "u32", .. }));
    }

    #[test]
    fn arrays_reject_truncated_counts() {
        // claims 4 elements but carries one
        let bytes = [4, 0, 0, 0, 7, 0, 0, 0];
        assert!(Decoder::new(&bytes, "array").u32_array().is_err());
    }
}
