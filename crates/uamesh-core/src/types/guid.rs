//! Guid: uint32, uint16, uint16, 8 raw bytes on the wire

use crate::buffer::Buffer;
use crate::builtin;
use crate::status::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<()> {
        builtin::encode_u32(self.data1, buf)?;
        builtin::encode_u16(self.data2, buf)?;
        builtin::encode_u16(self.data3, buf)?;
        buf.write(&self.data4)?;
        Ok(())
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self> {
        let data1 = builtin::decode_u32(buf)?;
        let data2 = builtin::decode_u16(buf)?;
        let data3 = builtin::decode_u16(buf)?;
        let data4 = buf.read_array()?;
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let guid = Guid::new(0x1234_5678, 0x9ABC, 0xDEF0, [1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buf = Buffer::new(16);
        guid.encode(&mut buf).unwrap();
        assert_eq!(buf.length(), 16);
        buf.set_position(0).unwrap();
        assert_eq!(Guid::decode(&mut buf).unwrap(), guid);
    }

    #[test]
    fn wire_layout() {
        let guid = Guid::new(0x0102_0304, 0x0506, 0x0708, [9, 10, 11, 12, 13, 14, 15, 16]);
        let mut buf = Buffer::new(16);
        guid.encode(&mut buf).unwrap();
        assert_eq!(
            buf.as_bytes(),
            &[4, 3, 2, 1, 6, 5, 8, 7, 9, 10, 11, 12, 13, 14, 15, 16]
        );
    }
}
