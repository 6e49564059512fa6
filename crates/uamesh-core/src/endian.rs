//! Host endianness probe and byte-swap helpers
//!
//! The wire format is little-endian throughout. Integer and float
//! endianness are probed independently: some ARM targets store doubles with
//! the two 32-bit halves swapped while integers stay little-endian.

use std::sync::OnceLock;

/// Byte ordering of a scalar in host memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
    /// Little-endian words, swapped 32-bit halves (ARM FPA doubles)
    FloatArmMiddle,
}

static INTEGER: OnceLock<Endianness> = OnceLock::new();
static FLOAT: OnceLock<Endianness> = OnceLock::new();

/// Integer byte order of this host
pub fn integer_endianness() -> Endianness {
    *INTEGER.get_or_init(|| {
        let probe: u32 = 0x0102_0304;
        match probe.to_ne_bytes() {
            [0x04, 0x03, 0x02, 0x01] => Endianness::Little,
            _ => Endianness::Big,
        }
    })
}

/// Double byte order of this host
pub fn float_endianness() -> Endianness {
    *FLOAT.get_or_init(|| {
        // -1.5 is 0xBFF8000000000000; the halves are distinguishable
        let probe: f64 = -1.5;
        match probe.to_ne_bytes() {
            [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0xBF] => Endianness::Little,
            [0xBF, 0xF8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00] => Endianness::Big,
            [0x00, 0x00, 0xF8, 0xBF, 0x00, 0x00, 0x00, 0x00] => Endianness::FloatArmMiddle,
            _ => Endianness::Little,
        }
    })
}

/// Swap the two bytes of a 16-bit word
pub fn swap2(v: u16) -> u16 {
    v.swap_bytes()
}

/// Swap the four bytes of a 32-bit word
pub fn swap4(v: u32) -> u32 {
    v.swap_bytes()
}

/// Swap the eight bytes of a 64-bit word
pub fn swap8(v: u64) -> u64 {
    v.swap_bytes()
}

/// Swap the two 32-bit halves of a 64-bit word, leaving bytes within each
/// half in place (ARM mid-endian doubles)
pub fn swap_halves(v: u64) -> u64 {
    v.rotate_left(32)
}

/// Normalize a host-order integer word to wire (little-endian) order, or
/// back; the operation is its own inverse
pub fn normalize_int(v: u64) -> u64 {
    match integer_endianness() {
        Endianness::Big => swap8(v),
        _ => v,
    }
}

/// Normalize a host-order double bit pattern to wire order, or back
pub fn normalize_double_bits(v: u64) -> u64 {
    match float_endianness() {
        Endianness::Big => swap8(v),
        Endianness::FloatArmMiddle => swap_halves(v),
        Endianness::Little => v,
    }
}

/// Normalize a host-order float bit pattern to wire order, or back
pub fn normalize_float_bits(v: u32) -> u32 {
    match float_endianness() {
        Endianness::Big => swap4(v),
        _ => v,
    }
}
