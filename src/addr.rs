//! The three coordinate systems a PE image is addressed in, kept as distinct
//! types so a RAW offset can never silently be added to an RVA or a VA.
//!
//! Only [`crate::pe::mapper::AddressMapper`] is allowed to convert between them.

use derive_more::{Add, Sub};
use std::fmt;

/// Byte offset from the start of the on-disk file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Add, Sub, Default, Hash)]
pub struct Raw(pub u64);

/// Relative Virtual Address: offset from the image base when mapped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Add, Sub, Default, Hash)]
pub struct Rva(pub u32);

/// Absolute address in the target process (`image_base + RVA`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Add, Sub, Default, Hash)]
pub struct Va(pub u64);

macro_rules! impl_hex_fmt {
    ($t:ty) => {
        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

impl_hex_fmt!(Raw);
impl_hex_fmt!(Rva);
impl_hex_fmt!(Va);

impl Raw {
    pub const INVALID: Raw = Raw(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for Rva {
    fn from(v: u32) -> Self {
        Rva(v)
    }
}

impl From<Rva> for u32 {
    fn from(v: Rva) -> Self {
        v.0
    }
}

impl From<u64> for Va {
    fn from(v: u64) -> Self {
        Va(v)
    }
}

impl Va {
    /// `va_to_rva`: truncates to 32 bits, the way an RVA always is. Saturates
    /// at zero rather than panicking when `va` precedes `image_base`.
    pub fn sub_base(self, base: Va) -> Rva {
        Rva(self.0.wrapping_sub(base.0) as u32)
    }
}

impl Rva {
    pub fn to_va(self, base: Va) -> Va {
        Va(base.0.wrapping_add(self.0 as u64))
    }

    pub fn checked_add(self, n: u32) -> Option<Rva> {
        self.0.checked_add(n).map(Rva)
    }
}
