//! Wrapper types for the system control registers that affect translation.
//!
//! Every register is kept in its raw form and decoded through accessors, so
//! the value read back by software is always the value that was written
//! (modulo read-as-zero/one bits).

use crate::config::Arch;

/// System control register (c1, c0, 0).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ControlReg(pub u32);
impl ControlReg {
    pub const M: u32   = 1 << 0;
    pub const A: u32   = 1 << 1;
    pub const B: u32   = 1 << 7;
    pub const S: u32   = 1 << 8;
    pub const R: u32   = 1 << 9;
    pub const BR: u32  = 1 << 17;
    pub const XP: u32  = 1 << 23;
    pub const EE: u32  = 1 << 25;
    pub const AFE: u32 = 1 << 29;

    #[inline(always)]
    pub fn mmu_enabled(&self) -> bool { (self.0 & Self::M) != 0 }
    #[inline(always)]
    pub fn alignment_check(&self) -> bool { (self.0 & Self::A) != 0 }
    #[inline(always)]
    pub fn big_endian(&self) -> bool { (self.0 & Self::B) != 0 }
    #[inline(always)]
    pub fn sysprot_enabled(&self) -> bool { (self.0 & Self::S) != 0 }
    #[inline(always)]
    pub fn romprot_enabled(&self) -> bool { (self.0 & Self::R) != 0 }
    #[inline(always)]
    pub fn background_region(&self) -> bool { (self.0 & Self::BR) != 0 }
    #[inline(always)]
    pub fn extended_tables(&self) -> bool { (self.0 & Self::XP) != 0 }
    #[inline(always)]
    pub fn exception_endian(&self) -> bool { (self.0 & Self::EE) != 0 }
    #[inline(always)]
    pub fn access_flag_enabled(&self) -> bool { (self.0 & Self::AFE) != 0 }

    /// Sanitize a written value for a particular architecture.
    pub fn for_arch(val: u32, arch: Arch) -> Self {
        let mut val = val;
        if arch < Arch::V6 {
            val &= !(Self::XP | Self::EE | Self::AFE);
        }
        if arch < Arch::V6K {
            val &= !Self::AFE;
        }
        if arch >= Arch::V7 {
            // S/R are gone and the extended tables are always in use.
            val = (val & !(Self::S | Self::R)) | Self::XP;
        }
        ControlReg(val)
    }
}

/// Translation table base control register (c2, c0, 2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TtbcrReg(pub u32);
impl TtbcrReg {
    #[inline(always)]
    pub fn n(&self) -> u32 { self.0 & 0x7 }
    /// Disable walks through TTBR0.
    #[inline(always)]
    pub fn pd0(&self) -> bool { (self.0 & 0x10) != 0 }
    /// Disable walks through TTBR1.
    #[inline(always)]
    pub fn pd1(&self) -> bool { (self.0 & 0x20) != 0 }
}

/// Domain access control register (c3, c0, 0).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct DacrReg(pub u32);
impl DacrReg {
    #[inline(always)]
    pub fn domain(&self, dom: u8) -> u32 { (self.0 >> ((dom as u32 & 0xf) * 2)) & 0b11 }
    /// Mask of 2-bit fields holding the reserved encoding.
    pub fn reserved_mask(&self) -> u32 {
        let hi = self.0 & 0xaaaa_aaaa;
        let lo = self.0 & 0x5555_5555;
        let res = hi & !(lo << 1);
        res | (res >> 1)
    }
}

/// Context id register (c13, c0, 1).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ContextIdReg(pub u32);
impl ContextIdReg {
    #[inline(always)]
    pub fn asid(&self) -> u8 { (self.0 & 0xff) as u8 }
    #[inline(always)]
    pub fn procid(&self) -> u32 { self.0 >> 8 }
}

/// FCSE process id register (c13, c0, 0).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FcsePidReg(pub u32);
impl FcsePidReg {
    pub const MASK: u32 = 0xfe00_0000;
    #[inline(always)]
    pub fn pid(&self) -> u32 { (self.0 & Self::MASK) >> 25 }
    #[inline(always)]
    pub fn base(&self) -> u32 { self.0 & Self::MASK }
}

/// TLB lockdown control register (c10, c0, n).
///
/// The base field occupies the top `width` bits, the victim field the
/// `width` bits below it, and bit 0 is the preserve bit. The width depends
/// on the lockdown capacity of the TLB.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockdownReg {
    pub base: u32,
    pub victim: u32,
    pub preserve: bool,
}
impl LockdownReg {
    /// Widest field that still leaves the preserve bit clear of the victim.
    pub const MAX_WIDTH: u32 = 15;

    /// Field width for a TLB with `entries` lockdown entries.
    pub fn width(entries: u32) -> u32 {
        entries.clamp(2, 1 << Self::MAX_WIDTH).next_power_of_two().trailing_zeros()
    }
    pub fn decode(val: u32, width: u32) -> Self {
        let width = width.clamp(1, Self::MAX_WIDTH);
        let mask = (1u32 << width) - 1;
        LockdownReg {
            base: (val >> (32 - width)) & mask,
            victim: (val >> (32 - 2 * width)) & mask,
            preserve: (val & 1) != 0,
        }
    }
    pub fn encode(&self, width: u32) -> u32 {
        let width = width.clamp(1, Self::MAX_WIDTH);
        let mask = (1u32 << width) - 1;
        (self.base & mask) << (32 - width)
            | (self.victim & mask) << (32 - 2 * width)
            | self.preserve as u32
    }
}

/// Lockdown entry VA register (c15, c5, 2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LockdownVa(pub u32);
impl LockdownVa {
    #[inline(always)]
    pub fn va(&self) -> u32 { self.0 & 0xffff_f000 }
    #[inline(always)]
    pub fn global(&self) -> bool { (self.0 & (1 << 9)) != 0 }
    #[inline(always)]
    pub fn asid(&self) -> u8 { (self.0 & 0xff) as u8 }
}

/// Lockdown entry PA register (c15, c6, 2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LockdownPa(pub u32);
impl LockdownPa {
    #[inline(always)]
    pub fn pa(&self) -> u32 { self.0 & 0xffff_f000 }
    #[inline(always)]
    pub fn ns(&self) -> bool { (self.0 & (1 << 9)) != 0 }
    /// Size code: 0 = 16MB, 1 = 4KB, 2 = 64KB, 3 = 1MB.
    #[inline(always)]
    pub fn size(&self) -> u32 { (self.0 >> 6) & 0b11 }
    /// APX:AP for the first (or only) subpage.
    #[inline(always)]
    pub fn ap(&self) -> u8 { ((self.0 >> 1) & 0b111) as u8 }
    #[inline(always)]
    pub fn valid(&self) -> bool { (self.0 & 1) != 0 }

    pub fn size_bytes(&self) -> u64 {
        match self.size() {
            0 => 0x100_0000,
            1 => 0x1000,
            2 => 0x1_0000,
            _ => 0x10_0000,
        }
    }
    pub fn size_code(bytes: u64) -> u32 {
        match bytes {
            0x100_0000 => 0,
            0x1000 => 1,
            0x1_0000 => 2,
            _ => 3,
        }
    }
}

/// Lockdown entry attribute register (c15, c7, 2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LockdownAttr(pub u32);
impl LockdownAttr {
    #[inline(always)]
    pub fn s(&self) -> bool { (self.0 & 1) != 0 }
    /// TEX:C:B packed into five bits.
    #[inline(always)]
    pub fn texcb(&self) -> u8 {
        let b = (self.0 >> 1) & 1;
        let c = (self.0 >> 2) & 1;
        let tex = (self.0 >> 3) & 0b111;
        (tex << 2 | c << 1 | b) as u8
    }
    #[inline(always)]
    pub fn xn(&self) -> bool { (self.0 & (1 << 6)) != 0 }
    #[inline(always)]
    pub fn domain(&self) -> u8 { ((self.0 >> 7) & 0xf) as u8 }
    /// Subpage access permissions are valid.
    #[inline(always)]
    pub fn spv(&self) -> bool { (self.0 & (1 << 11)) != 0 }
    /// Access permission for subpage `n` (1..=3).
    #[inline(always)]
    pub fn sub_ap(&self, n: u32) -> u8 { ((self.0 >> (12 + 2 * (n - 1))) & 0b11) as u8 }

    pub fn encode(s: bool, texcb: u8, xn: bool, domain: u8, sub: Option<[u8; 3]>) -> u32 {
        let texcb = texcb as u32;
        let mut val = s as u32
            | (texcb & 1) << 1
            | ((texcb >> 1) & 1) << 2
            | ((texcb >> 2) & 0b111) << 3
            | (xn as u32) << 6
            | (domain as u32 & 0xf) << 7;
        if let Some(sub) = sub {
            val |= 1 << 11;
            for (n, ap) in sub.iter().enumerate() {
                val |= (*ap as u32 & 0b11) << (12 + 2 * n);
            }
        }
        val
    }
}

/// Memory type and cacheability decoded from TEX:C:B (with TEX remap off).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    StronglyOrdered,
    /// Device memory; the flag is true for the shareable flavour.
    Device(bool),
    /// Normal memory with (inner, outer) cache policies.
    Normal(CachePolicy, CachePolicy),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy { NonCacheable, WriteBackAlloc, WriteThrough, WriteBack }
impl CachePolicy {
    fn from_bits(x: u8) -> Self {
        match x & 0b11 {
            0b00 => CachePolicy::NonCacheable,
            0b01 => CachePolicy::WriteBackAlloc,
            0b10 => CachePolicy::WriteThrough,
            _ => CachePolicy::WriteBack,
        }
    }
    fn inner_code(&self) -> u32 {
        match self {
            CachePolicy::NonCacheable => 0b000,
            CachePolicy::WriteBackAlloc => 0b111,
            CachePolicy::WriteThrough => 0b110,
            CachePolicy::WriteBack => 0b111,
        }
    }
    fn outer_code(&self) -> u32 {
        match self {
            CachePolicy::NonCacheable => 0b00,
            CachePolicy::WriteBackAlloc => 0b01,
            CachePolicy::WriteThrough => 0b10,
            CachePolicy::WriteBack => 0b11,
        }
    }
}

impl MemType {
    pub fn from_texcb(texcb: u8) -> Self {
        let tex = (texcb >> 2) & 0b111;
        let cb = texcb & 0b11;
        if tex & 0b100 != 0 {
            return MemType::Normal(CachePolicy::from_bits(cb), CachePolicy::from_bits(tex));
        }
        match (tex, cb) {
            (0b000, 0b00) => MemType::StronglyOrdered,
            (0b000, 0b01) => MemType::Device(true),
            (0b000, 0b10) => MemType::Normal(CachePolicy::WriteThrough, CachePolicy::WriteThrough),
            (0b000, 0b11) => MemType::Normal(CachePolicy::WriteBack, CachePolicy::WriteBack),
            (0b001, 0b11) => MemType::Normal(CachePolicy::WriteBackAlloc, CachePolicy::WriteBackAlloc),
            (0b010, 0b00) => MemType::Device(false),
            _ => MemType::Normal(CachePolicy::NonCacheable, CachePolicy::NonCacheable),
        }
    }

    /// (inner, outer) attribute fields as reported in the PAR.
    pub fn par_attrs(&self) -> (u32, u32) {
        match self {
            MemType::StronglyOrdered => (0b001, 0b00),
            MemType::Device(_) => (0b011, 0b00),
            MemType::Normal(inner, outer) => (inner.inner_code(), outer.outer_code()),
        }
    }
}

/// Physical address register (c7, c4, 0), the result of a VA to PA operation.
pub struct ParReg;
impl ParReg {
    pub fn success(pa: u64, ns: bool, shareable: bool, mtype: MemType) -> u32 {
        let (inner, outer) = mtype.par_attrs();
        (pa as u32 & 0xffff_f000)
            | (ns as u32) << 9
            | (shareable as u32) << 7
            | inner << 4
            | outer << 2
    }
    pub fn failure(fs: u8) -> u32 {
        (fs as u32 & 0x3f) << 1 | 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockdown_layout() {
        assert_eq!(LockdownReg::width(64), 6);
        assert_eq!(LockdownReg::width(8), 3);
        assert_eq!(LockdownReg::width(1), 1);
        assert_eq!(LockdownReg::width(u32::MAX), LockdownReg::MAX_WIDTH);
        let wide = LockdownReg { base: 0x7fff, victim: 0x7fff, preserve: true };
        assert_eq!(LockdownReg::decode(wide.encode(20), 20), wide);
        let r = LockdownReg { base: 2, victim: 5, preserve: true };
        let raw = r.encode(3);
        assert_eq!(raw, 0x4000_0000 | 0x1400_0000 | 1);
        assert_eq!(LockdownReg::decode(raw, 3), r);
    }

    #[test]
    fn dacr_reserved_fields() {
        // domain 1 reserved (0b10), domain 0 manager (0b11)
        assert_eq!(DacrReg(0b1011).reserved_mask(), 0b1100);
        assert_eq!(DacrReg(0x5555_5555).reserved_mask(), 0);
    }

    #[test]
    fn control_sanitize() {
        let c = ControlReg::for_arch(ControlReg::XP | ControlReg::S | 1, Arch::V5);
        assert!(!c.extended_tables());
        assert!(c.sysprot_enabled());
        let c = ControlReg::for_arch(ControlReg::S | 1, Arch::V7);
        assert!(c.extended_tables());
        assert!(!c.sysprot_enabled());
    }

    #[test]
    fn memory_types() {
        assert_eq!(MemType::from_texcb(0b00000), MemType::StronglyOrdered);
        assert_eq!(MemType::from_texcb(0b01000), MemType::Device(false));
        assert_eq!(MemType::from_texcb(0b10111),
            MemType::Normal(CachePolicy::WriteBack, CachePolicy::WriteBackAlloc));
    }
}
