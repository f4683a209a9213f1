//! Translation table descriptor formats and the decoder.
//!
//! Each raw descriptor layout is wrapped in a bitfield type with accessors
//! (and `with_*` builders, which are handy for constructing tables). The
//! `decode_*` functions are pure: they turn a raw descriptor into either a
//! pointer to the next level, a normalized [TlbEntry], or a fault.

use crate::config::Arch;
use crate::mmu::entry::*;

/// Declare a multi-bit field accessor and its builder.
macro_rules! field {
    ($get:ident, $set:ident, $mask:expr, $shift:expr) => {
        #[inline(always)]
        pub fn $get(&self) -> u32 { (self.0 & $mask) >> $shift }
        #[inline(always)]
        pub fn $set(self, val: u32) -> Self { Self((self.0 & !$mask) | ((val << $shift) & $mask)) }
    };
}

/// Declare a single-bit field accessor and its builder.
macro_rules! flag {
    ($get:ident, $set:ident, $bit:expr) => {
        #[inline(always)]
        pub fn $get(&self) -> bool { (self.0 & (1 << $bit)) != 0 }
        #[inline(always)]
        pub fn $set(self, val: bool) -> Self {
            Self((self.0 & !(1 << $bit)) | ((val as u32) << $bit))
        }
    };
}

/// Descriptor type tag for the first level.
pub const L1_FAULT: u32   = 0b00;
pub const L1_COARSE: u32  = 0b01;
pub const L1_SECTION: u32 = 0b10;
pub const L1_FINE: u32    = 0b11;

/// Descriptor type tag for the second level.
pub const L2_FAULT: u32 = 0b00;
pub const L2_LARGE: u32 = 0b01;
pub const L2_SMALL: u32 = 0b10;
pub const L2_TINY: u32  = 0b11;

/// First-level coarse page table pointer (both layouts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct CoarseBits(pub u32);
impl CoarseBits {
    pub fn new() -> Self { Self(L1_COARSE | 0x10) }
    field!(base, with_base, 0xffff_fc00, 0);
    field!(domain, with_domain, 0x0000_01e0, 5);
    flag!(ns, with_ns, 3);
}

/// First-level fine page table pointer (pre-ARMv6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FineBits(pub u32);
impl FineBits {
    pub fn new() -> Self { Self(L1_FINE | 0x10) }
    field!(base, with_base, 0xffff_f000, 0);
    field!(domain, with_domain, 0x0000_01e0, 5);
}

/// First-level section, pre-ARMv6 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SectionV5Bits(pub u32);
impl SectionV5Bits {
    pub fn new() -> Self { Self(L1_SECTION | 0x10) }
    field!(base, with_base, 0xfff0_0000, 0);
    field!(tex, with_tex, 0x0000_7000, 12);
    field!(ap, with_ap, 0x0000_0c00, 10);
    field!(domain, with_domain, 0x0000_01e0, 5);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// First-level section, ARMv6 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SectionV6Bits(pub u32);
impl SectionV6Bits {
    pub fn new() -> Self { Self(L1_SECTION) }
    field!(base, with_base, 0xfff0_0000, 0);
    flag!(ns, with_ns, 19);
    flag!(supersection, with_supersection, 18);
    flag!(ng, with_ng, 17);
    flag!(s, with_s, 16);
    flag!(apx, with_apx, 15);
    field!(tex, with_tex, 0x0000_7000, 12);
    field!(ap, with_ap, 0x0000_0c00, 10);
    field!(domain, with_domain, 0x0000_01e0, 5);
    flag!(xn, with_xn, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// First-level supersection, ARMv6 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SuperSectionBits(pub u32);
impl SuperSectionBits {
    pub fn new() -> Self { Self(L1_SECTION | (1 << 18)) }
    field!(base, with_base, 0xff00_0000, 0);
    /// Physical address bits [35:32].
    field!(ext_lo, with_ext_lo, 0x00f0_0000, 20);
    flag!(ns, with_ns, 19);
    flag!(ng, with_ng, 17);
    flag!(s, with_s, 16);
    flag!(apx, with_apx, 15);
    field!(tex, with_tex, 0x0000_7000, 12);
    field!(ap, with_ap, 0x0000_0c00, 10);
    /// Physical address bits [39:36].
    field!(ext_hi, with_ext_hi, 0x0000_01e0, 5);
    flag!(xn, with_xn, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);

    pub fn pa(&self) -> u64 {
        self.base() as u64 | (self.ext_lo() as u64) << 32 | (self.ext_hi() as u64) << 36
    }
}

/// Second-level large page, pre-ARMv6 layout with four subpage permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LargeV5Bits(pub u32);
impl LargeV5Bits {
    pub fn new() -> Self { Self(L2_LARGE) }
    field!(base, with_base, 0xffff_0000, 0);
    field!(tex, with_tex, 0x0000_7000, 12);
    field!(aps, with_aps, 0x0000_0ff0, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// Second-level small page, pre-ARMv6 layout with four subpage permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SmallV5Bits(pub u32);
impl SmallV5Bits {
    pub fn new() -> Self { Self(L2_SMALL) }
    field!(base, with_base, 0xffff_f000, 0);
    field!(aps, with_aps, 0x0000_0ff0, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// Second-level type 0b11 in the pre-ARMv6 layout: a tiny page in a fine
/// table, or an extended small page in a coarse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TinyBits(pub u32);
impl TinyBits {
    pub fn new() -> Self { Self(L2_TINY) }
    field!(base, with_base, 0xffff_fc00, 0);
    field!(tex, with_tex, 0x0000_01c0, 6);
    field!(ap, with_ap, 0x0000_0030, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// Second-level large page, ARMv6 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LargeV6Bits(pub u32);
impl LargeV6Bits {
    pub fn new() -> Self { Self(L2_LARGE) }
    field!(base, with_base, 0xffff_0000, 0);
    flag!(xn, with_xn, 15);
    field!(tex, with_tex, 0x0000_7000, 12);
    flag!(ng, with_ng, 11);
    flag!(s, with_s, 10);
    flag!(apx, with_apx, 9);
    field!(ap, with_ap, 0x0000_0030, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
}

/// Second-level small page, ARMv6 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SmallV6Bits(pub u32);
impl SmallV6Bits {
    pub fn new() -> Self { Self(L2_SMALL) }
    field!(base, with_base, 0xffff_f000, 0);
    flag!(ng, with_ng, 11);
    flag!(s, with_s, 10);
    flag!(apx, with_apx, 9);
    field!(tex, with_tex, 0x0000_01c0, 6);
    field!(ap, with_ap, 0x0000_0030, 4);
    flag!(c, with_c, 3);
    flag!(b, with_b, 2);
    flag!(xn, with_xn, 0);
}

/// Pack TEX, C and B into the five-bit memory type code.
#[inline(always)]
pub fn texcb(tex: u32, c: bool, b: bool) -> u8 {
    ((tex & 0b111) << 2 | (c as u32) << 1 | b as u32) as u8
}

/// Pack APX and AP into a three-bit permission code.
#[inline(always)]
pub fn apx_ap(apx: bool, ap: u32) -> u8 {
    ((apx as u32) << 2 | (ap & 0b11)) as u8
}

/// Returns the access flag of an ARMv6 section or page descriptor.
pub fn access_flag(raw: u32, first_level: bool) -> bool {
    if first_level { (raw & (1 << 10)) != 0 } else { (raw & (1 << 4)) != 0 }
}

/// The kind of second-level table a first-level descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind { Coarse, Fine }
impl TableKind {
    /// Physical address of the second-level descriptor for `mva`.
    pub fn l2_addr(&self, base: u32, mva: u32) -> u32 {
        use crate::mmu::prim::VirtAddrExt;
        match self {
            TableKind::Coarse => (base & 0xffff_fc00) | mva.coarse_idx() << 2,
            TableKind::Fine => (base & 0xffff_f000) | mva.fine_idx() << 2,
        }
    }
}

/// Result of decoding a first-level descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L1Desc {
    Fault,
    Table { kind: TableKind, base: u32, domain: u8, ns: bool },
    Block(TlbEntry),
}

/// Result of decoding a second-level descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Desc {
    Fault,
    Page(TlbEntry),
}

/// Configuration bits the decoder depends on.
#[derive(Debug, Clone, Copy)]
pub struct DecodeCfg {
    pub arch: Arch,
    pub supersections: bool,
    pub pa_mask: u64,
    pub fine_tables: bool,
    pub ext_small_pages: bool,
    /// SCTLR.S and SCTLR.R, captured into every decoded entry.
    pub sctlr_s: bool,
    pub sctlr_r: bool,
}
impl DecodeCfg {
    fn entry(&self, kind: EntryKind, mva: u32, pa: u64, v6_format: bool) -> TlbEntry {
        let mut e = TlbEntry::new(kind, mva, pa & self.pa_mask);
        e.v6_format = v6_format;
        e.sctlr_s = self.sctlr_s;
        e.sctlr_r = self.sctlr_r;
        e
    }
}

/// Decode a first-level descriptor in the pre-ARMv6 layout.
pub fn decode_l1_v5(raw: u32, mva: u32, cfg: &DecodeCfg) -> L1Desc {
    match raw & 0b11 {
        L1_COARSE => {
            let d = CoarseBits(raw);
            L1Desc::Table {
                kind: TableKind::Coarse,
                base: d.base(),
                domain: d.domain() as u8,
                ns: false,
            }
        },
        L1_SECTION => {
            let d = SectionV5Bits(raw);
            let mut e = cfg.entry(EntryKind::Section, mva, d.base() as u64, false);
            e.domain = d.domain() as u8;
            e.set_ap(d.ap() as u8);
            e.texcb = texcb(d.tex(), d.c(), d.b());
            L1Desc::Block(e)
        },
        L1_FINE if cfg.fine_tables => {
            let d = FineBits(raw);
            L1Desc::Table {
                kind: TableKind::Fine,
                base: d.base(),
                domain: d.domain() as u8,
                ns: false,
            }
        },
        _ => L1Desc::Fault,
    }
}

/// Decode a first-level descriptor in the ARMv6 layout.
pub fn decode_l1_v6(raw: u32, mva: u32, cfg: &DecodeCfg) -> L1Desc {
    match raw & 0b11 {
        L1_COARSE => {
            let d = CoarseBits(raw);
            L1Desc::Table {
                kind: TableKind::Coarse,
                base: d.base(),
                domain: d.domain() as u8,
                ns: d.ns(),
            }
        },
        L1_SECTION if SectionV6Bits(raw).supersection() => {
            if !cfg.supersections {
                return L1Desc::Fault;
            }
            let d = SuperSectionBits(raw);
            let mut e = cfg.entry(EntryKind::SuperSection, mva, d.pa(), true);
            e.domain = 0;
            e.set_ap(apx_ap(d.apx(), d.ap()));
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e.shareable = d.s();
            e.xn = d.xn();
            e.ns = d.ns();
            e.global = !d.ng();
            L1Desc::Block(e)
        },
        L1_SECTION => {
            let d = SectionV6Bits(raw);
            let mut e = cfg.entry(EntryKind::Section, mva, d.base() as u64, true);
            e.domain = d.domain() as u8;
            e.set_ap(apx_ap(d.apx(), d.ap()));
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e.shareable = d.s();
            e.xn = d.xn();
            e.ns = d.ns();
            e.global = !d.ng();
            L1Desc::Block(e)
        },
        _ => L1Desc::Fault,
    }
}

/// Split the four packed subpage permissions of a pre-ARMv6 page.
fn subpage_aps(aps: u32) -> [u8; 4] {
    [
        (aps & 0b11) as u8,
        ((aps >> 2) & 0b11) as u8,
        ((aps >> 4) & 0b11) as u8,
        ((aps >> 6) & 0b11) as u8,
    ]
}

/// Decode a second-level descriptor in the pre-ARMv6 layout.
///
/// `table` is the kind of table the descriptor was fetched from, and
/// `domain` comes from the first-level descriptor.
pub fn decode_l2_v5(raw: u32, mva: u32, table: TableKind, domain: u8, cfg: &DecodeCfg) -> L2Desc {
    let mut e = match raw & 0b11 {
        L2_LARGE => {
            let d = LargeV5Bits(raw);
            let mut e = cfg.entry(EntryKind::LargePage, mva, d.base() as u64, false);
            e.ap = subpage_aps(d.aps());
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e
        },
        L2_SMALL => {
            let d = SmallV5Bits(raw);
            let mut e = cfg.entry(EntryKind::SmallPage, mva, d.base() as u64, false);
            e.ap = subpage_aps(d.aps());
            e.texcb = texcb(0, d.c(), d.b());
            e
        },
        L2_TINY => {
            let d = TinyBits(raw);
            let kind = match table {
                TableKind::Fine if cfg.fine_tables => EntryKind::TinyPage,
                TableKind::Coarse if cfg.ext_small_pages => EntryKind::SmallPage,
                _ => return L2Desc::Fault,
            };
            let mut e = cfg.entry(kind, mva, d.base() as u64, false);
            e.set_ap(d.ap() as u8);
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e
        },
        _ => return L2Desc::Fault,
    };
    e.domain = domain;
    L2Desc::Page(e)
}

/// Decode a second-level descriptor in the ARMv6 layout.
pub fn decode_l2_v6(raw: u32, mva: u32, domain: u8, ns: bool, cfg: &DecodeCfg) -> L2Desc {
    let mut e = match raw & 0b11 {
        L2_FAULT => return L2Desc::Fault,
        L2_LARGE => {
            let d = LargeV6Bits(raw);
            let mut e = cfg.entry(EntryKind::LargePage, mva, d.base() as u64, true);
            e.set_ap(apx_ap(d.apx(), d.ap()));
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e.shareable = d.s();
            e.xn = d.xn();
            e.global = !d.ng();
            e
        },
        _ => {
            let d = SmallV6Bits(raw);
            let mut e = cfg.entry(EntryKind::SmallPage, mva, d.base() as u64, true);
            e.set_ap(apx_ap(d.apx(), d.ap()));
            e.texcb = texcb(d.tex(), d.c(), d.b());
            e.shareable = d.s();
            e.xn = d.xn();
            e.global = !d.ng();
            e
        },
    };
    e.domain = domain;
    e.ns = ns;
    L2Desc::Page(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(arch: Arch) -> DecodeCfg {
        DecodeCfg {
            arch,
            supersections: true,
            pa_mask: (1u64 << 40) - 1,
            fine_tables: arch < Arch::V6,
            ext_small_pages: false,
            sctlr_s: true,
            sctlr_r: false,
        }
    }

    fn block(d: L1Desc) -> TlbEntry {
        match d {
            L1Desc::Block(e) => e,
            other => panic!("expected a block, got {other:?}"),
        }
    }

    fn page(d: L2Desc) -> TlbEntry {
        match d {
            L2Desc::Page(e) => e,
            other => panic!("expected a page, got {other:?}"),
        }
    }

    #[test]
    fn coarse_pointer() {
        let raw = CoarseBits::new().with_base(0x0012_3400).with_domain(7).with_ns(true).0;
        assert_eq!(decode_l1_v6(raw, 0, &cfg(Arch::V6)),
            L1Desc::Table { kind: TableKind::Coarse, base: 0x0012_3400, domain: 7, ns: true });
        assert_eq!(decode_l1_v5(raw, 0, &cfg(Arch::V5)),
            L1Desc::Table { kind: TableKind::Coarse, base: 0x0012_3400, domain: 7, ns: false });
    }

    #[test]
    fn fine_pointer() {
        let raw = FineBits::new().with_base(0x0004_5000).with_domain(2).0;
        assert_eq!(decode_l1_v5(raw, 0, &cfg(Arch::V5)),
            L1Desc::Table { kind: TableKind::Fine, base: 0x0004_5000, domain: 2, ns: false });
        // Fine tables are gone from the ARMv6 layout.
        assert_eq!(decode_l1_v6(raw, 0, &cfg(Arch::V6)), L1Desc::Fault);
        // ...and from cores that never had them.
        let no_fine = DecodeCfg { fine_tables: false, ..cfg(Arch::V5) };
        assert_eq!(decode_l1_v5(raw, 0, &no_fine), L1Desc::Fault);
    }

    #[test]
    fn section_v5() {
        let raw = SectionV5Bits::new().with_base(0x8010_0000).with_ap(2)
            .with_domain(5).with_tex(1).with_c(true).0;
        let e = block(decode_l1_v5(raw, 0x0012_3456, &cfg(Arch::V5)));
        assert_eq!((e.low_va, e.high_va, e.low_pa), (0x0010_0000, 0x001f_ffff, 0x8010_0000));
        assert_eq!(e.kind, EntryKind::Section);
        assert_eq!(e.domain, 5);
        assert_eq!(e.ap, [2; 4]);
        assert_eq!(e.texcb, 0b00110);
        assert!(e.global && !e.xn && !e.v6_format);
        assert!(e.sctlr_s && !e.sctlr_r);
    }

    #[test]
    fn section_v6() {
        let raw = SectionV6Bits::new().with_base(0x4000_0000).with_apx(true).with_ap(1)
            .with_domain(9).with_tex(0b101).with_b(true).with_s(true).with_xn(true)
            .with_ng(true).with_ns(true).0;
        let e = block(decode_l1_v6(raw, 0xc000_0000, &cfg(Arch::V6)));
        assert_eq!((e.low_va, e.low_pa), (0xc000_0000, 0x4000_0000));
        assert_eq!(e.domain, 9);
        assert_eq!(e.ap, [0b101; 4]);
        assert_eq!(e.texcb, 0b10101);
        assert!(e.shareable && e.xn && e.ns && !e.global && e.v6_format);
    }

    #[test]
    fn supersection() {
        let raw = SuperSectionBits::new().with_base(0x1200_0000).with_ext_lo(0x3)
            .with_ext_hi(0x9).with_ap(3).with_c(true).0;
        let e = block(decode_l1_v6(raw, 0x4567_89ab, &cfg(Arch::V7)));
        assert_eq!(e.kind, EntryKind::SuperSection);
        assert_eq!((e.low_va, e.high_va), (0x4500_0000, 0x45ff_ffff));
        assert_eq!(e.low_pa, 0x93_1200_0000);
        assert_eq!(e.domain, 0);
        assert_eq!(e.ap, [3; 4]);
        assert_eq!(e.texcb, 0b00010);

        let no_super = DecodeCfg { supersections: false, ..cfg(Arch::V6) };
        assert_eq!(decode_l1_v6(raw, 0, &no_super), L1Desc::Fault);

        // The extended bits are dropped on a 32-bit physical address space.
        let narrow = DecodeCfg { pa_mask: 0xffff_ffff, ..cfg(Arch::V6) };
        assert_eq!(block(decode_l1_v6(raw, 0, &narrow)).low_pa, 0x1200_0000);
    }

    #[test]
    fn large_page_v5() {
        let raw = LargeV5Bits::new().with_base(0x0123_0000).with_aps(0b11_10_01_00)
            .with_tex(0b010).with_b(true).0;
        let e = page(decode_l2_v5(raw, 0x0004_8000, TableKind::Coarse, 4, &cfg(Arch::V5)));
        assert_eq!(e.kind, EntryKind::LargePage);
        assert_eq!((e.low_va, e.high_va, e.low_pa), (0x0004_0000, 0x0004_ffff, 0x0123_0000));
        assert_eq!(e.ap, [0, 1, 2, 3]);
        assert_eq!(e.texcb, 0b01001);
        assert_eq!(e.domain, 4);
    }

    #[test]
    fn large_page_v6() {
        let raw = LargeV6Bits::new().with_base(0xabcd_0000).with_xn(true).with_tex(0b001)
            .with_ng(true).with_s(true).with_apx(true).with_ap(2).with_c(true).0;
        let e = page(decode_l2_v6(raw, 0x0001_2345, 3, true, &cfg(Arch::V6)));
        assert_eq!(e.kind, EntryKind::LargePage);
        assert_eq!((e.low_va, e.low_pa), (0x0001_0000, 0xabcd_0000));
        assert_eq!(e.ap, [0b110; 4]);
        assert_eq!(e.texcb, 0b00110);
        assert!(e.xn && !e.global && e.shareable && e.ns);
        assert_eq!(e.domain, 3);
    }

    #[test]
    fn small_page_v5() {
        let raw = SmallV5Bits::new().with_base(0x0000_5000).with_aps(0xff).with_c(true).with_b(true).0;
        let e = page(decode_l2_v5(raw, 0x1000_0abc, TableKind::Fine, 1, &cfg(Arch::V4)));
        assert_eq!(e.kind, EntryKind::SmallPage);
        assert_eq!((e.low_va, e.high_va, e.low_pa), (0x1000_0000, 0x1000_0fff, 0x5000));
        assert_eq!(e.ap, [3; 4]);
        assert_eq!(e.texcb, 0b00011);
    }

    #[test]
    fn small_page_v6() {
        let raw = SmallV6Bits::new().with_base(0x0765_4000).with_ng(true).with_s(true)
            .with_tex(0b100).with_ap(1).with_b(true).with_xn(true).0;
        let e = page(decode_l2_v6(raw, 0x2000_1fff, 0, false, &cfg(Arch::V6)));
        assert_eq!(e.kind, EntryKind::SmallPage);
        assert_eq!((e.low_va, e.high_va, e.low_pa), (0x2000_1000, 0x2000_1fff, 0x0765_4000));
        assert_eq!(e.ap, [1; 4]);
        assert_eq!(e.texcb, 0b10001);
        assert!(e.xn && !e.global && e.shareable);
        // Type 0b11 is a small page with XN set.
        assert_eq!(page(decode_l2_v6(raw | 0b11, 0, 0, false, &cfg(Arch::V6))).kind,
            EntryKind::SmallPage);
    }

    #[test]
    fn tiny_page() {
        let raw = TinyBits::new().with_base(0x0000_8c00).with_ap(2).0;
        let e = page(decode_l2_v5(raw, 0x0000_0c10, TableKind::Fine, 6, &cfg(Arch::V5)));
        assert_eq!(e.kind, EntryKind::TinyPage);
        assert_eq!((e.low_va, e.high_va, e.low_pa), (0x0c00, 0x0fff, 0x8c00));
        assert_eq!(e.ap, [2; 4]);
        assert_eq!(e.domain, 6);

        // In a coarse table, type 0b11 only exists with extended small pages.
        assert_eq!(decode_l2_v5(raw, 0, TableKind::Coarse, 0, &cfg(Arch::V5)), L2Desc::Fault);
        let ext = DecodeCfg { ext_small_pages: true, ..cfg(Arch::V5) };
        let e = page(decode_l2_v5(raw, 0x0000_0c10, TableKind::Coarse, 0, &ext));
        assert_eq!(e.kind, EntryKind::SmallPage);
        assert_eq!(e.low_pa, 0x8000);
    }

    #[test]
    fn faults() {
        assert_eq!(decode_l1_v5(0, 0, &cfg(Arch::V5)), L1Desc::Fault);
        assert_eq!(decode_l1_v6(0xffff_fffc, 0, &cfg(Arch::V6)), L1Desc::Fault);
        assert_eq!(decode_l2_v5(0x1234_5000, 0, TableKind::Coarse, 0, &cfg(Arch::V5)), L2Desc::Fault);
        assert_eq!(decode_l2_v6(0x1234_5000, 0, 0, false, &cfg(Arch::V6)), L2Desc::Fault);
    }
}
