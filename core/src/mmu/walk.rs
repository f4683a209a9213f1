//! Translation table walks.

use log::{trace, warn};

use crate::config::Arch;
use crate::mem::prim::Endian;
use crate::mmu::Mmu;
use crate::mmu::desc::*;
use crate::mmu::entry::*;
use crate::mmu::prim::*;

/// A walk which did not produce an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkFault {
    pub status: FaultStatus,
    pub domain: u8,
}
impl WalkFault {
    fn new(status: FaultStatus, domain: u8) -> Self { WalkFault { status, domain } }
}

impl Mmu {
    /// Descriptors are fetched big-endian under SCTLR.EE (or SCTLR.B before
    /// ARMv6).
    fn walk_endian(&self) -> Endian {
        let sctlr = self.regs.sctlr;
        let big = if self.cfg.arch >= Arch::V6 {
            sctlr.exception_endian()
        } else {
            sctlr.big_endian()
        };
        if big { Endian::Big } else { Endian::Little }
    }

    /// The ARMv6 table layouts are in use.
    pub fn v6_tables(&self) -> bool {
        self.cfg.arch.has_v6_tables() && self.regs.sctlr.extended_tables()
    }

    fn decode_cfg(&self) -> DecodeCfg {
        DecodeCfg {
            arch: self.cfg.arch,
            supersections: self.cfg.supersections,
            pa_mask: self.cfg.pa_mask(),
            fine_tables: self.cfg.fine_tables,
            ext_small_pages: self.cfg.ext_small_pages,
            sctlr_s: self.regs.sctlr.sysprot_enabled(),
            sctlr_r: self.regs.sctlr.romprot_enabled(),
        }
    }

    /// Physical address of the first-level descriptor for `mva`, or `None`
    /// when walks through the selected base register are disabled.
    pub fn l1_addr(&self, mva: u32) -> Option<u32> {
        let ttbcr = self.regs.ttbcr;
        let n = if self.cfg.arch >= Arch::V6 { ttbcr.n() } else { 0 };

        if n != 0 && (mva >> (32 - n)) != 0 {
            if ttbcr.pd1() {
                return None;
            }
            return Some((self.regs.ttbr1 & 0xffff_c000) | (mva >> 20) << 2);
        }
        if n != 0 && ttbcr.pd0() {
            return None;
        }
        let base_mask = !((1u32 << (14 - n)) - 1);
        let idx = (mva >> 20) & ((1 << (12 - n)) - 1);
        Some((self.regs.ttbr0 & base_mask) | idx << 2)
    }

    fn fetch_desc(&self, pa: u32, status: FaultStatus, domain: u8) -> Result<u32, WalkFault> {
        self.mem.read().read::<u32>(pa as u64, self.walk_endian()).map_err(|e| {
            warn!(target: "MMU", "descriptor fetch at {pa:08x} failed: {e}");
            WalkFault::new(status, domain)
        })
    }

    /// Walk the translation tables for `mva`.
    pub fn walk(&self, mva: u32) -> Result<TlbEntry, WalkFault> {
        use FaultStatus::*;

        let cfg = self.decode_cfg();
        let v6 = self.v6_tables();
        let afe = v6 && self.regs.sctlr.access_flag_enabled();

        let l1_addr = self.l1_addr(mva)
            .ok_or(WalkFault::new(TranslationSection, NO_DOMAIN))?;
        let raw = self.fetch_desc(l1_addr, ExtAbortL1, NO_DOMAIN)?;

        if afe && (raw & 0b11) == L1_SECTION && !access_flag(raw, true) {
            let d = SectionV6Bits(raw);
            let domain = if d.supersection() { 0 } else { d.domain() as u8 };
            return Err(WalkFault::new(AccessFlagSection, domain));
        }
        let l1 = if v6 { decode_l1_v6(raw, mva, &cfg) } else { decode_l1_v5(raw, mva, &cfg) };

        let mut e = match l1 {
            L1Desc::Fault => return Err(WalkFault::new(TranslationSection, NO_DOMAIN)),
            L1Desc::Block(e) => e,
            L1Desc::Table { kind, base, domain, ns } => {
                let raw = self.fetch_desc(kind.l2_addr(base, mva), ExtAbortL2, domain)?;
                if afe && (raw & 0b11) != L2_FAULT && !access_flag(raw, false) {
                    return Err(WalkFault::new(AccessFlagPage, domain));
                }
                let l2 = if v6 {
                    decode_l2_v6(raw, mva, domain, ns, &cfg)
                } else {
                    decode_l2_v5(raw, mva, kind, domain, &cfg)
                };
                match l2 {
                    L2Desc::Fault => return Err(WalkFault::new(TranslationPage, NO_DOMAIN)),
                    L2Desc::Page(e) => e,
                }
            },
        };

        if !e.global {
            e.asid = self.asid();
        }
        trace!(target: "MMU", "walk {mva:08x} @ {l1_addr:08x}: {e}");
        Ok(e)
    }
}
