//! Tightly-coupled memories.
//!
//! Each bank is a small local RAM which, while enabled, shadows the
//! physical address range it has been relocated to. Accesses reaching
//! physical memory are routed through the banks first.

use std::fmt;

use log::{debug, warn};

use crate::config::VmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcmKind { Instruction, Data }

/// TCM region register (c9, c1, n).
///
/// Base address in [31:12], size in [6:2] (`2^(n+9)` bytes), enable in
/// bit 0. The size field is read-only and reports the size of the bank.
pub struct TcmBank {
    base: u32,
    enabled: bool,
    data: Vec<u8>,
}
impl TcmBank {
    fn new(size: u32) -> Self {
        TcmBank { base: 0, enabled: false, data: vec![0; size as usize] }
    }

    pub fn size(&self) -> u32 { self.data.len() as u32 }
    pub fn base(&self) -> u32 { self.base }
    pub fn enabled(&self) -> bool { self.enabled }

    fn size_code(&self) -> u32 {
        self.data.len().trailing_zeros().saturating_sub(9)
    }

    fn read_reg(&self) -> u32 {
        self.base | (self.size_code() & 0x1f) << 2 | self.enabled as u32
    }

    fn write_reg(&mut self, val: u32) {
        self.base = val & 0xffff_f000 & !(self.size() - 1);
        self.enabled = (val & 1) != 0;
    }

    /// True when the bank is enabled and `[pa, pa+len)` lies inside it.
    pub fn contains(&self, pa: u64, len: usize) -> bool {
        let base = self.base as u64;
        self.enabled && pa >= base && pa + len as u64 <= base + self.size() as u64
    }

    fn offset(&self, pa: u64) -> usize { (pa - self.base as u64) as usize }
}

#[derive(Default)]
pub struct Tcm {
    itcm: Option<TcmBank>,
    dtcm: Option<TcmBank>,
}
impl Tcm {
    pub fn new(cfg: &VmConfig) -> Self {
        let bank = |size: u32| if size != 0 { Some(TcmBank::new(size.next_power_of_two())) } else { None };
        Tcm { itcm: bank(cfg.itcm_size), dtcm: bank(cfg.dtcm_size) }
    }

    pub fn bank(&self, kind: TcmKind) -> Option<&TcmBank> {
        match kind {
            TcmKind::Instruction => self.itcm.as_ref(),
            TcmKind::Data => self.dtcm.as_ref(),
        }
    }
    fn bank_mut(&mut self, kind: TcmKind) -> Option<&mut TcmBank> {
        match kind {
            TcmKind::Instruction => self.itcm.as_mut(),
            TcmKind::Data => self.dtcm.as_mut(),
        }
    }

    /// Read a region register. Absent banks read as zero.
    pub fn read_region(&self, kind: TcmKind) -> u32 {
        self.bank(kind).map_or(0, |b| b.read_reg())
    }

    /// Write a region register, relocating and enabling/disabling a bank.
    pub fn write_region(&mut self, kind: TcmKind, val: u32) {
        match self.bank_mut(kind) {
            Some(bank) => {
                bank.write_reg(val);
                debug!(target: "TCM", "{kind:?} TCM at {:08x} size {:x} enabled={}",
                    bank.base, bank.size(), bank.enabled);
            },
            None => warn!(target: "TCM", "write {val:08x} to absent {kind:?} TCM region"),
        }
    }

    /// The enabled bank holding all of `[pa, pa+len)`, if any.
    pub fn claims(&self, pa: u64, len: usize) -> Option<TcmKind> {
        [TcmKind::Data, TcmKind::Instruction].into_iter()
            .find(|k| self.bank(*k).is_some_and(|b| b.contains(pa, len)))
    }

    /// Read from a bank, returning false when no bank holds the range.
    pub fn read_buf(&self, pa: u64, dst: &mut [u8]) -> bool {
        let Some(kind) = self.claims(pa, dst.len()) else { return false };
        let Some(bank) = self.bank(kind) else { return false };
        let off = bank.offset(pa);
        dst.copy_from_slice(&bank.data[off..off + dst.len()]);
        true
    }

    /// Write to a bank, returning false when no bank holds the range.
    pub fn write_buf(&mut self, pa: u64, src: &[u8]) -> bool {
        let Some(kind) = self.claims(pa, src.len()) else { return false };
        let Some(bank) = self.bank_mut(kind) else { return false };
        let off = bank.offset(pa);
        bank.data[off..off + src.len()].copy_from_slice(src);
        true
    }
}

impl fmt::Display for Tcm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in [TcmKind::Instruction, TcmKind::Data] {
            if let Some(b) = self.bank(kind) {
                writeln!(f, "  {kind:?} TCM: {:08x}-{:08x} {}", b.base,
                    b.base as u64 + b.size() as u64 - 1,
                    if b.enabled { "enabled" } else { "disabled" })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocate_and_route() {
        let mut tcm = Tcm::new(&VmConfig::arm1136jfs());
        assert_eq!(tcm.read_region(TcmKind::Data), 5 << 2);
        assert!(tcm.claims(0, 4).is_none());

        tcm.write_region(TcmKind::Data, 0x1000_0001);
        assert_eq!(tcm.read_region(TcmKind::Data), 0x1000_0000 | 5 << 2 | 1);
        assert_eq!(tcm.claims(0x1000_3ffc, 4), Some(TcmKind::Data));
        assert!(tcm.claims(0x1000_3ffe, 4).is_none());

        assert!(tcm.write_buf(0x1000_0010, &[1, 2, 3, 4]));
        let mut buf = [0u8; 2];
        assert!(tcm.read_buf(0x1000_0012, &mut buf));
        assert_eq!(buf, [3, 4]);
    }

    #[test]
    fn absent_bank() {
        let mut tcm = Tcm::new(&VmConfig::cortex_a8());
        tcm.write_region(TcmKind::Instruction, 0x1);
        assert_eq!(tcm.read_region(TcmKind::Instruction), 0);
    }
}
