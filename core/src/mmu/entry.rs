//! Normalized TLB entries.

use std::fmt;

use crate::mmu::prim::*;

/// The translation unit an entry was decoded from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    #[default]
    Section,
    SuperSection,
    LargePage,
    SmallPage,
    TinyPage,
}
impl EntryKind {
    pub fn size(&self) -> u64 {
        match self {
            EntryKind::SuperSection => 0x100_0000,
            EntryKind::Section => 0x10_0000,
            EntryKind::LargePage => 0x1_0000,
            EntryKind::SmallPage => 0x1000,
            EntryKind::TinyPage => 0x400,
        }
    }
    /// Sections use the section flavour of the fault status codes.
    pub fn is_page(&self) -> bool {
        !matches!(self, EntryKind::Section | EntryKind::SuperSection)
    }
}

/// A cached translation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// First modified virtual address covered.
    pub low_va: u32,
    /// Last modified virtual address covered (inclusive).
    pub high_va: u32,
    /// Physical address of `low_va`.
    pub low_pa: u64,

    pub asid: u8,
    pub global: bool,
    pub domain: u8,

    /// APX:AP for each quarter of the entry.
    pub ap: [u8; 4],
    /// TEX:C:B packed into five bits.
    pub texcb: u8,
    pub shareable: bool,
    pub xn: bool,
    pub ns: bool,
    pub kind: EntryKind,

    /// Decoded from the ARMv6 table layout.
    pub v6_format: bool,
    /// SCTLR.S and SCTLR.R at the time the entry was filled.
    pub sctlr_s: bool,
    pub sctlr_r: bool,

    /// Lockdown slot holds a valid translation.
    pub lockdown_valid: bool,
    /// A view alias derived from this entry may be live.
    pub is_mapped: bool,
}

impl TlbEntry {
    /// Build an entry of `kind` covering `mva`, mapping to `pa_base`.
    pub fn new(kind: EntryKind, mva: u32, pa_base: u64) -> Self {
        let size = kind.size();
        let low_va = (mva as u64 & !(size - 1)) as u32;
        TlbEntry {
            low_va,
            high_va: (low_va as u64 + size - 1) as u32,
            low_pa: pa_base & !(size - 1),
            global: true,
            kind,
            ..Default::default()
        }
    }

    pub fn size(&self) -> u64 { self.high_va as u64 - self.low_va as u64 + 1 }

    pub fn contains(&self, mva: u32) -> bool {
        self.low_va <= mva && mva <= self.high_va
    }

    pub fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.low_va <= hi && lo <= self.high_va
    }

    /// True when the entry may be used under `asid`.
    #[inline(always)]
    pub fn matches_asid(&self, asid: u8) -> bool {
        self.global || self.asid == asid
    }

    /// True when two entries could both match the same lookup.
    pub fn conflicts(&self, other: &TlbEntry) -> bool {
        self.global || other.global || self.asid == other.asid
    }

    /// Set every subpage to the same permission.
    pub fn set_ap(&mut self, ap: u8) { self.ap = [ap; 4]; }

    /// All subpages carry the same permission.
    pub fn uniform(&self) -> bool {
        self.ap.iter().all(|x| *x == self.ap[0])
    }

    fn subpage_size(&self) -> u64 { self.size() / 4 }

    fn subpage_idx(&self, mva: u32) -> usize {
        ((mva as u64 - self.low_va as u64) / self.subpage_size()) as usize & 3
    }

    /// The permission code in effect at `mva`.
    pub fn ap_at(&self, mva: u32) -> u8 {
        self.ap[self.subpage_idx(mva)]
    }

    /// The largest range around `mva` with uniform permissions.
    pub fn perm_range(&self, mva: u32) -> (u32, u32) {
        if self.uniform() {
            return (self.low_va, self.high_va);
        }
        let sub = self.subpage_size();
        let lo = self.low_va as u64 + self.subpage_idx(mva) as u64 * sub;
        (lo as u32, (lo + sub - 1) as u32)
    }

    #[inline(always)]
    pub fn pa_of(&self, mva: u32) -> u64 {
        self.low_pa + (mva - self.low_va) as u64
    }

    /// Fault status to report for a fault of the given class on this entry.
    pub fn fault_status(&self, class: FaultClass) -> FaultStatus {
        let page = self.kind.is_page();
        match (class, page) {
            (FaultClass::Domain, false) => FaultStatus::DomainSection,
            (FaultClass::Domain, true) => FaultStatus::DomainPage,
            (FaultClass::Permission, false) => FaultStatus::PermissionSection,
            (FaultClass::Permission, true) => FaultStatus::PermissionPage,
        }
    }
}

/// Faults raised after a successful walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass { Domain, Permission }

impl fmt::Display for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pa_hi = self.low_pa + self.size() - 1;
        write!(f, "VA {:08x}-{:08x} PA {:010x}-{:010x} {:?} dom={:2} ap=",
            self.low_va, self.high_va, self.low_pa, pa_hi, self.kind, self.domain)?;
        if self.uniform() {
            write!(f, "{}", self.ap[0])?;
        } else {
            write!(f, "{}/{}/{}/{}", self.ap[0], self.ap[1], self.ap[2], self.ap[3])?;
        }
        write!(f, " texcb={:05b}{}{}", self.texcb,
            if self.xn { " xn" } else { "" },
            if self.shareable { " s" } else { "" })?;
        if self.global {
            write!(f, " global")
        } else {
            write!(f, " asid={}", self.asid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpages() {
        let mut e = TlbEntry::new(EntryKind::LargePage, 0x1234_5678, 0x8000_0000);
        assert_eq!((e.low_va, e.high_va), (0x1234_0000, 0x1234_ffff));
        assert!(e.uniform());
        assert_eq!(e.perm_range(0x1234_5678), (0x1234_0000, 0x1234_ffff));

        e.ap = [3, 1, 1, 1];
        assert!(!e.uniform());
        assert_eq!(e.ap_at(0x1234_3fff), 3);
        assert_eq!(e.ap_at(0x1234_4000), 1);
        assert_eq!(e.perm_range(0x1234_5678), (0x1234_4000, 0x1234_7fff));
        assert_eq!(e.pa_of(0x1234_5678), 0x8000_5678);
    }

    #[test]
    fn asid_matching() {
        let mut a = TlbEntry::new(EntryKind::SmallPage, 0x1000, 0);
        a.global = false;
        a.asid = 1;
        let mut b = a;
        b.asid = 2;
        assert!(a.matches_asid(1) && !a.matches_asid(2));
        assert!(!a.conflicts(&b));
        b.global = true;
        assert!(a.conflicts(&b));
    }
}
