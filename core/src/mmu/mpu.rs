//! The memory protection unit.
//!
//! Regions are resolved fresh on every miss: the bank is scanned from the
//! lowest to the highest numbered region, and the highest numbered region
//! containing the address wins. Regions which overlap the winning window
//! without containing the address carve it down, so that an alias never
//! spans addresses where some other region would take priority.

use std::fmt;

use log::{debug, warn};

use crate::config::{Arch, VmConfig};
use crate::domain::ViewId;
use crate::mmu::{Mmu, Step, mk_fault, unmap_mva};
use crate::mmu::perm::mpu_rights;
use crate::mmu::prim::*;

/// One protection region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u32,
    /// log2 of the region size.
    pub size_log2: u32,
    pub enabled: bool,
    /// Subregion disable bits.
    pub srd: u8,
    /// Access permission code for data and instruction accesses.
    pub ap: [u8; 2],
    pub xn: bool,
    pub texcb: u8,
    pub shareable: bool,
}

impl Region {
    fn ap_idx(side: Side) -> usize {
        match side { Side::Data => 0, Side::Code => 1 }
    }
    pub fn ap_for(&self, side: Side) -> u8 { self.ap[Self::ap_idx(side)] }

    pub fn size(&self) -> u64 { 1u64 << self.size_log2.min(32) }

    /// First and last address covered.
    pub fn range(&self) -> (u32, u32) {
        (self.base, (self.base as u64 + self.size() - 1).min(u32::MAX as u64) as u32)
    }

    /// The region is enabled, large enough and aligned to its size.
    pub fn valid(&self, min_log2: u32) -> bool {
        self.enabled
            && self.size_log2 >= min_log2
            && self.size_log2 <= 32
            && (self.base as u64 % self.size()) == 0
    }

    pub fn contains(&self, mva: u32) -> bool {
        let (lo, hi) = self.range();
        lo <= mva && mva <= hi
    }

    fn has_subregions(&self) -> bool { self.size_log2 >= 8 }

    fn subregion(&self, mva: u32) -> u32 {
        ((mva - self.base) as u64 / (self.size() / 8)) as u32
    }

    /// The span resolution may alias around `mva` inside this region.
    fn span(&self, mva: u32) -> (u32, u32) {
        if self.srd == 0 || !self.has_subregions() {
            return self.range();
        }
        let sub = self.size() / 8;
        let lo = self.base as u64 + self.subregion(mva) as u64 * sub;
        (lo as u32, (lo + sub - 1) as u32)
    }

    fn subregion_disabled(&self, mva: u32) -> bool {
        self.has_subregions() && (self.srd >> self.subregion(mva)) & 1 != 0
    }

    /// Rights granted for every combination of side and privilege.
    fn all_rights(&self, arch: Arch) -> [Priv; 4] {
        let r = |side, user| mpu_rights(self.ap_for(side), self.xn, user, arch);
        [r(Side::Data, false), r(Side::Data, true), r(Side::Code, false), r(Side::Code, true)]
    }

    fn footprint(&self) -> (u32, u32, bool, u8) {
        (self.base, self.size_log2, self.enabled, self.srd)
    }

    /// Legacy region register: base [31:12], size [5:1], enable [0].
    pub fn encode_legacy(&self) -> u32 {
        (self.base & 0xffff_f000)
            | (self.size_log2.saturating_sub(1) & 0x1f) << 1
            | self.enabled as u32
    }

    /// Region size and enable register: subregions [15:8], size [5:1],
    /// enable [0].
    pub fn encode_size_enable(&self) -> u32 {
        (self.srd as u32) << 8
            | (self.size_log2.saturating_sub(1) & 0x1f) << 1
            | self.enabled as u32
    }

    /// Region access control register: XN [12], AP [10:8], TEX [5:3], S [2],
    /// C [1], B [0].
    pub fn encode_access(&self) -> u32 {
        let texcb = self.texcb as u32;
        (self.xn as u32) << 12
            | (self.ap[0] as u32 & 0b111) << 8
            | (texcb >> 2 & 0b111) << 3
            | (self.shareable as u32) << 2
            | (texcb & 0b11)
    }
}

/// Outcome of a region lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpuHit {
    /// The winning region, if any.
    pub region: Option<usize>,
    /// The window around the address over which the outcome holds.
    pub lo: u32,
    pub hi: u32,
}

pub struct Mpu {
    /// Either one unified bank, or instruction and data banks.
    banks: Vec<Vec<Region>>,
    /// Region number register.
    pub rgnr: u32,
    min_log2: u32,
}

impl Mpu {
    pub fn new(cfg: &VmConfig) -> Self {
        let bank = vec![Region::default(); cfg.mpu_regions as usize];
        let banks = match (cfg.mpu, cfg.unified_mpu) {
            (false, _) => Vec::new(),
            (true, true) => vec![bank],
            (true, false) => vec![bank.clone(), bank],
        };
        Mpu { banks, rgnr: 0, min_log2: cfg.mpu_min_size_log2() }
    }

    fn bank_idx(&self, side: Side) -> usize {
        match (self.banks.len(), side) {
            (2, Side::Data) => 1,
            _ => 0,
        }
    }

    pub fn bank(&self, side: Side) -> &[Region] {
        self.banks.get(self.bank_idx(side)).map_or(&[], |b| b.as_slice())
    }

    pub fn region(&self, side: Side, idx: usize) -> Option<&Region> {
        self.bank(side).get(idx)
    }

    /// Views which may hold aliases derived from the bank serving `side`.
    fn views(&self, side: Side) -> &'static [ViewId] {
        if self.banks.len() == 1 { &ViewId::VIRT } else { ViewId::side(side) }
    }

    /// Find the region governing `mva`.
    pub fn lookup(&self, side: Side, mva: u32) -> MpuHit {
        let mut hit = MpuHit { region: None, lo: 0, hi: u32::MAX };
        for (idx, r) in self.bank(side).iter().enumerate() {
            if !r.valid(self.min_log2) {
                continue;
            }
            let (lo, hi) = r.range();
            if hi < hit.lo || lo > hit.hi {
                continue;
            }
            if r.contains(mva) {
                let (lo, hi) = r.span(mva);
                if r.subregion_disabled(mva) {
                    hit.lo = hit.lo.max(lo);
                    hit.hi = hit.hi.min(hi);
                } else {
                    hit = MpuHit { region: Some(idx), lo, hi };
                }
            } else if hi < mva {
                hit.lo = hit.lo.max(hi + 1);
            } else {
                hit.hi = hit.hi.min(lo - 1);
            }
        }
        hit
    }
}

impl fmt::Display for Mpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: &[&str] = if self.banks.len() == 1 { &["Unified"] } else { &["Instruction", "Data"] };
        for (name, bank) in names.iter().zip(self.banks.iter()) {
            writeln!(f, "{name} MPU:")?;
            for (idx, r) in bank.iter().enumerate() {
                if !r.enabled {
                    continue;
                }
                let (lo, hi) = r.range();
                writeln!(f, "  R{idx:<2} {lo:08x}-{hi:08x} dap={:x} iap={:x}{}{} texcb={:05b}{}",
                    r.ap[0], r.ap[1],
                    if r.xn { " xn" } else { "" },
                    if r.srd != 0 { format!(" srd={:08b}", r.srd) } else { String::new() },
                    r.texcb,
                    if r.valid(self.min_log2) { "" } else { " (invalid)" })?;
            }
        }
        Ok(())
    }
}

impl Mmu {
    pub(crate) fn resolve_mpu(&mut self, va: u32, access: Priv, side: Side, user: bool,
        view: ViewId) -> Result<Step, Fault>
    {
        let pid = self.pid();
        let mva = fcse_mva(va, pid);
        let arch = self.cfg.arch;
        let hit = self.mpu.lookup(side, mva);

        let rights = match hit.region.and_then(|idx| self.mpu.region(side, idx)) {
            Some(r) => mpu_rights(r.ap_for(side), r.xn, user, arch),
            None if !user && arch >= Arch::V7 && self.regs.sctlr.background_region() => Priv::RWX,
            None => return Err(mk_fault(FaultStatus::Mpu, NO_DOMAIN, va, side, access)),
        };
        if !rights.contains(access) {
            return Err(mk_fault(FaultStatus::Mpu, NO_DOMAIN, va, side, access));
        }

        let (lo, hi) = fcse_clip(va, mva, hit.lo, hit.hi, pid);
        if !self.dma_active() {
            self.domains.alias(view, lo, hi, fcse_mva(lo, pid) as u64, rights, None);
        }
        Ok(Step { hi, pa: mva as u64 })
    }

    /// Apply `f` to a region, taking down any alias it may invalidate.
    ///
    /// A change of footprint unmaps both the old and the new footprint. A
    /// change of permissions unmaps the footprint unless every right granted
    /// before is still granted.
    fn edit_region(&mut self, side: Side, idx: usize, f: impl FnOnce(&mut Region)) {
        let Some(old) = self.mpu.region(side, idx).copied() else {
            warn!(target: "MPU", "write to region {idx} out of range");
            return;
        };
        let mut new = old;
        f(&mut new);
        if new == old {
            return;
        }

        let arch = self.cfg.arch;
        let min = self.mpu.min_log2;
        let views = self.mpu.views(side);
        let pid = self.pid();

        let mut stale = Vec::new();
        if old.footprint() != new.footprint() {
            stale.extend([old, new].into_iter().filter(|r| r.valid(min)).map(|r| r.range()));
        } else if old.valid(min) {
            let (was, now) = (old.all_rights(arch), new.all_rights(arch));
            if was.iter().zip(now.iter()).any(|(was, now)| !now.contains(*was)) {
                stale.push(old.range());
            }
        }
        for (lo, hi) in stale {
            unmap_mva(&mut self.domains, views, pid, lo, hi);
        }

        if new.enabled && !new.valid(min) {
            warn!(target: "MPU", "region {idx} base={:08x} size=2^{} rejected (minimum 2^{min}, base must be size-aligned)",
                new.base, new.size_log2);
        }
        debug!(target: "MPU", "region {idx}: {old:?} -> {new:?}");

        let b = self.mpu.bank_idx(side);
        self.mpu.banks[b][idx] = new;
    }

    fn num_regions(&self, side: Side) -> usize {
        self.mpu.bank(side).len()
    }

    /// Read a legacy region register (c6, cN).
    pub fn read_mpu_region_legacy(&self, side: Side, idx: usize) -> u32 {
        match self.mpu.region(side, idx) {
            Some(r) => r.encode_legacy(),
            None => {
                warn!(target: "MPU", "read from region {idx} out of range");
                0
            },
        }
    }

    /// Write a legacy region register (c6, cN).
    pub fn write_mpu_region_legacy(&mut self, side: Side, idx: usize, val: u32) {
        self.edit_region(side, idx, |r| {
            r.base = val & 0xffff_f000;
            r.size_log2 = ((val >> 1) & 0x1f) + 1;
            r.enabled = (val & 1) != 0;
        });
    }

    fn read_ap_packed(&self, side: Side, bits: u32) -> u32 {
        let mask = (1u32 << bits) - 1;
        self.mpu.bank(side).iter().take((32 / bits) as usize).enumerate()
            .fold(0, |acc, (idx, r)| acc | (r.ap_for(side) as u32 & mask) << (idx as u32 * bits))
    }

    fn write_ap_packed(&mut self, side: Side, bits: u32, val: u32) {
        let mask = (1u32 << bits) - 1;
        let count = self.num_regions(side).min((32 / bits) as usize);
        for idx in 0..count {
            let ap = ((val >> (idx as u32 * bits)) & mask) as u8;
            self.edit_region(side, idx, |r| r.ap[Region::ap_idx(side)] = ap);
        }
    }

    /// Read the legacy access permission register (two bits per region).
    pub fn read_mpu_ap_legacy(&self, side: Side) -> u32 {
        self.read_ap_packed(side, 2)
    }
    /// Write the legacy access permission register (two bits per region).
    pub fn write_mpu_ap_legacy(&mut self, side: Side, val: u32) {
        self.write_ap_packed(side, 2, val)
    }

    /// Read the extended access permission register (four bits per region).
    pub fn read_mpu_ap_extended(&self, side: Side) -> u32 {
        self.read_ap_packed(side, 4)
    }
    /// Write the extended access permission register (four bits per region).
    pub fn write_mpu_ap_extended(&mut self, side: Side, val: u32) {
        self.write_ap_packed(side, 4, val)
    }

    /// Select the region accessed through the base, size/enable and access
    /// registers.
    pub fn write_mpu_rgnr(&mut self, val: u32) {
        if val as usize >= self.num_regions(Side::Data).max(self.num_regions(Side::Code)) {
            warn!(target: "MPU", "region number {val} out of range");
        }
        self.mpu.rgnr = val;
    }
    pub fn read_mpu_rgnr(&self) -> u32 { self.mpu.rgnr }

    fn selected(&self, side: Side) -> Option<&Region> {
        let r = self.mpu.region(side, self.mpu.rgnr as usize);
        if r.is_none() {
            warn!(target: "MPU", "read from region {} out of range", self.mpu.rgnr);
        }
        r
    }

    pub fn read_mpu_base(&self, side: Side) -> u32 {
        self.selected(side).map_or(0, |r| r.base)
    }
    pub fn write_mpu_base(&mut self, side: Side, val: u32) {
        let idx = self.mpu.rgnr as usize;
        self.edit_region(side, idx, |r| r.base = val & 0xffff_ffe0);
    }

    pub fn read_mpu_size_enable(&self, side: Side) -> u32 {
        self.selected(side).map_or(0, |r| r.encode_size_enable())
    }
    pub fn write_mpu_size_enable(&mut self, side: Side, val: u32) {
        let idx = self.mpu.rgnr as usize;
        self.edit_region(side, idx, |r| {
            r.enabled = (val & 1) != 0;
            r.size_log2 = ((val >> 1) & 0x1f) + 1;
            r.srd = (val >> 8) as u8;
        });
    }

    pub fn read_mpu_access(&self, side: Side) -> u32 {
        self.selected(side).map_or(0, |r| r.encode_access())
    }
    pub fn write_mpu_access(&mut self, side: Side, val: u32) {
        let idx = self.mpu.rgnr as usize;
        self.edit_region(side, idx, |r| {
            let ap = ((val >> 8) & 0b111) as u8;
            r.ap = [ap, ap];
            r.xn = (val & (1 << 12)) != 0;
            r.shareable = (val & (1 << 2)) != 0;
            r.texcb = (((val >> 3) & 0b111) << 2 | (val & 0b11)) as u8;
        });
    }
}
