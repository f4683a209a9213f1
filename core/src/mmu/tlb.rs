//! The TLB: a cache of normalized translations.
//!
//! Ordinary entries live in an arena addressed by index. Free slots are
//! kept on a stack, and the range index maps virtual ranges onto arena
//! indices. Lockdown entries are a separate fixed array which is managed
//! explicitly by software through the lockdown registers.
//!
//! Whenever an entry which may have a live alias is dropped or rewritten,
//! the caller-provided `unmap` callback is invoked with it so that the
//! alias can be torn down before anything else changes.

use std::fmt;
use std::ops::Range;

use iset::IntervalMap;
use log::{debug, trace};

use crate::mmu::entry::*;
use crate::mmu::regs::*;

/// Selects which entries an invalidation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalMode {
    /// Every entry, regardless of ASID.
    All,
    /// Every entry outside of the lockdown partition, regardless of ASID.
    Unlocked,
    /// Non-global entries tagged with this ASID.
    Asid(u8),
    /// Global entries and entries tagged with this ASID.
    AsidOrGlobal(u8),
}
impl InvalMode {
    fn matches(&self, e: &TlbEntry) -> bool {
        match self {
            InvalMode::All | InvalMode::Unlocked => true,
            InvalMode::Asid(asid) => !e.global && e.asid == *asid,
            InvalMode::AsidOrGlobal(asid) => e.global || e.asid == *asid,
        }
    }
}

/// Refers to an entry held by a [Tlb].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef {
    Cached(usize),
    Locked(usize),
}

#[inline(always)]
fn key(lo: u32, hi: u32) -> Range<u64> { lo as u64..hi as u64 + 1 }

pub struct Tlb {
    /// Arena holding every ordinary entry ever allocated.
    arena: Vec<TlbEntry>,
    /// Arena indices of evicted entries.
    free: Vec<usize>,
    /// Live arena indices keyed by virtual range.
    index: IntervalMap<u64, Vec<usize>>,

    /// The lockdown partition.
    locked: Vec<TlbEntry>,
    /// Last virtual address written for each lockdown slot.
    lock_va: Vec<u32>,
    /// Lockdown control register state.
    pub lockdown: LockdownReg,
    /// Writable width of the lockdown base/victim fields.
    width: u32,
    /// Lockdown slot selected for direct entry access.
    pub sel: usize,
}

impl Tlb {
    pub fn new(lockdown_entries: u32) -> Self {
        Tlb {
            arena: Vec::new(),
            free: Vec::new(),
            index: IntervalMap::new(),
            locked: vec![TlbEntry::default(); lockdown_entries as usize],
            lock_va: vec![0; lockdown_entries as usize],
            lockdown: LockdownReg::default(),
            width: LockdownReg::width(lockdown_entries),
            sel: 0,
        }
    }

    pub fn get(&self, r: EntryRef) -> &TlbEntry {
        match r {
            EntryRef::Cached(idx) => &self.arena[idx],
            EntryRef::Locked(idx) => &self.locked[idx],
        }
    }
    pub fn get_mut(&mut self, r: EntryRef) -> &mut TlbEntry {
        match r {
            EntryRef::Cached(idx) => &mut self.arena[idx],
            EntryRef::Locked(idx) => &mut self.locked[idx],
        }
    }

    /// Number of live entries outside of the lockdown partition.
    pub fn cached_len(&self) -> usize { self.arena.len() - self.free.len() }
    pub fn lockdown_len(&self) -> usize { self.locked.len() }

    fn index_add(&mut self, idx: usize) {
        let e = &self.arena[idx];
        let k = key(e.low_va, e.high_va);
        let mut ids = self.index.remove(k.clone()).unwrap_or_default();
        ids.push(idx);
        self.index.insert(k, ids);
    }

    fn index_del(&mut self, idx: usize) {
        let e = &self.arena[idx];
        let k = key(e.low_va, e.high_va);
        if let Some(mut ids) = self.index.remove(k.clone()) {
            ids.retain(|x| *x != idx);
            if !ids.is_empty() {
                self.index.insert(k, ids);
            }
        }
    }

    /// Arena indices of live entries overlapping `[lo, hi]`.
    fn overlapping(&self, lo: u32, hi: u32) -> Vec<usize> {
        self.index.iter(key(lo, hi))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Return an arena entry to the free stack.
    fn release(&mut self, idx: usize, unmap: &mut dyn FnMut(&TlbEntry)) {
        self.index_del(idx);
        let e = &mut self.arena[idx];
        if e.is_mapped {
            unmap(&*e);
            e.is_mapped = false;
        }
        trace!(target: "TLB", "evict {e}");
        self.free.push(idx);
    }

    /// Find the entry translating `mva` under `asid`.
    ///
    /// Valid lockdown entries take precedence over ordinary ones.
    pub fn lookup(&self, mva: u32, asid: u8) -> Option<EntryRef> {
        if let Some(idx) = self.locked.iter().position(|e| {
            e.lockdown_valid && e.contains(mva) && e.matches_asid(asid)
        }) {
            return Some(EntryRef::Locked(idx));
        }
        self.index.iter(key(mva, mva))
            .flat_map(|(_, ids)| ids.iter().copied())
            .find(|idx| self.arena[*idx].matches_asid(asid))
            .map(EntryRef::Cached)
    }

    /// Drop ordinary entries overlapping `e` which could match the same
    /// lookups, and take down the aliases of any other overlapping entry.
    fn resolve_overlap(&mut self, e: &TlbEntry, skip: Option<EntryRef>,
        unmap: &mut dyn FnMut(&TlbEntry))
    {
        for idx in self.overlapping(e.low_va, e.high_va) {
            if skip == Some(EntryRef::Cached(idx)) {
                continue;
            }
            if self.arena[idx].conflicts(e) {
                self.release(idx, unmap);
            } else if self.arena[idx].is_mapped {
                unmap(&self.arena[idx]);
                self.arena[idx].is_mapped = false;
            }
        }
        for (idx, other) in self.locked.iter_mut().enumerate() {
            if skip == Some(EntryRef::Locked(idx)) {
                continue;
            }
            if other.lockdown_valid && other.is_mapped
                && other.overlaps(e.low_va, e.high_va)
            {
                unmap(&*other);
                other.is_mapped = false;
            }
        }
    }

    /// Insert a freshly walked entry.
    ///
    /// When the lockdown preserve bit is set, the entry is written to the
    /// current victim slot in the lockdown partition and the victim moves on.
    pub fn insert(&mut self, mut e: TlbEntry, unmap: &mut dyn FnMut(&TlbEntry)) -> EntryRef {
        e.is_mapped = false;
        self.resolve_overlap(&e, None, unmap);

        if self.lockdown.preserve && !self.locked.is_empty() {
            let slot = self.lockdown.victim as usize % self.locked.len();
            let old = &mut self.locked[slot];
            if old.lockdown_valid && old.is_mapped {
                unmap(&*old);
            }
            e.lockdown_valid = true;
            *old = e;
            debug!(target: "TLB", "lockdown fill [{slot}] {e}");
            self.lock_va[slot] = e.low_va;

            let next = self.lockdown.victim + 1;
            self.lockdown.victim = if next as usize >= self.locked.len() {
                self.lockdown.base
            } else {
                next
            };
            return EntryRef::Locked(slot);
        }

        e.lockdown_valid = false;
        let idx = match self.free.pop() {
            Some(idx) => { self.arena[idx] = e; idx },
            None => { self.arena.push(e); self.arena.len() - 1 },
        };
        self.index_add(idx);
        trace!(target: "TLB", "fill {e}");
        EntryRef::Cached(idx)
    }

    /// Invalidate entries overlapping `[lo, hi]` selected by `mode`.
    ///
    /// Lockdown entries are never freed or made invalid by this. Under
    /// [InvalMode::Unlocked] they are left alone entirely, otherwise only
    /// their aliases are taken down.
    pub fn invalidate(&mut self, lo: u32, hi: u32, mode: InvalMode,
        unmap: &mut dyn FnMut(&TlbEntry)) -> usize
    {
        let mut count = 0;
        for idx in self.overlapping(lo, hi) {
            if mode.matches(&self.arena[idx]) {
                self.release(idx, unmap);
                count += 1;
            }
        }
        if mode != InvalMode::Unlocked {
            for e in self.locked.iter_mut() {
                if e.lockdown_valid && e.is_mapped && e.overlaps(lo, hi) && mode.matches(e) {
                    unmap(&*e);
                    e.is_mapped = false;
                }
            }
        }
        if count != 0 {
            debug!(target: "TLB", "invalidate {lo:08x}-{hi:08x} {mode:?}: {count} entries");
        }
        count
    }

    /// Read the lockdown control register.
    pub fn read_lockdown(&self) -> u32 {
        self.lockdown.encode(self.width)
    }

    /// Write the lockdown control register.
    pub fn write_lockdown(&mut self, val: u32) {
        let mut reg = LockdownReg::decode(val, self.width);
        let cap = self.locked.len().max(1) as u32;
        reg.base %= cap;
        reg.victim %= cap;
        self.lockdown = reg;
    }

    /// Select the lockdown slot for direct entry accesses.
    pub fn select(&mut self, val: u32) {
        self.sel = if self.locked.is_empty() { 0 } else { val as usize % self.locked.len() };
    }

    /// Virtual address last written to the selected lockdown slot.
    pub fn selected_va(&self) -> u32 {
        self.lock_va.get(self.sel).copied().unwrap_or(0)
    }
    pub fn set_selected_va(&mut self, va: u32) {
        if let Some(slot) = self.lock_va.get_mut(self.sel) {
            *slot = va;
        }
    }

    /// The selected lockdown slot, if the partition exists.
    pub fn selected(&self) -> Option<&TlbEntry> {
        self.locked.get(self.sel)
    }

    /// Rewrite the selected lockdown slot through `f`.
    ///
    /// A live alias of the old contents is taken down before the entry
    /// changes, and overlapping ordinary entries are dropped once the new
    /// contents are valid.
    pub fn update_selected(&mut self, unmap: &mut dyn FnMut(&TlbEntry),
        f: impl FnOnce(&mut TlbEntry))
    {
        let slot = self.sel;
        let Some(e) = self.locked.get_mut(slot) else { return };
        if e.is_mapped {
            unmap(&*e);
            e.is_mapped = false;
        }
        f(e);
        let e = *e;
        if e.lockdown_valid {
            self.resolve_overlap(&e, Some(EntryRef::Locked(slot)), unmap);
            debug!(target: "TLB", "lockdown write [{slot}] {e}");
        }
    }

    pub fn locked_entries(&self) -> impl Iterator<Item = &TlbEntry> {
        self.locked.iter()
    }

    pub fn cached_entries(&self) -> impl Iterator<Item = &TlbEntry> {
        self.index.iter(..).flat_map(|(_, ids)| ids.iter().map(|idx| &self.arena[*idx]))
    }
}

impl fmt::Display for Tlb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  lockdown base={} victim={} preserve={}",
            self.lockdown.base, self.lockdown.victim, self.lockdown.preserve)?;
        for (idx, e) in self.locked.iter().enumerate() {
            if e.lockdown_valid {
                writeln!(f, "  L{idx:<3} {e}")?;
            }
        }
        for e in self.cached_entries() {
            writeln!(f, "       {e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(va: u32, pa: u64, asid: Option<u8>) -> TlbEntry {
        let mut e = TlbEntry::new(EntryKind::SmallPage, va, pa);
        if let Some(asid) = asid {
            e.global = false;
            e.asid = asid;
        }
        e
    }

    fn nop(_: &TlbEntry) {}

    #[test]
    fn asid_isolation() {
        let mut tlb = Tlb::new(0);
        let a = tlb.insert(page(0x1000, 0xa000, Some(1)), &mut nop);
        let b = tlb.insert(page(0x1000, 0xb000, Some(2)), &mut nop);
        assert_eq!(tlb.lookup(0x1004, 1), Some(a));
        assert_eq!(tlb.lookup(0x1004, 2), Some(b));
        assert_eq!(tlb.lookup(0x1004, 3), None);

        // A global entry replaces both and matches any ASID.
        let g = tlb.insert(page(0x1000, 0xc000, None), &mut nop);
        assert_eq!(tlb.cached_len(), 1);
        assert_eq!(tlb.lookup(0x1004, 3), Some(g));
    }

    #[test]
    fn invalidate_modes() {
        let mut tlb = Tlb::new(0);
        tlb.insert(page(0x1000, 0, Some(1)), &mut nop);
        tlb.insert(page(0x2000, 0, Some(2)), &mut nop);
        tlb.insert(page(0x3000, 0, None), &mut nop);

        assert_eq!(tlb.invalidate(0, u32::MAX, InvalMode::Asid(1), &mut nop), 1);
        assert!(tlb.lookup(0x1000, 1).is_none());
        assert!(tlb.lookup(0x3000, 1).is_some());

        assert_eq!(tlb.invalidate(0x3000, 0x3fff, InvalMode::AsidOrGlobal(7), &mut nop), 1);
        assert!(tlb.lookup(0x3000, 7).is_none());
        assert_eq!(tlb.cached_len(), 1);
    }

    #[test]
    fn free_slots_are_reused() {
        let mut tlb = Tlb::new(0);
        tlb.insert(page(0x1000, 0, None), &mut nop);
        tlb.invalidate(0, u32::MAX, InvalMode::All, &mut nop);
        assert_eq!(tlb.cached_len(), 0);
        tlb.insert(page(0x5000, 0, None), &mut nop);
        assert_eq!(tlb.arena.len(), 1);
    }

    #[test]
    fn lockdown_fill_and_survival() {
        let mut tlb = Tlb::new(4);
        tlb.write_lockdown(LockdownReg { base: 1, victim: 3, preserve: true }.encode(2));
        let r = tlb.insert(page(0x8000, 0x8000, None), &mut nop);
        assert_eq!(r, EntryRef::Locked(3));
        // The victim wraps back to the base.
        assert_eq!(tlb.lockdown.victim, 1);

        tlb.write_lockdown(0);
        tlb.get_mut(r).is_mapped = true;
        let mut unmapped = 0;
        tlb.invalidate(0, u32::MAX, InvalMode::All, &mut |_: &TlbEntry| unmapped += 1);
        assert_eq!(unmapped, 1);
        assert_eq!(tlb.lookup(0x8000, 0), Some(r));

        // Single-entry invalidation never touches the lockdown partition.
        tlb.get_mut(r).is_mapped = true;
        tlb.invalidate(0x8000, 0x8fff, InvalMode::Unlocked, &mut |_: &TlbEntry| unmapped += 1);
        assert_eq!(unmapped, 1);
        assert!(tlb.get(r).is_mapped);
    }

    #[test]
    fn lockdown_rewrite_unmaps_first() {
        let mut tlb = Tlb::new(2);
        tlb.select(1);
        tlb.update_selected(&mut nop, |e| {
            *e = page(0x4000, 0x4000, None);
            e.lockdown_valid = true;
        });
        tlb.get_mut(EntryRef::Locked(1)).is_mapped = true;

        let mut seen = Vec::new();
        tlb.update_selected(&mut |e: &TlbEntry| seen.push((e.low_va, e.high_va)), |e| {
            e.low_va = 0x9000;
            e.high_va = 0x9fff;
        });
        assert_eq!(seen, vec![(0x4000, 0x4fff)]);
        assert!(tlb.lookup(0x4000, 0).is_none());
        assert!(tlb.lookup(0x9000, 0).is_some());
    }
}
