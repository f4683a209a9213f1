//! The set of memory views managed for one core.
//!
//! Physical memory (and the TCMs layered over it) is reached through the
//! views kept here. A view maps ranges of virtual addresses onto physical
//! addresses with a set of rights; the translation machinery installs
//! aliases lazily as addresses are resolved, and tears them down whenever
//! the state they were derived from changes. An access that finds a live
//! alias with sufficient rights in its view needs no further work.
//!
//! There are four virtual views (code/data for privileged and user
//! accesses) and one view holding the FCSE remapping used while no
//! MMU/MPU translation is active.

use std::ops::Range;

use fxhash::FxHashMap;
use iset::IntervalMap;
use log::trace;

use crate::mmu::prim::*;

/// Identifies one of the views in a [DomainSet].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewId {
    /// Flat view used while translation is off (FCSE remapping only).
    Fcse,
    /// Translated view for one side and privilege level.
    Virt { side: Side, user: bool },
}
impl ViewId {
    pub const VIRT: [ViewId; 4] = [
        ViewId::Virt { side: Side::Code, user: false },
        ViewId::Virt { side: Side::Data, user: false },
        ViewId::Virt { side: Side::Code, user: true },
        ViewId::Virt { side: Side::Data, user: true },
    ];
    pub const ALL: [ViewId; 5] = [
        ViewId::Fcse,
        ViewId::VIRT[0], ViewId::VIRT[1], ViewId::VIRT[2], ViewId::VIRT[3],
    ];
    pub const PRIV: [ViewId; 2] = [ViewId::VIRT[0], ViewId::VIRT[1]];
    pub const USER: [ViewId; 2] = [ViewId::VIRT[2], ViewId::VIRT[3]];
    pub const CODE: [ViewId; 2] = [ViewId::VIRT[0], ViewId::VIRT[2]];
    pub const DATA: [ViewId; 2] = [ViewId::VIRT[1], ViewId::VIRT[3]];

    /// The virtual views holding aliases for one side.
    pub fn side(side: Side) -> &'static [ViewId] {
        match side {
            Side::Code => &ViewId::CODE,
            Side::Data => &ViewId::DATA,
        }
    }
}

/// An alias from a range of virtual addresses onto physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alias {
    /// Physical address of the first byte of the range.
    pub pa: u64,
    pub perm: Priv,
    /// ASID the alias belongs to, or `None` for a global alias.
    pub asid: Option<u8>,
}

/// A live alias, as returned by lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub lo: u32,
    pub hi: u32,
    pub pa: u64,
    pub perm: Priv,
    pub asid: Option<u8>,
}
impl Mapping {
    pub fn pa_of(&self, va: u32) -> u64 { self.pa + (va - self.lo) as u64 }
}

#[inline(always)]
fn key(lo: u32, hi: u32) -> Range<u64> { lo as u64..hi as u64 + 1 }

/// A single view: non-overlapping aliases keyed by virtual range.
struct View {
    map: IntervalMap<u64, Alias>,
}
impl Default for View {
    fn default() -> Self { View { map: IntervalMap::new() } }
}
impl View {
    /// Remove every alias overlapping `[lo, hi]`, keeping the parts of them
    /// which fall outside of it.
    fn unmap(&mut self, lo: u32, hi: u32) -> usize {
        let hits: Vec<(Range<u64>, Alias)> = self.map.iter(key(lo, hi))
            .map(|(r, a)| (r, *a))
            .collect();
        for (r, a) in hits.iter() {
            self.map.remove(r.clone());
            if r.start < lo as u64 {
                self.map.insert(r.start..lo as u64, *a);
            }
            if r.end > hi as u64 + 1 {
                let tail = hi as u64 + 1;
                self.map.insert(tail..r.end, Alias { pa: a.pa + (tail - r.start), ..*a });
            }
        }
        hits.len()
    }

    fn lookup(&self, va: u32) -> Option<Mapping> {
        self.map.iter(key(va, va)).next().map(|(r, a)| Mapping {
            lo: r.start as u32,
            hi: (r.end - 1) as u32,
            pa: a.pa,
            perm: a.perm,
            asid: a.asid,
        })
    }
}

/// The views of one core.
pub struct DomainSet {
    views: FxHashMap<ViewId, View>,
}
impl Default for DomainSet {
    fn default() -> Self { Self::new() }
}
impl DomainSet {
    pub fn new() -> Self {
        let mut views = FxHashMap::default();
        for id in ViewId::ALL {
            views.insert(id, View::default());
        }
        DomainSet { views }
    }

    fn view(&mut self, id: ViewId) -> &mut View {
        self.views.entry(id).or_default()
    }

    /// Alias `[lo, hi]` in view `id` onto physical memory at `pa`.
    ///
    /// Anything previously aliased in the range is replaced.
    pub fn alias(&mut self, id: ViewId, lo: u32, hi: u32, pa: u64, perm: Priv, asid: Option<u8>) {
        trace!(target: "DOM", "{id:?}: alias {lo:08x}-{hi:08x} -> {pa:010x} {perm:?} asid={asid:?}");
        let view = self.view(id);
        view.unmap(lo, hi);
        view.map.insert(key(lo, hi), Alias { pa, perm, asid });
    }

    /// Remove all aliases over `[lo, hi]` in view `id`.
    pub fn unmap(&mut self, id: ViewId, lo: u32, hi: u32) {
        let n = self.view(id).unmap(lo, hi);
        if n != 0 {
            trace!(target: "DOM", "{id:?}: unmapped {lo:08x}-{hi:08x} ({n} aliases)");
        }
    }

    /// Remove all aliases over `[lo, hi]` in each of `ids`.
    pub fn unmap_views(&mut self, ids: &[ViewId], lo: u32, hi: u32) {
        for id in ids {
            self.unmap(*id, lo, hi);
        }
    }

    /// Remove every alias in view `id`.
    pub fn clear(&mut self, id: ViewId) {
        self.views.insert(id, View::default());
    }

    /// Remove every alias in every view.
    pub fn clear_all(&mut self) {
        for id in ViewId::ALL {
            self.clear(id);
        }
    }

    /// Remove every alias that belongs to a particular ASID.
    pub fn unmap_non_global(&mut self) {
        for view in self.views.values_mut() {
            let hits: Vec<Range<u64>> = view.map.iter(..)
                .filter(|(_, a)| a.asid.is_some())
                .map(|(r, _)| r)
                .collect();
            for r in hits {
                view.map.remove(r);
            }
        }
    }

    /// The alias covering `va` in view `id`, if any.
    pub fn lookup(&self, id: ViewId, va: u32) -> Option<Mapping> {
        self.views.get(&id).and_then(|v| v.lookup(va))
    }

    /// Rights currently granted at `va` in view `id`.
    pub fn perm_at(&self, id: ViewId, va: u32) -> Priv {
        self.lookup(id, va).map_or(Priv::NONE, |m| m.perm)
    }

    /// Number of live aliases in view `id`.
    pub fn len(&self, id: ViewId) -> usize {
        self.views.get(&id).map_or(0, |v| v.map.len())
    }
}
