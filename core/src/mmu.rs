//! Implementation of the memory-management unit.
//!
//! [Mmu::resolve] is the entry point for every access made by the core or
//! by the DMA engine. It first consults the active view of the
//! [DomainSet]; when no alias grants the access there, the slow path goes
//! through the TLB (walking the translation tables on a miss), the MPU, or
//! the flat FCSE mapping, and installs an alias for whatever it resolved.

pub mod prim;
pub mod regs;
pub mod entry;
pub mod desc;
pub mod perm;
pub mod tlb;
pub mod walk;
pub mod mpu;
pub mod control;

use std::fmt;
use std::sync::Arc;

use anyhow::bail;
use log::debug;
use parking_lot::RwLock;

use crate::config::*;
use crate::cpu::CoreState;
use crate::dev::dma::DmaEngine;
use crate::domain::*;
use crate::mem::PhysMemory;
use crate::mem::prim::*;
use crate::tcm::Tcm;

use crate::mmu::entry::*;
use crate::mmu::mpu::Mpu;
use crate::mmu::perm::*;
use crate::mmu::prim::*;
use crate::mmu::regs::*;
use crate::mmu::tlb::*;

/// Coprocessor registers owned by the memory subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmuRegs {
    pub sctlr: ControlReg,
    pub ttbr0: u32,
    pub ttbr1: u32,
    pub ttbcr: TtbcrReg,
    pub dacr: DacrReg,
    pub contextidr: ContextIdReg,
    pub fcse: FcsePidReg,
    /// Result of the last VA to PA operation.
    pub par: u32,
}

/// Replaces the processor context for accesses not made on behalf of the
/// current instruction stream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessCtx {
    pub user: bool,
    pub asid: Option<u8>,
    /// The access is made by the DMA engine.
    pub dma: bool,
}

/// One resolved piece of an access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Step {
    /// Last virtual address covered by the mapping.
    pub hi: u32,
    /// Physical address of the virtual address being resolved.
    pub pa: u64,
}

pub(crate) fn mk_fault(status: FaultStatus, domain: u8, va: u32, side: Side, access: Priv) -> Fault {
    Fault { status, domain, va, side, write: access.write() }
}

/// Remove the aliases of the modified virtual range `[lo, hi]` from
/// `views`, including the low-window twin the FCSE maps onto it.
pub(crate) fn unmap_mva(domains: &mut DomainSet, views: &[ViewId], pid: u32, lo: u32, hi: u32) {
    domains.unmap_views(views, lo, hi);
    let base = pid & FcsePidReg::MASK;
    if base != 0 {
        let top = base | (FCSE_WINDOW - 1);
        if lo <= top && hi >= base {
            domains.unmap_views(views, lo.max(base) - base, hi.min(top) - base);
        }
    }
}

/// Views holding the aliases of a page-id set.
pub(crate) fn set_views(set: PageSet) -> &'static [ViewId] {
    match set {
        PageSet::Physical => &[ViewId::Fcse],
        PageSet::VirtPriv => &ViewId::PRIV,
        PageSet::VirtUser => &ViewId::USER,
    }
}

/// The memory subsystem of one core.
pub struct Mmu {
    pub cfg: VmConfig,
    pub regs: MmuRegs,
    /// Flat physical memory, shared between cores.
    pub mem: Arc<RwLock<PhysMemory>>,
    pub domains: DomainSet,
    pub tcm: Tcm,
    pub dma: DmaEngine,

    /// Either a single unified TLB, or instruction and data TLBs.
    pub(crate) tlbs: Vec<Tlb>,
    pub(crate) mpu: Mpu,
    tracker: DomainTracker,
    pub(crate) ctx: Option<AccessCtx>,
}

impl Mmu {
    pub fn new(cfg: VmConfig, mem: Arc<RwLock<PhysMemory>>) -> Self {
        let num_tlbs = match (cfg.mmu, cfg.unified_tlb) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => 2,
        };
        let regs = MmuRegs {
            sctlr: ControlReg::for_arch(0, cfg.arch),
            ..Default::default()
        };
        debug!(target: "MMU", "new {cfg}");
        Mmu {
            tlbs: (0..num_tlbs).map(|_| Tlb::new(cfg.lockdown_entries)).collect(),
            mpu: Mpu::new(&cfg),
            tcm: Tcm::new(&cfg),
            dma: DmaEngine::new(cfg.dma_channels),
            domains: DomainSet::new(),
            tracker: DomainTracker::new(regs.dacr),
            ctx: None,
            regs,
            mem,
            cfg,
        }
    }

    /// Translation (MMU or MPU) is present and enabled.
    pub fn translation_on(&self) -> bool {
        (self.cfg.mmu || self.cfg.mpu) && self.regs.sctlr.mmu_enabled()
    }

    pub(crate) fn dma_active(&self) -> bool {
        self.ctx.is_some_and(|c| c.dma)
    }

    /// The FCSE process id in effect, in its shifted position.
    pub fn pid(&self) -> u32 {
        if self.cfg.fcse { self.regs.fcse.base() } else { 0 }
    }

    /// The ASID in effect for lookups and fills.
    pub fn asid(&self) -> u8 {
        self.ctx.and_then(|c| c.asid).unwrap_or(self.regs.contextidr.asid())
    }

    /// Apply the FCSE remap to `va`.
    pub fn mva(&self, va: u32) -> u32 {
        fcse_mva(va, self.pid())
    }

    pub(crate) fn effective_user(&self, core: &dyn CoreState, side: Side) -> bool {
        match self.ctx {
            Some(ctx) => ctx.user,
            None => !core.is_privileged() || (side == Side::Data && core.user_redirect()),
        }
    }

    pub(crate) fn page_set(&self, user: bool) -> PageSet {
        match (self.translation_on(), user) {
            (false, _) => PageSet::Physical,
            (true, false) => PageSet::VirtPriv,
            (true, true) => PageSet::VirtUser,
        }
    }

    fn view_for(&self, side: Side, user: bool) -> ViewId {
        if self.translation_on() { ViewId::Virt { side, user } } else { ViewId::Fcse }
    }

    /// Make `set` current under the present DACR, discarding its aliases
    /// if any domain may have lost a right since it was last active.
    pub(crate) fn sync_domains(&mut self, set: PageSet) {
        if self.tracker.sync(set, self.regs.dacr) && self.cfg.mmu && set != PageSet::Physical {
            debug!(target: "DOM", "DACR {:08x} downgrade, unmapping {set:?}", self.regs.dacr.0);
            for view in set_views(set) {
                self.domains.clear(*view);
            }
        }
    }

    pub(crate) fn tlb_idx(&self, side: Side) -> usize {
        match (self.tlbs.len(), side) {
            (1, _) | (_, Side::Code) => 0,
            (_, Side::Data) => 1,
        }
    }

    /// Views which may hold aliases derived from the TLB serving `side`.
    pub(crate) fn tlb_views(&self, side: Side) -> &'static [ViewId] {
        if self.tlbs.len() == 1 { &ViewId::VIRT } else { ViewId::side(side) }
    }

    /// TLBs (with the views their aliases live in) covered by `target`.
    pub(crate) fn tlb_targets(&self, target: Target) -> Vec<(usize, &'static [ViewId])> {
        if self.tlbs.len() == 1 {
            return vec![(0, self.tlb_views(Side::Data))];
        }
        [Side::Code, Side::Data].into_iter()
            .filter(|s| self.tlbs.len() == 2 && target.covers(*s))
            .map(|s| (self.tlb_idx(s), self.tlb_views(s)))
            .collect()
    }

    /// Validate an access, returning the physical address of its first byte.
    ///
    /// Every byte of the access is validated. A fault is delivered to the
    /// core unless the request is speculative or the DMA engine made it.
    pub fn resolve(&mut self, core: &mut dyn CoreState, req: AccessReq) -> Verdict {
        let side = req.side();
        let user = self.effective_user(core, side);
        let set = self.page_set(user);
        self.sync_domains(set);
        let view = self.view_for(side, user);

        let bytes = req.bytes.max(1);
        if let Some(fault) = self.check_alignment(req.va, bytes, side, req.access) {
            return self.deliver(core, req, fault);
        }

        let last = req.va.saturating_add(bytes - 1);
        let mut va = req.va;
        let mut first = None;
        let mut bad = false;
        loop {
            let step = match self.resolve_step(va, req.access, side, user, view) {
                Ok(step) => step,
                Err(fault) => return self.deliver(core, req, fault),
            };
            if first.is_none() {
                first = Some(step.pa);
            }
            let end = step.hi.min(last);
            if !self.backed(step.pa, (end - va) as usize + 1) {
                bad = true;
            }
            if end >= last {
                break;
            }
            va = end + 1;
        }

        let pa = first.unwrap_or_default();
        if bad { Verdict::Bad(pa) } else { Verdict::Ok(pa) }
    }

    fn deliver(&mut self, core: &mut dyn CoreState, req: AccessReq, fault: Fault) -> Verdict {
        if req.complete && !self.dma_active() {
            core.raise_abort(fault);
        }
        Verdict::Exception(fault)
    }

    fn check_alignment(&self, va: u32, bytes: u32, side: Side, access: Priv) -> Option<Fault> {
        let sized = matches!(bytes, 2 | 4 | 8);
        if self.regs.sctlr.alignment_check() && side == Side::Data && sized
            && va % bytes != 0 && !self.dma_active()
        {
            return Some(mk_fault(FaultStatus::Alignment, NO_DOMAIN, va, side, access));
        }
        None
    }

    fn resolve_step(&mut self, va: u32, access: Priv, side: Side, user: bool, view: ViewId)
        -> Result<Step, Fault>
    {
        if !self.dma_active() {
            if let Some(m) = self.domains.lookup(view, va) {
                if m.perm.contains(access) {
                    return Ok(Step { hi: m.hi, pa: m.pa_of(va) });
                }
            }
        }
        if !self.translation_on() {
            return Ok(self.resolve_flat(va, view));
        }
        if self.cfg.mmu {
            self.resolve_tlb(va, access, side, user, view)
        } else {
            self.resolve_mpu(va, access, side, user, view)
        }
    }

    /// No translation: only the FCSE remap applies, with full rights.
    fn resolve_flat(&mut self, va: u32, view: ViewId) -> Step {
        let pid = self.pid();
        let mva = fcse_mva(va, pid);
        let (lo, hi) = fcse_clip(va, mva, 0, u32::MAX, pid);
        if !self.dma_active() {
            self.domains.alias(view, lo, hi, fcse_mva(lo, pid) as u64, Priv::RWX, None);
        }
        Step { hi, pa: mva as u64 }
    }

    fn resolve_tlb(&mut self, va: u32, access: Priv, side: Side, user: bool, view: ViewId)
        -> Result<Step, Fault>
    {
        let pid = self.pid();
        let mva = fcse_mva(va, pid);
        let t = self.tlb_idx(side);
        let views = self.tlb_views(side);

        let r = match self.tlbs[t].lookup(mva, self.asid()) {
            Some(r) => r,
            None => {
                let e = self.walk(mva)
                    .map_err(|wf| mk_fault(wf.status, wf.domain, va, side, access))?;
                let domains = &mut self.domains;
                self.tlbs[t].insert(e, &mut |old: &TlbEntry| {
                    unmap_mva(domains, views, pid, old.low_va, old.high_va)
                })
            },
        };

        let e = *self.tlbs[t].get(r);
        let ctx = PermissionContext {
            arch: self.cfg.arch,
            user,
            afe: self.regs.sctlr.access_flag_enabled(),
        };
        let rights = match entry_rights(&e, mva, self.regs.dacr, &ctx) {
            Grant::Rights(rights) => rights,
            Grant::DomainFault => {
                let status = e.fault_status(FaultClass::Domain);
                return Err(mk_fault(status, e.domain, va, side, access));
            },
        };
        if !rights.contains(access) {
            let status = e.fault_status(FaultClass::Permission);
            return Err(mk_fault(status, e.domain, va, side, access));
        }

        let (lo, hi) = e.perm_range(mva);
        let (lo, hi) = fcse_clip(va, mva, lo, hi, pid);
        if !self.dma_active() {
            let asid = if e.global { None } else { Some(e.asid) };
            self.domains.alias(view, lo, hi, e.pa_of(fcse_mva(lo, pid)), rights, asid);
            self.tlbs[t].get_mut(r).is_mapped = true;
        }
        Ok(Step { hi, pa: e.pa_of(mva) })
    }

    /// True when `[pa, pa+len)` is backed by a TCM or physical memory.
    pub fn backed(&self, pa: u64, len: usize) -> bool {
        self.tcm.claims(pa, len).is_some() || self.mem.read().contains(pa, len)
    }

    /// Read physical memory, routing through the TCMs first.
    pub fn phys_read(&self, pa: u64, dst: &mut [u8]) -> anyhow::Result<()> {
        if self.tcm.read_buf(pa, dst) {
            return Ok(());
        }
        self.mem.read().read_buf(pa, dst)
    }

    /// Write physical memory, routing through the TCMs first.
    pub fn phys_write(&mut self, pa: u64, src: &[u8]) -> anyhow::Result<()> {
        if self.tcm.write_buf(pa, src) {
            return Ok(());
        }
        self.mem.write().write_buf(pa, src)
    }

    fn data_endian(&self) -> Endian {
        if self.regs.sctlr.big_endian() { Endian::Big } else { Endian::Little }
    }

    /// Read a value at a virtual address on behalf of the core.
    ///
    /// Returns `None` when the access faulted (the abort has been raised).
    pub fn read_virt<T: AccessWidth>(&mut self, core: &mut dyn CoreState, va: u32)
        -> anyhow::Result<Option<T>>
    {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..T::WIDTH];
        let req = AccessReq::read(va, T::WIDTH as u32);
        if !self.access_virt(core, req, buf, false)? {
            return Ok(None);
        }
        Ok(Some(T::from_bytes(buf, self.data_endian())))
    }

    /// Write a value at a virtual address on behalf of the core.
    ///
    /// Returns false when the access faulted (the abort has been raised).
    pub fn write_virt<T: AccessWidth>(&mut self, core: &mut dyn CoreState, va: u32, val: T)
        -> anyhow::Result<bool>
    {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..T::WIDTH];
        val.to_bytes(buf, self.data_endian());
        let req = AccessReq::write(va, T::WIDTH as u32);
        self.access_virt(core, req, buf, true)
    }

    fn access_virt(&mut self, core: &mut dyn CoreState, req: AccessReq, buf: &mut [u8], write: bool)
        -> anyhow::Result<bool>
    {
        match self.resolve(core, req) {
            Verdict::Exception(_) => return Ok(false),
            Verdict::Bad(pa) => bail!("No memory behind va={:08x} (pa={pa:010x})", req.va),
            Verdict::Ok(_) => {},
        }
        // Each byte goes through its own translation.
        for (i, byte) in buf.iter_mut().enumerate() {
            let va = req.va.wrapping_add(i as u32);
            let pa = match self.resolve(core, AccessReq { va, bytes: 1, ..req }.speculative()) {
                Verdict::Ok(pa) => pa,
                other => bail!("Translation of va={va:08x} changed mid-access: {other:?}"),
            };
            if write {
                self.phys_write(pa, std::slice::from_ref(&*byte))?;
            } else {
                self.phys_read(pa, std::slice::from_mut(byte))?;
            }
        }
        Ok(true)
    }

    /// Human-readable dump of the translation state.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Mmu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.regs;
        writeln!(f, "{}", self.cfg)?;
        writeln!(f, "  sctlr={:08x} ttbr0={:08x} ttbr1={:08x} ttbcr={:08x}",
            r.sctlr.0, r.ttbr0, r.ttbr1, r.ttbcr.0)?;
        writeln!(f, "  dacr={:08x} contextidr={:08x} fcse={:08x} par={:08x}",
            r.dacr.0, r.contextidr.0, r.fcse.0, r.par)?;
        let names: &[&str] = if self.tlbs.len() == 1 { &["Unified"] } else { &["Instruction", "Data"] };
        for (name, tlb) in names.iter().zip(self.tlbs.iter()) {
            writeln!(f, "{name} TLB:")?;
            write!(f, "{tlb}")?;
        }
        if self.cfg.mpu {
            write!(f, "{}", self.mpu)?;
        }
        write!(f, "{}", self.tcm)
    }
}
