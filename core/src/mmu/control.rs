//! Maintenance operations and writes to the translation control registers.
//!
//! These are the operations the coprocessor layer dispatches to. They are
//! self-contained per core: broadcasting a maintenance operation to other
//! cores is a matter of calling the same entry point on each of them.

use log::{debug, warn};

use crate::config::Arch;
use crate::cpu::CoreState;
use crate::domain::ViewId;
use crate::mmu::*;
use crate::tcm::TcmKind;

/// The flavour of a VA to PA translation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaToPaOp {
    /// Check with user permissions.
    pub user: bool,
    /// Check for write access rather than read access.
    pub write: bool,
}
impl VaToPaOp {
    pub const PRIV_READ: Self  = VaToPaOp { user: false, write: false };
    pub const PRIV_WRITE: Self = VaToPaOp { user: false, write: true };
    pub const USER_READ: Self  = VaToPaOp { user: true, write: false };
    pub const USER_WRITE: Self = VaToPaOp { user: true, write: true };
}

/// Lockdown PA register size codes, as entry kinds.
fn kind_from_size(size: u32) -> EntryKind {
    match size {
        0 => EntryKind::SuperSection,
        1 => EntryKind::SmallPage,
        2 => EntryKind::LargePage,
        _ => EntryKind::Section,
    }
}

/// Place `e` at `va` and `pa` with the geometry of `kind`.
fn place(e: &mut TlbEntry, va: u32, pa: u64, kind: EntryKind) {
    let size = kind.size();
    e.kind = kind;
    e.low_va = (va as u64 & !(size - 1)) as u32;
    e.high_va = (e.low_va as u64 + size - 1) as u32;
    e.low_pa = pa & !(size - 1);
}

/// TLB maintenance.
impl Mmu {
    fn invalidate(&mut self, target: Target, lo: u32, hi: u32, mode: InvalMode) {
        let pid = self.pid();
        for (t, views) in self.tlb_targets(target) {
            let domains = &mut self.domains;
            self.tlbs[t].invalidate(lo, hi, mode, &mut |e: &TlbEntry| {
                unmap_mva(domains, views, pid, e.low_va, e.high_va)
            });
        }
    }

    /// Invalidate every entry. Lockdown entries stay valid.
    pub fn invalidate_all(&mut self, target: Target) {
        self.invalidate(target, 0, u32::MAX, InvalMode::All);
    }

    /// Invalidate the entries translating the page at `mva`, whatever
    /// their ASID. Lockdown entries are not affected.
    pub fn invalidate_mva(&mut self, target: Target, mva: u32) {
        let page = mva & 0xffff_f000;
        self.invalidate(target, page, page | 0xfff, InvalMode::Unlocked);
    }

    /// Invalidate the entries translating the page in `val[31:12]` which
    /// are global or belong to the ASID in `val[7:0]`.
    pub fn invalidate_mva_asid(&mut self, target: Target, val: u32) {
        let page = val & 0xffff_f000;
        self.invalidate(target, page, page | 0xfff, InvalMode::AsidOrGlobal(val as u8));
    }

    /// Invalidate every non-global entry belonging to the ASID in `val[7:0]`.
    pub fn invalidate_asid(&mut self, target: Target, val: u32) {
        self.invalidate(target, 0, u32::MAX, InvalMode::Asid(val as u8));
    }

    /// Invalidate the entries translating the page at `mva` for all ASIDs.
    pub fn invalidate_mva_all_asid(&mut self, target: Target, mva: u32) {
        let page = mva & 0xffff_f000;
        self.invalidate(target, page, page | 0xfff, InvalMode::Unlocked);
    }
}

/// Control register writes and mode notifications.
impl Mmu {
    pub fn write_sctlr(&mut self, val: u32) {
        let old = self.regs.sctlr;
        let new = ControlReg::for_arch(val, self.cfg.arch);
        self.regs.sctlr = new;

        let mask = ControlReg::M | ControlReg::XP | ControlReg::AFE | ControlReg::BR;
        if (old.0 ^ new.0) & mask != 0 {
            debug!(target: "MMU", "sctlr {:08x} -> {:08x}, unmapping all views", old.0, new.0);
            self.domains.clear_all();
        }
    }

    pub fn write_ttbr0(&mut self, val: u32) { self.regs.ttbr0 = val; }
    pub fn write_ttbr1(&mut self, val: u32) { self.regs.ttbr1 = val; }
    pub fn write_ttbcr(&mut self, val: u32) {
        if self.cfg.arch < Arch::V6 {
            warn!(target: "MMU", "TTBCR write {val:08x} on {:?}", self.cfg.arch);
            return;
        }
        self.regs.ttbcr = TtbcrReg(val & 0x37);
    }

    /// Write the DACR. The page-id set currently in use is brought up to
    /// date immediately, the others when they next become active.
    pub fn write_dacr(&mut self, core: &dyn CoreState, val: u32) {
        let dacr = DacrReg(val);
        check_dacr(dacr);
        self.regs.dacr = dacr;
        let user = self.effective_user(core, Side::Code);
        self.sync_domains(self.page_set(user));
    }

    /// Write the context id register. Aliases belonging to an ASID are
    /// taken down when the ASID changes; cached entries stay.
    pub fn write_contextidr(&mut self, val: u32) {
        let new = ContextIdReg(val);
        if new.asid() != self.regs.contextidr.asid() {
            debug!(target: "MMU", "ASID {} -> {}", self.regs.contextidr.asid(), new.asid());
            self.domains.unmap_non_global();
        }
        self.regs.contextidr = new;
    }

    /// Write the FCSE process id register.
    pub fn write_fcse_pid(&mut self, val: u32) {
        if !self.cfg.fcse {
            warn!(target: "MMU", "FCSE PID write {val:08x} without FCSE");
            return;
        }
        let new = FcsePidReg(val & FcsePidReg::MASK);
        if new == self.regs.fcse {
            return;
        }
        debug!(target: "MMU", "FCSE PID {} -> {}", self.regs.fcse.pid(), new.pid());
        self.regs.fcse = new;
        self.domains.unmap_views(&ViewId::ALL, 0, FCSE_WINDOW - 1);
        if !self.cfg.mmu && !self.cfg.mpu {
            self.domains.alias(ViewId::Fcse, 0, FCSE_WINDOW - 1, new.base() as u64, Priv::RWX, None);
        }
    }

    /// The core changed mode: make the page-id set it now uses current.
    pub fn on_mode_change(&mut self, core: &dyn CoreState) {
        let user = self.effective_user(core, Side::Code);
        self.sync_domains(self.page_set(user));
    }
}

/// TLB lockdown registers.
impl Mmu {
    fn lockdown_tlb(&self, side: Side) -> Option<usize> {
        if self.tlbs.is_empty() || self.cfg.lockdown_entries == 0 {
            warn!(target: "TLB", "lockdown access without a lockdown partition");
            return None;
        }
        Some(self.tlb_idx(side))
    }

    /// Rewrite the selected lockdown entry of the TLB serving `side`.
    fn update_lockdown(&mut self, side: Side, f: impl FnOnce(&mut TlbEntry)) {
        let Some(t) = self.lockdown_tlb(side) else { return };
        let views = self.tlb_views(side);
        let pid = self.pid();
        let domains = &mut self.domains;
        self.tlbs[t].update_selected(&mut |e: &TlbEntry| {
            unmap_mva(domains, views, pid, e.low_va, e.high_va)
        }, f);
    }

    pub fn read_tlb_lockdown(&self, side: Side) -> u32 {
        self.lockdown_tlb(side).map_or(0, |t| self.tlbs[t].read_lockdown())
    }
    pub fn write_tlb_lockdown(&mut self, side: Side, val: u32) {
        if let Some(t) = self.lockdown_tlb(side) {
            self.tlbs[t].write_lockdown(val);
        }
    }

    /// Select the lockdown entry accessed through the VA/PA/attribute
    /// registers.
    pub fn write_lockdown_index(&mut self, side: Side, val: u32) {
        if let Some(t) = self.lockdown_tlb(side) {
            self.tlbs[t].select(val);
        }
    }

    fn selected_lockdown(&self, side: Side) -> Option<&TlbEntry> {
        self.lockdown_tlb(side).and_then(|t| self.tlbs[t].selected())
    }

    pub fn read_lockdown_va(&self, side: Side) -> u32 {
        let Some(t) = self.lockdown_tlb(side) else { return 0 };
        let Some(e) = self.tlbs[t].selected() else { return 0 };
        (self.tlbs[t].selected_va() & 0xffff_f000) | (e.global as u32) << 9 | e.asid as u32
    }
    pub fn write_lockdown_va(&mut self, side: Side, val: u32) {
        let reg = LockdownVa(val);
        if let Some(t) = self.lockdown_tlb(side) {
            self.tlbs[t].set_selected_va(reg.va());
        }
        self.update_lockdown(side, |e| {
            e.global = reg.global();
            e.asid = reg.asid();
            let (pa, kind) = (e.low_pa, e.kind);
            place(e, reg.va(), pa, kind);
        });
    }

    pub fn read_lockdown_pa(&self, side: Side) -> u32 {
        self.selected_lockdown(side).map_or(0, |e| {
            (e.low_pa as u32 & 0xffff_f000)
                | (e.ns as u32) << 9
                | LockdownPa::size_code(e.size()) << 6
                | (e.ap[0] as u32 & 0b111) << 1
                | e.lockdown_valid as u32
        })
    }
    pub fn write_lockdown_pa(&mut self, side: Side, val: u32) {
        let reg = LockdownPa(val);
        let Some(t) = self.lockdown_tlb(side) else { return };
        let va = self.tlbs[t].selected_va();
        let v6_format = self.cfg.arch >= Arch::V6;
        let sctlr = self.regs.sctlr;
        self.update_lockdown(side, |e| {
            place(e, va, reg.pa() as u64, kind_from_size(reg.size()));
            e.ns = reg.ns();
            if e.uniform() {
                e.set_ap(reg.ap());
            } else {
                e.ap[0] = reg.ap();
            }
            e.v6_format = v6_format;
            e.sctlr_s = sctlr.sysprot_enabled();
            e.sctlr_r = sctlr.romprot_enabled();
            e.lockdown_valid = reg.valid();
        });
    }

    pub fn read_lockdown_attr(&self, side: Side) -> u32 {
        self.selected_lockdown(side).map_or(0, |e| {
            let sub = if e.uniform() {
                None
            } else {
                Some([e.ap[1] & 0b11, e.ap[2] & 0b11, e.ap[3] & 0b11])
            };
            LockdownAttr::encode(e.shareable, e.texcb, e.xn, e.domain, sub)
        })
    }
    pub fn write_lockdown_attr(&mut self, side: Side, val: u32) {
        let reg = LockdownAttr(val);
        self.update_lockdown(side, |e| {
            e.shareable = reg.s();
            e.texcb = reg.texcb();
            e.xn = reg.xn();
            e.domain = reg.domain();
            if reg.spv() {
                for n in 1..4 {
                    e.ap[n] = reg.sub_ap(n as u32);
                }
            } else {
                e.set_ap(e.ap[0]);
            }
        });
    }
}

/// Diagnostic translation and TCM registers.
impl Mmu {
    /// Translate `va` as an access of the given flavour would be, and
    /// record the outcome in the PAR.
    ///
    /// Faults are reported in the PAR only. The translation is cached the
    /// same way an ordinary access would be.
    pub fn translate_va(&mut self, core: &mut dyn CoreState, va: u32, op: VaToPaOp) -> u32 {
        let user = op.user || !core.is_privileged();
        let access = if op.write { Priv::W } else { Priv::R };

        let saved = self.ctx.replace(AccessCtx { user, asid: None, dma: false });
        let verdict = self.resolve(core, AccessReq::new(va, 1, access).speculative());
        self.ctx = saved;

        let par = match verdict {
            Verdict::Exception(fault) => ParReg::failure(fault.status.code()),
            Verdict::Ok(pa) | Verdict::Bad(pa) => {
                let (ns, shareable, texcb) = self.attrs_at(va);
                ParReg::success(pa, ns, shareable, MemType::from_texcb(texcb))
            },
        };
        debug!(target: "MMU", "VA to PA {va:08x} {op:?}: {par:08x}");
        self.regs.par = par;
        par
    }

    /// Memory attributes (NS, shareable, TEX:C:B) governing `va`.
    fn attrs_at(&self, va: u32) -> (bool, bool, u8) {
        let mva = self.mva(va);
        if !self.translation_on() {
            return (false, false, 0);
        }
        if self.cfg.mmu {
            let tlb = &self.tlbs[self.tlb_idx(Side::Data)];
            return tlb.lookup(mva, self.asid())
                .map(|r| tlb.get(r))
                .map_or((false, false, 0), |e| (e.ns, e.shareable, e.texcb));
        }
        let hit = self.mpu.lookup(Side::Data, mva);
        hit.region.and_then(|idx| self.mpu.region(Side::Data, idx))
            .map_or((false, false, 0), |r| (false, r.shareable, r.texcb))
    }

    pub fn read_tcm_region(&self, kind: TcmKind) -> u32 {
        self.tcm.read_region(kind)
    }

    /// Relocate or enable/disable a TCM. Aliases hold physical addresses
    /// and are unaffected; accesses are routed to the bank at access time.
    pub fn write_tcm_region(&mut self, kind: TcmKind, val: u32) {
        self.tcm.write_region(kind, val);
    }
}
