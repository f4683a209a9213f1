//! The TCM DMA engine.
//!
//! Each channel moves a block between a TCM (the internal side) and the
//! rest of the address space (the external side). Both sides are virtual
//! addresses validated through the ordinary translation path, under the
//! channel's own context id. A transfer runs to completion in one step.

use log::{debug, warn};

use crate::cpu::CoreState;
use crate::mmu::{AccessCtx, Mmu};
use crate::mmu::prim::*;
use crate::tcm::TcmKind;

/// DMA channel registers (c11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaReg {
    /// Bitmask of implemented channels.
    Present,
    /// Bitmask of channels whose registers user mode may access.
    UserAccess,
    /// Channel addressed by the per-channel registers.
    ChannelSelect,
    Stop,
    Start,
    Clear,
    Control,
    IntStart,
    ExtStart,
    IntEnd,
    Status,
    ContextId,
}
impl DmaReg {
    fn per_channel(&self) -> bool {
        !matches!(self, DmaReg::Present | DmaReg::UserAccess | DmaReg::ChannelSelect)
    }
}

/// Channel control register.
pub struct DmaControl {
    /// Transaction size in bytes.
    size: u32,
    /// External address increment (0 means the transaction size).
    stride: u32,
    /// Check accesses with user permissions.
    user: bool,
    /// Interrupt on error.
    irq_err: bool,
    /// Interrupt on completion.
    irq_done: bool,
    /// Move from the internal to the external side.
    to_ext: bool,
    /// Internal side is the instruction TCM.
    itcm: bool,
}
impl From<u32> for DmaControl {
    fn from(x: u32) -> DmaControl {
        DmaControl {
            size: 1 << (x & 0b11),
            stride: (x >> 8) & 0xfff,
            user: (x & (1 << 26)) != 0,
            irq_err: (x & (1 << 28)) != 0,
            irq_done: (x & (1 << 29)) != 0,
            to_ext: (x & (1 << 30)) != 0,
            itcm: (x & (1 << 31)) != 0,
        }
    }
}
impl DmaControl {
    const WRITABLE: u32 = 0xf400_0000 | 0xfff << 8 | 0b11;

    fn step(&self) -> u32 {
        if self.stride == 0 { self.size } else { self.stride }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Idle,
    Queued,
    Running,
    /// Finished, with or without an error.
    Complete,
}

// Status register bits.
const ST_INT_ERR: u32 = 1 << 7;
const ST_EXT_ERR: u32 = 1 << 8;
const ST_BAD_PARAMS: u32 = 1 << 9;
const ST_ERR_MASK: u32 = ST_INT_ERR | ST_EXT_ERR | ST_BAD_PARAMS;

/// Why a transfer stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaError {
    Internal(u8),
    External(u8),
}

#[derive(Debug, Default, Clone)]
pub struct DmaChannel {
    pub control: u32,
    pub int_start: u32,
    pub ext_start: u32,
    pub int_end: u32,
    pub context_id: u32,
    pub state: ChannelState,
    /// Error bits and error status, in their status register positions.
    errors: u32,
}
impl DmaChannel {
    fn status(&self) -> u32 {
        let state = match self.state {
            ChannelState::Idle => 0,
            ChannelState::Queued => 1,
            ChannelState::Running => 2,
            ChannelState::Complete => 3,
        };
        self.errors | state
    }

    fn has_error(&self) -> bool { (self.errors & ST_ERR_MASK) != 0 }

    fn fail(&mut self, bits: u32, code: u8) {
        self.errors = bits | (code as u32 & 0x1f) << 2;
        self.state = ChannelState::Complete;
    }
}

#[derive(Debug, Default)]
pub struct DmaEngine {
    pub channels: Vec<DmaChannel>,
    pub sel: usize,
    pub user_access: u32,
}
impl DmaEngine {
    /// One bit per channel in the present and user access registers.
    pub const MAX_CHANNELS: u32 = 32;

    pub fn new(channels: u32) -> Self {
        if channels > Self::MAX_CHANNELS {
            warn!(target: "DMA", "{channels} channels configured, keeping {}", Self::MAX_CHANNELS);
        }
        let channels = channels.min(Self::MAX_CHANNELS);
        DmaEngine {
            channels: vec![DmaChannel::default(); channels as usize],
            sel: 0,
            user_access: 0,
        }
    }

    /// A channel other than `except` is running, or stopped on an error not
    /// yet cleared.
    fn busy(&self, except: Option<usize>) -> bool {
        self.channels.iter().enumerate()
            .filter(|&(i, _)| Some(i) != except)
            .any(|(_, c)| c.state == ChannelState::Running || c.has_error())
    }

    /// Bitmask with one bit per implemented channel.
    fn mask(&self) -> u32 {
        1u32.checked_shl(self.channels.len() as u32).map_or(u32::MAX, |v| v - 1)
    }
}

impl Mmu {
    fn dma_permitted(&self, core: &dyn CoreState, reg: DmaReg) -> bool {
        if core.is_privileged() {
            return true;
        }
        let ok = match reg {
            DmaReg::Present | DmaReg::ChannelSelect => true,
            DmaReg::UserAccess => false,
            _ => self.dma.user_access.checked_shr(self.dma.sel as u32).unwrap_or(0) & 1 != 0,
        };
        if !ok {
            warn!(target: "DMA", "user access to {reg:?} on channel {}", self.dma.sel);
        }
        ok
    }

    pub fn read_dma(&self, core: &dyn CoreState, reg: DmaReg) -> u32 {
        if self.dma.channels.is_empty() || !self.dma_permitted(core, reg) {
            return 0;
        }
        let ch = &self.dma.channels[self.dma.sel];
        match reg {
            DmaReg::Present => self.dma.mask(),
            DmaReg::UserAccess => self.dma.user_access,
            DmaReg::ChannelSelect => self.dma.sel as u32,
            DmaReg::Stop | DmaReg::Start | DmaReg::Clear => 0,
            DmaReg::Control => ch.control,
            DmaReg::IntStart => ch.int_start,
            DmaReg::ExtStart => ch.ext_start,
            DmaReg::IntEnd => ch.int_end,
            DmaReg::Status => ch.status(),
            DmaReg::ContextId => ch.context_id,
        }
    }

    pub fn write_dma(&mut self, core: &mut dyn CoreState, reg: DmaReg, val: u32) {
        if self.dma.channels.is_empty() {
            warn!(target: "DMA", "write {val:08x} to {reg:?} without a DMA engine");
            return;
        }
        if !self.dma_permitted(core, reg) {
            return;
        }
        let sel = self.dma.sel;
        let num = self.dma.channels.len();
        let present = self.dma.mask();
        let ch = &mut self.dma.channels[sel];
        if reg.per_channel() && ch.state == ChannelState::Queued
            && !matches!(reg, DmaReg::Stop | DmaReg::Clear)
        {
            warn!(target: "DMA", "write {val:08x} to {reg:?} on queued channel {sel}");
            return;
        }
        match reg {
            DmaReg::Present | DmaReg::Status => {
                warn!(target: "DMA", "write {val:08x} to read-only {reg:?}");
            },
            DmaReg::UserAccess => self.dma.user_access = val & present,
            DmaReg::ChannelSelect => {
                if (val as usize) < num {
                    self.dma.sel = val as usize;
                } else {
                    warn!(target: "DMA", "select of absent channel {val}");
                }
            },
            DmaReg::Control => ch.control = val & DmaControl::WRITABLE,
            DmaReg::IntStart => ch.int_start = val,
            DmaReg::ExtStart => ch.ext_start = val,
            DmaReg::IntEnd => ch.int_end = val,
            DmaReg::ContextId => ch.context_id = val,
            DmaReg::Stop => {
                if ch.state == ChannelState::Queued {
                    ch.state = ChannelState::Idle;
                }
            },
            DmaReg::Start => self.dma_start(core, sel),
            DmaReg::Clear => {
                ch.state = ChannelState::Idle;
                ch.errors = 0;
                self.dma_run_queued(core);
            },
        }
    }

    fn dma_start(&mut self, core: &mut dyn CoreState, n: usize) {
        let busy = self.dma.busy(Some(n));
        let ch = &mut self.dma.channels[n];
        if matches!(ch.state, ChannelState::Queued | ChannelState::Running) {
            return;
        }
        if ch.has_error() {
            debug!(target: "DMA", "channel {n}: restart drops status {:08x}", ch.status());
            ch.errors = 0;
            ch.state = ChannelState::Idle;
        }
        let ctl = DmaControl::from(ch.control);
        let misaligned = [ch.int_start, ch.ext_start, ch.int_end, ctl.step()]
            .iter().any(|x| x % ctl.size != 0);
        if misaligned {
            warn!(target: "DMA", "channel {n}: misaligned transfer int={:08x} ext={:08x} end={:08x} size={}",
                ch.int_start, ch.ext_start, ch.int_end, ctl.size);
            ch.fail(ST_BAD_PARAMS, 0);
            if ctl.irq_err {
                core.raise_dma_irq(n, true);
            }
            return;
        }
        if busy {
            debug!(target: "DMA", "channel {n} queued");
            ch.state = ChannelState::Queued;
            return;
        }
        self.dma_run(core, n);
    }

    /// Start the first queued channel, if nothing else is in the way.
    fn dma_run_queued(&mut self, core: &mut dyn CoreState) {
        if self.dma.busy(None) {
            return;
        }
        if let Some(n) = self.dma.channels.iter().position(|c| c.state == ChannelState::Queued) {
            self.dma_run(core, n);
        }
    }

    fn dma_run(&mut self, core: &mut dyn CoreState, n: usize) {
        let ch = &mut self.dma.channels[n];
        ch.state = ChannelState::Running;
        ch.errors = 0;
        let ctl = DmaControl::from(ch.control);
        let (mut int, mut ext, end) = (ch.int_start, ch.ext_start, ch.int_end);
        let asid = ch.context_id as u8;
        debug!(target: "DMA", "channel {n}: {} int={int:08x}..{end:08x} ext={ext:08x} size={} step={}",
            if ctl.to_ext { "int->ext" } else { "ext->int" }, ctl.size, ctl.step());

        let saved = self.ctx.replace(AccessCtx { user: ctl.user, asid: Some(asid), dma: true });
        let mut result = Ok(());
        while int < end {
            result = self.dma_move(core, &ctl, int, ext);
            if result.is_err() {
                break;
            }
            int = int.wrapping_add(ctl.size);
            ext = ext.wrapping_add(ctl.step());
        }
        self.ctx = saved;

        let ch = &mut self.dma.channels[n];
        ch.int_start = int;
        ch.ext_start = ext;
        match result {
            Ok(()) => {
                ch.state = ChannelState::Complete;
                debug!(target: "DMA", "channel {n} complete");
                if ctl.irq_done {
                    core.raise_dma_irq(n, false);
                }
                self.dma_run_queued(core);
            },
            Err(err) => {
                warn!(target: "DMA", "channel {n} stopped at int={int:08x} ext={ext:08x}: {err:?}");
                match err {
                    DmaError::Internal(code) => ch.fail(ST_INT_ERR, code),
                    DmaError::External(code) => ch.fail(ST_EXT_ERR, code),
                }
                if ctl.irq_err {
                    core.raise_dma_irq(n, true);
                }
            },
        }
    }

    /// Validate both sides of one transaction and move it.
    fn dma_move(&mut self, core: &mut dyn CoreState, ctl: &DmaControl, int: u32, ext: u32)
        -> Result<(), DmaError>
    {
        let (int_access, ext_access) = if ctl.to_ext { (Priv::R, Priv::W) } else { (Priv::W, Priv::R) };
        let bank = if ctl.itcm { TcmKind::Instruction } else { TcmKind::Data };
        let len = ctl.size as usize;

        let int_pa = match self.resolve(core, AccessReq::new(int, ctl.size, int_access)) {
            Verdict::Ok(pa) | Verdict::Bad(pa) => pa,
            Verdict::Exception(f) => return Err(DmaError::Internal(f.status.code())),
        };
        if self.tcm.claims(int_pa, len) != Some(bank) {
            return Err(DmaError::Internal(0));
        }

        let ext_pa = match self.resolve(core, AccessReq::new(ext, ctl.size, ext_access)) {
            Verdict::Ok(pa) => pa,
            Verdict::Bad(_) => return Err(DmaError::External(FaultStatus::ExtAbortL1.code())),
            Verdict::Exception(f) => return Err(DmaError::External(f.status.code())),
        };
        if self.tcm.claims(ext_pa, len).is_some() {
            return Err(DmaError::External(0));
        }

        let mut buf = [0u8; 8];
        let buf = &mut buf[..len];
        let (src, dst) = if ctl.to_ext { (int_pa, ext_pa) } else { (ext_pa, int_pa) };
        self.phys_read(src, buf)
            .and_then(|_| self.phys_write(dst, buf))
            .map_err(|e| {
                warn!(target: "DMA", "transfer {src:010x} -> {dst:010x} failed: {e}");
                DmaError::External(FaultStatus::ExtAbortL1.code())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_decode() {
        let ctl = DmaControl::from(0x8000_0000 | 1 << 29 | 0x010 << 8 | 2);
        assert_eq!((ctl.size, ctl.stride, ctl.step()), (4, 0x10, 0x10));
        assert!(ctl.itcm && ctl.irq_done && !ctl.irq_err && !ctl.to_ext && !ctl.user);
        assert_eq!(DmaControl::from(3).step(), 8);
    }

    #[test]
    fn channel_masks() {
        assert_eq!(DmaEngine::new(2).mask(), 0b11);
        let full = DmaEngine::new(40);
        assert_eq!(full.channels.len(), 32);
        assert_eq!(full.mask(), u32::MAX);
        assert!(!DmaEngine::new(0).busy(None));
    }

    #[test]
    fn status_layout() {
        let mut ch = DmaChannel::default();
        assert_eq!(ch.status(), 0);
        ch.fail(ST_INT_ERR, FaultStatus::PermissionPage.code());
        assert_eq!(ch.status(), 0x80 | 0x0f << 2 | 3);
        assert!(ch.has_error());
    }
}
