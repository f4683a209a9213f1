//! Processor state consumed by the memory subsystem.

use log::debug;

use crate::mmu::prim::Fault;

/// The view of a core which the memory subsystem needs.
///
/// Everything else about the processor (register banking, exception entry,
/// instruction decoding) lives behind this trait.
pub trait CoreState {
    /// The core is currently in a privileged mode.
    fn is_privileged(&self) -> bool;

    /// Privileged data accesses are currently redirected to the user view
    /// (the unprivileged load/store forms).
    fn user_redirect(&self) -> bool { false }

    /// Take a memory abort for a processor-generated access.
    fn raise_abort(&mut self, fault: Fault);

    /// Assert the interrupt for a DMA channel.
    fn raise_dma_irq(&mut self, channel: usize, error: bool);
}

/// A core which records everything it is asked to do.
#[derive(Debug, Default)]
pub struct SimpleCore {
    pub privileged: bool,
    pub redirect: bool,
    /// Aborts taken, in order.
    pub aborts: Vec<Fault>,
    /// DMA interrupts asserted, as (channel, error).
    pub dma_irqs: Vec<(usize, bool)>,
}
impl SimpleCore {
    pub fn new(privileged: bool) -> Self {
        SimpleCore { privileged, ..Default::default() }
    }

    pub fn last_abort(&self) -> Option<&Fault> { self.aborts.last() }
}

impl CoreState for SimpleCore {
    fn is_privileged(&self) -> bool { self.privileged }
    fn user_redirect(&self) -> bool { self.redirect }

    fn raise_abort(&mut self, fault: Fault) {
        debug!(target: "CPU", "abort va={:08x} fsr={:03x} {:?}", fault.va, fault.fsr(), fault.status);
        self.aborts.push(fault);
    }

    fn raise_dma_irq(&mut self, channel: usize, error: bool) {
        debug!(target: "CPU", "DMA channel {channel} irq error={error}");
        self.dma_irqs.push((channel, error));
    }
}
