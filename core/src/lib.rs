
/// Memory-system configuration of the modelled cores.
pub mod config;
/// Processor state consumed by the memory subsystem.
pub mod cpu;
/// Implementation of emulated physical memory.
pub mod mem;
/// Per-view alias maps backing the access fast path.
pub mod domain;
/// Address translation and protection.
pub mod mmu;
/// Tightly-coupled memories.
pub mod tcm;
/// Implementation of system devices.
pub mod dev;
