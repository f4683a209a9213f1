//! Static configuration of the memory subsystem of one emulated core.

use std::fmt;

/// Architecture generation, as far as the memory system is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Arch {
    V4,
    V5,
    V6,
    /// ARMv6 with the K extensions (access flag, simplified AP model).
    V6K,
    V7,
}
impl Arch {
    /// True when translation tables carry ASIDs and the ARMv6 layouts exist.
    pub fn has_v6_tables(&self) -> bool { *self >= Arch::V6 }
    /// True when SCTLR.AFE (and the simplified permission model) exists.
    pub fn has_access_flag(&self) -> bool { *self >= Arch::V6K }
}

/// Describes which memory-system features a particular core implements.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Human-readable name of the modelled core.
    pub name: &'static str,
    pub arch: Arch,

    /// A paged MMU is present.
    pub mmu: bool,
    /// A protection unit is present (mutually exclusive with `mmu`).
    pub mpu: bool,

    /// Instruction and data share a single TLB.
    pub unified_tlb: bool,
    /// Number of lockdown entries in each TLB.
    pub lockdown_entries: u32,

    /// Instruction and data share a single bank of MPU regions.
    pub unified_mpu: bool,
    /// Number of regions in each MPU bank.
    pub mpu_regions: u32,

    /// 16MB supersections are decoded (ARMv6+ tables only).
    pub supersections: bool,
    /// Width of the physical address space (32, 36 or 40).
    pub pa_bits: u8,
    /// Fine page tables and tiny pages are decoded (pre-ARMv6 only).
    pub fine_tables: bool,
    /// Type 0b11 in a coarse table is an extended small page.
    pub ext_small_pages: bool,

    /// The fast context switch extension is present.
    pub fcse: bool,

    /// Size of the instruction TCM in bytes (0 when absent).
    pub itcm_size: u32,
    /// Size of the data TCM in bytes (0 when absent).
    pub dtcm_size: u32,
    /// Number of DMA channels (0 when absent).
    pub dma_channels: u32,
}

impl VmConfig {
    /// ARM920T: ARMv4T, split 64-entry TLBs with lockdown, fine tables.
    pub fn arm920t() -> Self {
        VmConfig {
            name: "ARM920T",
            arch: Arch::V4,
            mmu: true,
            mpu: false,
            unified_tlb: false,
            lockdown_entries: 64,
            unified_mpu: false,
            mpu_regions: 0,
            supersections: false,
            pa_bits: 32,
            fine_tables: true,
            ext_small_pages: false,
            fcse: true,
            itcm_size: 0,
            dtcm_size: 0,
            dma_channels: 0,
        }
    }

    /// ARM926EJ-S: ARMv5TEJ, unified TLB with 8 lockdown entries, TCMs.
    pub fn arm926ejs() -> Self {
        VmConfig {
            name: "ARM926EJ-S",
            arch: Arch::V5,
            unified_tlb: true,
            lockdown_entries: 8,
            itcm_size: 0x4000,
            dtcm_size: 0x4000,
            ..Self::arm920t()
        }
    }

    /// XScale-style ARMv5TE core with extended small pages and no fine tables.
    pub fn xscale() -> Self {
        VmConfig {
            name: "XScale",
            arch: Arch::V5,
            unified_tlb: false,
            lockdown_entries: 28,
            fine_tables: false,
            ext_small_pages: true,
            ..Self::arm920t()
        }
    }

    /// ARM946E-S: ARMv5TE protection unit with 8 unified regions.
    pub fn arm946es() -> Self {
        VmConfig {
            name: "ARM946E-S",
            arch: Arch::V5,
            mmu: false,
            mpu: true,
            unified_tlb: false,
            lockdown_entries: 0,
            unified_mpu: true,
            mpu_regions: 8,
            supersections: false,
            pa_bits: 32,
            fine_tables: false,
            ext_small_pages: false,
            fcse: false,
            itcm_size: 0x8000,
            dtcm_size: 0x4000,
            dma_channels: 0,
        }
    }

    /// ARM1136JF-S: ARMv6, unified main TLB, supersections, TCMs and a
    /// two-channel TCM DMA engine.
    pub fn arm1136jfs() -> Self {
        VmConfig {
            name: "ARM1136JF-S",
            arch: Arch::V6,
            mmu: true,
            mpu: false,
            unified_tlb: true,
            lockdown_entries: 8,
            unified_mpu: false,
            mpu_regions: 0,
            supersections: true,
            pa_bits: 32,
            fine_tables: false,
            ext_small_pages: true,
            fcse: true,
            itcm_size: 0x4000,
            dtcm_size: 0x4000,
            dma_channels: 2,
        }
    }

    /// ARM1176JZF-S: ARMv6K variant of the ARM1136 with the access flag.
    pub fn arm1176jzfs() -> Self {
        VmConfig {
            name: "ARM1176JZF-S",
            arch: Arch::V6K,
            ..Self::arm1136jfs()
        }
    }

    /// Cortex-A8: ARMv7-A, split TLBs with lockdown, 40-bit supersections.
    pub fn cortex_a8() -> Self {
        VmConfig {
            name: "Cortex-A8",
            arch: Arch::V7,
            mmu: true,
            mpu: false,
            unified_tlb: false,
            lockdown_entries: 4,
            unified_mpu: false,
            mpu_regions: 0,
            supersections: true,
            pa_bits: 40,
            fine_tables: false,
            ext_small_pages: false,
            fcse: true,
            itcm_size: 0,
            dtcm_size: 0,
            dma_channels: 0,
        }
    }

    /// Cortex-R4: ARMv7-R protection unit with 12 unified regions and TCMs.
    pub fn cortex_r4() -> Self {
        VmConfig {
            name: "Cortex-R4",
            arch: Arch::V7,
            mpu_regions: 12,
            itcm_size: 0x1_0000,
            dtcm_size: 0x1_0000,
            ..Self::arm946es()
        }
    }

    /// A core with only the fast context switch extension and no MMU/MPU.
    pub fn fcse_only() -> Self {
        VmConfig {
            name: "FCSE-only",
            mmu: false,
            mpu: false,
            lockdown_entries: 0,
            itcm_size: 0,
            dtcm_size: 0,
            ..Self::arm920t()
        }
    }

    /// Mask of valid physical address bits.
    pub fn pa_mask(&self) -> u64 {
        (1u64 << self.pa_bits) - 1
    }

    /// Minimum MPU region size as a power of two.
    pub fn mpu_min_size_log2(&self) -> u32 {
        if self.arch >= Arch::V6 { 5 } else { 12 }
    }
}

impl fmt::Display for VmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match (self.mmu, self.mpu) {
            (true, _) => "MMU",
            (false, true) => "MPU",
            (false, false) => "none",
        };
        write!(f, "{} ({:?}, {unit})", self.name, self.arch)
    }
}
