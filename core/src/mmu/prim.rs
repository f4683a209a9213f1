//! Primitive types shared by the translation machinery.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Domain id reported with faults that have no associated domain.
pub const NO_DOMAIN: u8 = 0xff;

/// Size of the low window remapped by the FCSE.
pub const FCSE_WINDOW: u32 = 0x0200_0000;

/// A set of access rights (read, write, execute).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Priv(pub u8);
impl Priv {
    pub const NONE: Priv = Priv(0);
    pub const R: Priv    = Priv(1);
    pub const W: Priv    = Priv(2);
    pub const X: Priv    = Priv(4);
    pub const RW: Priv   = Priv(1 | 2);
    pub const RX: Priv   = Priv(1 | 4);
    pub const RWX: Priv  = Priv(1 | 2 | 4);

    /// True when every right in `other` is also in `self`.
    pub fn contains(&self, other: Priv) -> bool { (self.0 & other.0) == other.0 }
    pub fn is_empty(&self) -> bool { self.0 == 0 }
    pub fn read(&self) -> bool { (self.0 & 1) != 0 }
    pub fn write(&self) -> bool { (self.0 & 2) != 0 }
    pub fn exec(&self) -> bool { (self.0 & 4) != 0 }
}
impl BitOr for Priv {
    type Output = Priv;
    fn bitor(self, rhs: Priv) -> Priv { Priv(self.0 | rhs.0) }
}
impl BitAnd for Priv {
    type Output = Priv;
    fn bitand(self, rhs: Priv) -> Priv { Priv(self.0 & rhs.0) }
}
impl Not for Priv {
    type Output = Priv;
    fn not(self) -> Priv { Priv(!self.0 & 7) }
}
impl fmt::Debug for Priv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}",
            if self.read() { 'r' } else { '-' },
            if self.write() { 'w' } else { '-' },
            if self.exec() { 'x' } else { '-' },
        )
    }
}

/// Which side of the core an access belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side { Code, Data }

/// Which TLB (or MPU bank) a maintenance operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target { Instruction, Data, Both }
impl Target {
    pub fn covers(&self, side: Side) -> bool {
        match self {
            Target::Both => true,
            Target::Instruction => side == Side::Code,
            Target::Data => side == Side::Data,
        }
    }
}

/// A request to validate an access.
#[derive(Debug, Clone, Copy)]
pub struct AccessReq {
    /// Virtual address of the first byte.
    pub va: u32,
    /// Number of bytes accessed (at least one is always validated).
    pub bytes: u32,
    /// Rights required by the access.
    pub access: Priv,
    /// When false, the access is speculative and faults have no side effect.
    pub complete: bool,
}
impl AccessReq {
    pub fn new(va: u32, bytes: u32, access: Priv) -> Self {
        AccessReq { va, bytes, access, complete: true }
    }
    pub fn read(va: u32, bytes: u32) -> Self { Self::new(va, bytes, Priv::R) }
    pub fn write(va: u32, bytes: u32) -> Self { Self::new(va, bytes, Priv::W) }
    pub fn fetch(va: u32, bytes: u32) -> Self { Self::new(va, bytes, Priv::X) }
    pub fn speculative(self) -> Self { AccessReq { complete: false, ..self } }

    /// Instruction fetches use the code side, everything else the data side.
    pub fn side(&self) -> Side {
        if self.access.exec() { Side::Code } else { Side::Data }
    }
}

/// Fault status codes, as reported in the fault status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    /// Protection-unit fault (no distinct per-type codes).
    Mpu,
    Alignment,
    AccessFlagSection,
    AccessFlagPage,
    TranslationSection,
    TranslationPage,
    DomainSection,
    DomainPage,
    PermissionSection,
    PermissionPage,
    /// External abort on the first-level descriptor fetch.
    ExtAbortL1,
    /// External abort on the second-level descriptor fetch.
    ExtAbortL2,
}
impl FaultStatus {
    pub fn code(&self) -> u8 {
        use FaultStatus::*;
        match self {
            Mpu                => 0b00000,
            Alignment          => 0b00001,
            AccessFlagSection  => 0b00011,
            AccessFlagPage     => 0b00110,
            TranslationSection => 0b00101,
            TranslationPage    => 0b00111,
            DomainSection      => 0b01001,
            DomainPage         => 0b01011,
            PermissionSection  => 0b01101,
            PermissionPage     => 0b01111,
            ExtAbortL1         => 0b01100,
            ExtAbortL2         => 0b01110,
        }
    }
}

/// A memory abort produced by a failed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub status: FaultStatus,
    /// Domain of the faulting descriptor, or [NO_DOMAIN].
    pub domain: u8,
    /// Faulting (pre-FCSE) virtual address.
    pub va: u32,
    pub side: Side,
    pub write: bool,
}
impl Fault {
    /// Value for the fault status register: status code and domain.
    pub fn fsr(&self) -> u32 {
        let code = self.status.code() as u32;
        let fs = (code & 0xf) | ((code & 0x10) << 6);
        let dom = if self.domain == NO_DOMAIN { 0 } else { self.domain as u32 & 0xf };
        (self.write as u32) << 11 | dom << 4 | fs
    }
}

/// Outcome of resolving an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The access is permitted; physical address of the first byte.
    Ok(u64),
    /// The access is not permitted.
    Exception(Fault),
    /// Permitted, but part of the range has no physical backing.
    Bad(u64),
}
impl Verdict {
    pub fn is_ok(&self) -> bool { matches!(self, Verdict::Ok(_)) }
    pub fn pa(&self) -> Option<u64> {
        match self {
            Verdict::Ok(pa) | Verdict::Bad(pa) => Some(*pa),
            Verdict::Exception(_) => None,
        }
    }
    pub fn fault(&self) -> Option<Fault> {
        match self {
            Verdict::Exception(f) => Some(*f),
            _ => None,
        }
    }
}

/// Apply the FCSE remap to a virtual address.
///
/// Addresses in the low window are relocated by the process id unless they
/// already carry one.
#[inline(always)]
pub fn fcse_mva(va: u32, pid: u32) -> u32 {
    if va < FCSE_WINDOW { va | (pid & 0xfe00_0000) } else { va }
}

/// Clip a resolved MVA range so that its virtual alias never mixes FCSE and
/// non-FCSE addresses, returning the virtual range it stands for.
///
/// `va`/`mva` are the address being resolved and its modified form, and
/// `[lo, hi]` is the MVA range containing `mva`.
pub fn fcse_clip(va: u32, mva: u32, lo: u32, hi: u32, pid: u32) -> (u32, u32) {
    let pid_base = pid & 0xfe00_0000;
    if pid_base == 0 {
        return (lo, hi);
    }
    if va != mva {
        let lo = lo.max(pid_base);
        let hi = hi.min(pid_base | (FCSE_WINDOW - 1));
        (lo - pid_base, hi - pid_base)
    } else {
        (lo.max(FCSE_WINDOW), hi)
    }
}

/// Helper functions for pulling indices out of a modified virtual address.
pub trait VirtAddrExt {
    fn l1_idx(self) -> u32;
    fn coarse_idx(self) -> u32;
    fn fine_idx(self) -> u32;
}
impl VirtAddrExt for u32 {
    #[inline(always)]
    fn l1_idx(self) -> u32 { self >> 20 }
    #[inline(always)]
    fn coarse_idx(self) -> u32 { (self >> 12) & 0xff }
    #[inline(always)]
    fn fine_idx(self) -> u32 { (self >> 10) & 0x3ff }
}
