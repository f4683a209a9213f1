//! Access-permission derivation and domain access tracking.

use log::warn;

use crate::config::Arch;
use crate::mmu::entry::*;
use crate::mmu::prim::*;
use crate::mmu::regs::DacrReg;

/// Access rights of a domain, from the DACR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainAccess { NoAccess, Client, Reserved, Manager }
impl DomainAccess {
    pub fn from_bits(x: u32) -> Self {
        match x & 0b11 {
            0b00 => DomainAccess::NoAccess,
            0b01 => DomainAccess::Client,
            0b10 => DomainAccess::Reserved,
            _ => DomainAccess::Manager,
        }
    }
}

/// Page-id sets, each tracking the DACR in effect when it was last active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSet { Physical, VirtPriv, VirtUser }
impl PageSet {
    fn idx(&self) -> usize { *self as usize }
}

/// The permission context for an access.
#[derive(Debug, Clone, Copy)]
pub struct PermissionContext {
    pub arch: Arch,
    /// The access is made with user rights.
    pub user: bool,
    /// SCTLR.AFE (simplified permission model).
    pub afe: bool,
}

/// Rights granted by an MMU access-permission code, ignoring execute.
///
/// `ap` is APX:AP. `sysprot`/`romprot` are the SCTLR.S/R bits captured when
/// the entry was filled.
pub fn ap_rights(ap: u8, sysprot: bool, romprot: bool, ctx: &PermissionContext) -> Priv {
    let apx = (ap & 0b100) != 0;
    let ap = ap & 0b11;
    let user = ctx.user;

    if ctx.afe {
        // AP[0] is the access flag; AP[2:1] select the permissions.
        return match (apx, ap >> 1) {
            (false, 0) => if user { Priv::NONE } else { Priv::RW },
            (false, _) => Priv::RW,
            (true, 0) => if user { Priv::NONE } else { Priv::R },
            (true, _) => Priv::R,
        };
    }

    match (apx, ap) {
        (false, 0b00) => {
            if ctx.arch >= Arch::V7 {
                return Priv::NONE;
            }
            match (sysprot, romprot) {
                (true, false) => if user { Priv::NONE } else { Priv::R },
                (false, true) => Priv::R,
                _ => Priv::NONE,
            }
        },
        (false, 0b01) => if user { Priv::NONE } else { Priv::RW },
        (false, 0b10) => if user { Priv::R } else { Priv::RW },
        (false, _) => Priv::RW,
        (true, 0b00) => Priv::NONE,
        (true, 0b01) => if user { Priv::NONE } else { Priv::R },
        (true, _) => Priv::R,
    }
}

/// Add execute permission where the architecture grants it.
pub fn with_exec(rights: Priv, xn: bool, arch: Arch) -> Priv {
    if rights.read() && !(xn && arch >= Arch::V6) {
        rights | Priv::X
    } else {
        rights
    }
}

/// Outcome of checking the domain of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Rights granted at this address.
    Rights(Priv),
    /// The domain has no access.
    DomainFault,
}

/// Derive the rights an entry grants at `mva` under the given DACR.
pub fn entry_rights(e: &TlbEntry, mva: u32, dacr: DacrReg, ctx: &PermissionContext) -> Grant {
    match DomainAccess::from_bits(dacr.domain(e.domain)) {
        DomainAccess::Manager => Grant::Rights(Priv::RWX),
        DomainAccess::Client => {
            let afe = ctx.afe && e.v6_format;
            let ctx = PermissionContext { afe, ..*ctx };
            let rights = ap_rights(e.ap_at(mva), e.sctlr_s, e.sctlr_r, &ctx);
            Grant::Rights(with_exec(rights, e.xn, ctx.arch))
        },
        DomainAccess::NoAccess | DomainAccess::Reserved => Grant::DomainFault,
    }
}

/// Rights granted by an MPU access-permission code.
///
/// The legacy two-bit codes are a subset of the extended encoding.
pub fn mpu_rights(ap: u8, xn: bool, user: bool, arch: Arch) -> Priv {
    let rights = match ap & 0xf {
        0b0001 => if user { Priv::NONE } else { Priv::RW },
        0b0010 => if user { Priv::R } else { Priv::RW },
        0b0011 => Priv::RW,
        0b0101 => if user { Priv::NONE } else { Priv::R },
        0b0110 => Priv::R,
        0b0111 if arch >= Arch::V7 => Priv::R,
        _ => Priv::NONE,
    };
    with_exec(rights, xn, arch)
}

/// Returns true when moving from `old` to `new` could remove a right from
/// any domain.
///
/// Fields holding the reserved encoding in both values are ignored.
pub fn dacr_downgrade(old: DacrReg, new: DacrReg) -> bool {
    let ignore = old.reserved_mask() & new.reserved_mask();
    (old.0 & !new.0 & !ignore) != 0
}

/// Remembers, per page-id set, the DACR in effect when the set was last
/// active.
#[derive(Debug, Clone)]
pub struct DomainTracker {
    last: [DacrReg; 3],
}
impl DomainTracker {
    pub fn new(dacr: DacrReg) -> Self {
        DomainTracker { last: [dacr; 3] }
    }

    /// Make `set` current under `dacr`, returning true when its existing
    /// mappings must be discarded.
    pub fn sync(&mut self, set: PageSet, dacr: DacrReg) -> bool {
        let old = self.last[set.idx()];
        self.last[set.idx()] = dacr;
        old != dacr && dacr_downgrade(old, dacr)
    }
}

/// Log writes which put a domain into the reserved state.
pub fn check_dacr(dacr: DacrReg) {
    let reserved = dacr.reserved_mask();
    if reserved != 0 {
        for dom in 0..16u8 {
            if (reserved >> (dom * 2)) & 0b11 != 0 {
                warn!(target: "MMU", "DACR {:08x}: domain {dom} uses the reserved encoding", dacr.0);
            }
        }
    }
}
