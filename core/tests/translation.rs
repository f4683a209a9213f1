use std::sync::Arc;
use parking_lot::RwLock;

use armvm_core::config::VmConfig;
use armvm_core::cpu::SimpleCore;
use armvm_core::domain::ViewId;
use armvm_core::mem::PhysMemory;
use armvm_core::mem::prim::Endian;
use armvm_core::mmu::Mmu;
use armvm_core::mmu::control::VaToPaOp;
use armvm_core::mmu::desc::*;
use armvm_core::mmu::prim::*;
use armvm_core::mmu::regs::*;

const TTB: u32 = 0x4000;
const L2: u32 = 0x8000;
const VA: u32 = 0x0012_3456;
const FCSE_PID: u32 = 1 << 25;
const DATA: ViewId = ViewId::Virt { side: Side::Data, user: false };

fn setup(cfg: VmConfig) -> (Mmu, SimpleCore) {
    let mem = Arc::new(RwLock::new(PhysMemory::new(0x10_0000)));
    let mut m = Mmu::new(cfg, mem);
    let core = SimpleCore::new(true);
    m.write_ttbr0(TTB);
    m.write_dacr(&core, 0x0000_0001);
    m.write_sctlr(ControlReg::M | ControlReg::XP);
    (m, core)
}

fn put(m: &Mmu, pa: u32, val: u32) {
    m.mem.write().write::<u32>(pa as u64, val, Endian::Little).unwrap();
}

/// Point the first-level entry for `va` at the coarse table, and map the
/// small page holding `va` through it.
fn map_small(m: &Mmu, va: u32, page: SmallV6Bits) {
    let coarse = CoarseBits::new().with_base(L2).with_domain(0);
    put(m, TTB + (va >> 20) * 4, coarse.0);
    put(m, L2 + ((va >> 12) & 0xff) * 4, page.0);
}

#[test]
fn small_page_read() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));

    let v = m.resolve(&mut core, AccessReq::read(VA, 4));
    assert_eq!(v, Verdict::Ok(0x20 * 4096 + (VA & 0xfff) as u64));
    assert!(core.aborts.is_empty());
}

#[test]
fn user_read_of_privileged_page() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(1));

    core.privileged = false;
    m.on_mode_change(&core);
    let fault = m.resolve(&mut core, AccessReq::read(VA, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::PermissionPage);
    assert_eq!(fault.domain, 0);
    assert_eq!(core.last_abort(), Some(&fault));

    // Privileged reads are still fine.
    core.privileged = true;
    assert!(m.resolve(&mut core, AccessReq::read(VA, 4)).is_ok());
}

#[test]
fn resolution_is_cached_until_invalidated() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));

    let first = m.resolve(&mut core, AccessReq::read(VA, 4));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 4)), first);

    // The tables change underneath; the cached translation stays.
    map_small(&m, VA, SmallV6Bits::new().with_base(0x30 << 12).with_ap(3));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 4)), first);

    m.invalidate_mva(Target::Both, VA);
    let v = m.resolve(&mut core, AccessReq::read(VA, 4));
    assert_eq!(v.pa(), Some(0x30 * 4096 + (VA & 0xfff) as u64));
}

#[test]
fn asid_isolation() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let page = |base: u32| SmallV6Bits::new().with_base(base << 12).with_ap(3).with_ng(true);

    m.write_contextidr(1);
    map_small(&m, VA, page(0x20));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x20456));

    m.write_contextidr(2);
    map_small(&m, VA, page(0x30));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x30456));

    // ASID 1 still sees its own cached translation.
    m.write_contextidr(1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x20456));

    // Invalidating another ASID's page leaves ASID 1 alone.
    m.invalidate_mva_asid(Target::Both, (VA & 0xffff_f000) | 2);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x20456));

    m.invalidate_asid(Target::Both, 1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x30456));
}

#[test]
fn invalidate_all_keeps_lockdown_entries() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let va = 0x0040_0000;

    m.write_lockdown_index(Side::Data, 0);
    m.write_lockdown_va(Side::Data, va | 1 << 9);
    m.write_lockdown_pa(Side::Data, 0x0005_0000 | 1 << 6 | 3 << 1 | 1);
    m.write_lockdown_attr(Side::Data, 0);
    assert_eq!(m.read_lockdown_va(Side::Data), va | 1 << 9);
    assert_eq!(m.read_lockdown_pa(Side::Data), 0x0005_0000 | 1 << 6 | 3 << 1 | 1);

    // A regular walk-filled entry next to it.
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));
    assert!(m.resolve(&mut core, AccessReq::read(VA, 4)).is_ok());
    assert_eq!(m.resolve(&mut core, AccessReq::read(va + 8, 4)), Verdict::Ok(0x5_0008));

    map_small(&m, VA, SmallV6Bits::new().with_base(0x30 << 12).with_ap(3));
    m.invalidate_all(Target::Both);

    assert_eq!(m.resolve(&mut core, AccessReq::read(va + 8, 4)), Verdict::Ok(0x5_0008));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 4)).pa(), Some(0x30456));
}

#[test]
fn lockdown_rewrite_is_seen_immediately() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let va = 0x0040_0000;

    m.write_lockdown_index(Side::Data, 3);
    m.write_lockdown_va(Side::Data, va | 1 << 9);
    m.write_lockdown_pa(Side::Data, 0x0005_0000 | 1 << 6 | 3 << 1 | 1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(va, 4)), Verdict::Ok(0x5_0000));

    m.write_lockdown_pa(Side::Data, 0x0006_0000 | 1 << 6 | 3 << 1 | 1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(va, 4)), Verdict::Ok(0x6_0000));

    // Marking the slot invalid leaves nothing behind.
    m.write_lockdown_pa(Side::Data, 0x0006_0000 | 1 << 6 | 3 << 1);
    let fault = m.resolve(&mut core, AccessReq::read(va, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::TranslationSection);
}

#[test]
fn domain_downgrade_flushes_aliases() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(0));

    // Manager: permissions are not checked.
    m.write_dacr(&core, 0b11);
    assert!(m.resolve(&mut core, AccessReq::write(VA, 4)).is_ok());

    // Client: AP=0 grants nothing, and the alias must not survive.
    m.write_dacr(&core, 0b01);
    let fault = m.resolve(&mut core, AccessReq::write(VA, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::PermissionPage);

    m.write_dacr(&core, 0b00);
    let fault = m.resolve(&mut core, AccessReq::read(VA, 4)).fault().unwrap();
    assert_eq!((fault.status, fault.domain), (FaultStatus::DomainPage, 0));
}

#[test]
fn alignment_faults() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));

    assert!(m.resolve(&mut core, AccessReq::read(VA + 1, 4)).is_ok());
    m.write_sctlr(ControlReg::M | ControlReg::XP | ControlReg::A);
    let fault = m.resolve(&mut core, AccessReq::read(VA + 1, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::Alignment);
    // Fetches and byte accesses are not checked.
    assert!(m.resolve(&mut core, AccessReq::fetch(VA + 2, 4)).is_ok());
    assert!(m.resolve(&mut core, AccessReq::read(VA + 1, 1)).is_ok());
}

#[test]
fn speculative_requests_do_not_abort() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let v = m.resolve(&mut core, AccessReq::read(VA, 4).speculative());
    assert_eq!(v.fault().map(|f| f.status), Some(FaultStatus::TranslationSection));
    assert!(core.aborts.is_empty());
}

#[test]
fn virtual_read_write() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));

    let va = VA & !3;
    assert!(m.write_virt::<u32>(&mut core, va, 0xdead_beef).unwrap());
    assert_eq!(m.mem.read().read::<u32>(0x20454, Endian::Little).unwrap(), 0xdead_beef);
    assert_eq!(m.read_virt::<u16>(&mut core, va).unwrap(), Some(0xbeef));
    assert_eq!(m.read_virt::<u32>(&mut core, 0x0080_0000).unwrap(), None);
}

#[test]
fn va_to_pa() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let page = SmallV6Bits::new().with_base(0x20 << 12).with_ap(2).with_s(true);
    map_small(&m, VA, page);

    let par = m.translate_va(&mut core, VA, VaToPaOp::USER_READ);
    // Strongly ordered, shareable.
    assert_eq!(par, 0x0002_0000 | 1 << 7 | 0b001 << 4);
    assert_eq!(m.regs.par, par);

    let par = m.translate_va(&mut core, VA, VaToPaOp::USER_WRITE);
    assert_eq!(par, (FaultStatus::PermissionPage.code() as u32) << 1 | 1);
    assert!(core.aborts.is_empty());

    assert!(m.resolve(&mut core, AccessReq::write(VA, 4)).is_ok());
}

#[test]
fn fcse_remap() {
    let mem = Arc::new(RwLock::new(PhysMemory::new(0x10_0000)));
    let mut m = Mmu::new(VmConfig::fcse_only(), mem);
    let mut core = SimpleCore::new(true);

    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Ok(0x1000));

    m.write_fcse_pid(3 << 25);
    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)).pa(), Some(0x0600_1000));
    // Addresses outside the low window are not relocated.
    assert_eq!(m.resolve(&mut core, AccessReq::read(0x0400_1000, 4)).pa(), Some(0x0400_1000));

    m.write_fcse_pid(0);
    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Ok(0x1000));
}

#[test]
fn ttbcr_split_walks() {
    let (mut m, mut core) = setup(VmConfig::cortex_a8());
    m.write_ttbr1(0xc000);
    m.write_ttbcr(1);
    let sect = SectionV6Bits::new().with_base(0).with_ap(3);
    // 0x8000_0000 goes through TTBR1, at index 0x800.
    put(&m, 0xc000 + 0x800 * 4, sect.0);
    assert_eq!(m.resolve(&mut core, AccessReq::read(0x8000_0010, 4)).pa(), Some(0x10));

    m.write_ttbcr(1 | 0x20);
    m.invalidate_all(Target::Both);
    let fault = m.resolve(&mut core, AccessReq::read(0x8000_0010, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::TranslationSection);
}

#[test]
fn invalidate_mva_forms() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let global = |base: u32| SmallV6Bits::new().with_base(base << 12).with_ap(3);

    m.write_contextidr(1);
    map_small(&m, VA, global(0x20));
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x20456));

    // A global entry goes away even when another ASID is named.
    map_small(&m, VA, global(0x30));
    m.invalidate_mva_asid(Target::Both, (VA & 0xffff_f000) | 7);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x30456));

    // Non-global entries of any ASID go away under the all-ASID form.
    map_small(&m, VA, global(0x20).with_ng(true));
    m.invalidate_all(Target::Both);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x20456));
    m.write_contextidr(2);
    map_small(&m, VA, global(0x30).with_ng(true));
    m.invalidate_mva_all_asid(Target::Both, VA);
    m.write_contextidr(1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 1)).pa(), Some(0x30456));

    // Lockdown entries survive invalidation by MVA.
    let va = 0x0040_0000;
    m.write_lockdown_index(Side::Data, 0);
    m.write_lockdown_va(Side::Data, va | 1 << 9);
    m.write_lockdown_pa(Side::Data, 0x0005_0000 | 1 << 6 | 3 << 1 | 1);
    assert_eq!(m.resolve(&mut core, AccessReq::read(va, 4)), Verdict::Ok(0x5_0000));
    m.invalidate_mva(Target::Both, va);
    m.invalidate_mva_all_asid(Target::Both, va);
    assert_eq!(m.resolve(&mut core, AccessReq::read(va, 4)), Verdict::Ok(0x5_0000));
}

#[test]
fn access_across_pages() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let va = 0x0012_3ffe;
    map_small(&m, 0x0012_3000, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));
    map_small(&m, 0x0012_4000, SmallV6Bits::new().with_base(0x21 << 12).with_ap(3));

    assert!(m.write_virt::<u32>(&mut core, va, 0x1122_3344).unwrap());
    assert_eq!(m.mem.read().read::<u16>(0x20ffe, Endian::Little).unwrap(), 0x3344);
    assert_eq!(m.mem.read().read::<u16>(0x21000, Endian::Little).unwrap(), 0x1122);
    assert_eq!(m.domains.lookup(DATA, 0x0012_4000).map(|a| a.pa_of(0x0012_4000)), Some(0x21000));

    // The second page goes away: nothing of the access may land.
    put(&m, L2 + 0x24 * 4, 0);
    m.invalidate_mva(Target::Both, 0x0012_4000);
    assert!(!m.write_virt::<u32>(&mut core, va, 0x5566_7788).unwrap());
    assert_eq!(m.mem.read().read::<u16>(0x20ffe, Endian::Little).unwrap(), 0x3344);
    let fault = core.last_abort().copied().unwrap();
    assert_eq!((fault.status, fault.va, fault.write), (FaultStatus::TranslationPage, 0x0012_4000, true));
    assert_eq!(core.aborts.len(), 1);
}

#[test]
fn permitted_but_unbacked() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    map_small(&m, VA, SmallV6Bits::new().with_base(0x200 << 12).with_ap(3));

    assert_eq!(m.resolve(&mut core, AccessReq::read(VA, 4)), Verdict::Bad(0x0020_0456));
    assert!(core.aborts.is_empty());
    assert!(m.read_virt::<u32>(&mut core, VA & !3).is_err());
}

#[test]
fn fcse_aliases_do_not_cross_the_window() {
    let cfg = VmConfig { fcse: true, ..VmConfig::cortex_r4() };
    let mem = Arc::new(RwLock::new(PhysMemory::new(0x10_0000)));
    let mut m = Mmu::new(cfg, mem);
    let mut core = SimpleCore::new(true);
    // One 64MB region spanning the low window and its relocation.
    m.write_mpu_rgnr(0);
    m.write_mpu_base(Side::Data, 0);
    m.write_mpu_access(Side::Data, 0b011 << 8);
    m.write_mpu_size_enable(Side::Data, 25 << 1 | 1);
    m.write_fcse_pid(FCSE_PID);
    m.write_sctlr(ControlReg::M);

    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Bad(0x0200_1000));
    let low = m.domains.lookup(DATA, 0x1000).unwrap();
    assert_eq!((low.lo, low.hi, low.pa), (0, 0x01ff_ffff, 0x0200_0000));
    assert!(m.domains.lookup(DATA, 0x0200_0000).is_none());

    assert_eq!(m.resolve(&mut core, AccessReq::read(0x0300_0000, 4)), Verdict::Bad(0x0300_0000));
    let high = m.domains.lookup(DATA, 0x0300_0000).unwrap();
    assert_eq!((high.lo, high.hi, high.pa), (0x0200_0000, 0x03ff_ffff, 0x0200_0000));
    assert_eq!(m.domains.lookup(DATA, 0x1000), Some(low));
}

#[test]
fn fcse_twin_follows_invalidation() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    let page = |base: u32| SmallV6Bits::new().with_base(base << 12).with_ap(3);
    m.write_fcse_pid(FCSE_PID);
    map_small(&m, FCSE_PID | 0x1000, page(0x20));

    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Ok(0x20000));
    assert_eq!(m.domains.lookup(DATA, 0x1000).map(|a| a.pa_of(0x1000)), Some(0x20000));

    map_small(&m, FCSE_PID | 0x1000, page(0x30));
    m.invalidate_mva(Target::Both, FCSE_PID | 0x1000);
    assert!(m.domains.lookup(DATA, 0x1000).is_none());
    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Ok(0x30000));
}

#[test]
fn fcse_pid_change_keeps_direct_aliases() {
    let (mut m, mut core) = setup(VmConfig::arm1136jfs());
    m.write_fcse_pid(FCSE_PID);
    map_small(&m, FCSE_PID | 0x1000, SmallV6Bits::new().with_base(0x20 << 12).with_ap(3));

    assert_eq!(m.resolve(&mut core, AccessReq::read(0x1000, 4)), Verdict::Ok(0x20000));
    assert_eq!(m.resolve(&mut core, AccessReq::read(FCSE_PID | 0x1000, 4)), Verdict::Ok(0x20000));

    m.write_fcse_pid(2 << 25);
    assert!(m.domains.lookup(DATA, 0x1000).is_none());
    assert!(m.domains.lookup(DATA, FCSE_PID | 0x1000).is_some());

    // The low window now relocates to 0x0400_0000, where nothing is mapped.
    let fault = m.resolve(&mut core, AccessReq::read(0x1000, 4)).fault().unwrap();
    assert_eq!(fault.status, FaultStatus::TranslationSection);
    assert_eq!(m.resolve(&mut core, AccessReq::read(FCSE_PID | 0x1000, 4)), Verdict::Ok(0x20000));
}
