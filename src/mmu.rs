//! Sv39 MMU: TLB lookup/install/flush and the three-level page-table walk,
//! plus the fetch/load/store entry points that translate a bus access
//! failure into the right architectural fault.
//!
//! No equivalent exists elsewhere in this workspace (the rest of this
//! crate's inherited reference code is M-mode-only with no virtual memory);
//! grounded directly in `original_source/include/cpu/mmu.h` and
//! `src/cpu/mmu.cc` for the walk, TLB tag/superpage, and permission-check
//! semantics, expressed in owned structs and `Result`-returning methods
//! matching `src/csr.rs`'s style rather than the original's packed C
//! bit-fields.

use crate::bus::Bus;
use crate::csr::Csr;
use crate::trap::{Exception, Privilege};

/// Fully-associative TLB size. The original carries a toy `kTlbSize = 2`
/// for its own test corpus; a real hart benefits from more entries, so
/// this crate uses a still-small but less pathological size.
const TLB_SIZE: usize = 64;

const PAGE_SHIFT: u64 = 12;
const SV39_MODE: u64 = 8;

#[derive(Copy, Clone, Debug, Default)]
struct TlbEntry {
    ppn: u64,
    tag: u64,
    asid: u16,
    r: bool,
    w: bool,
    x: bool,
    u: bool,
    g: bool,
    a: bool,
    d: bool,
    /// 0 = invalid entry; 1/2/3 = 4 KiB / 2 MiB / 1 GiB page.
    page_size: u8,
}

/// Number of low address bits covered by a page of the given `page_size`
/// (1/2/3 -> 4 KiB/2 MiB/1 GiB): `12 + 9*(page_size-1)`.
fn page_bits(page_size: u8) -> u32 {
    12 + 9 * (page_size as u32 - 1)
}

fn tlb_tag(vaddr: u64, page_size: u8) -> u64 {
    let bits = page_bits(page_size);
    vaddr & (u64::MAX << bits)
}

struct Pte {
    v: bool,
    r: bool,
    w: bool,
    x: bool,
    u: bool,
    g: bool,
    a: bool,
    d: bool,
    rsw: u64,
    ppn_0: u64,
    ppn_1: u64,
    ppn_2: u64,
    reserved: u64,
    pbmt: u64,
}

impl Pte {
    fn from_word(word: u64) -> Self {
        Self {
            v: word & 1 != 0,
            r: word & (1 << 1) != 0,
            w: word & (1 << 2) != 0,
            x: word & (1 << 3) != 0,
            u: word & (1 << 4) != 0,
            g: word & (1 << 5) != 0,
            a: word & (1 << 6) != 0,
            d: word & (1 << 7) != 0,
            rsw: (word >> 8) & 0x3,
            ppn_0: (word >> 10) & 0x1ff,
            ppn_1: (word >> 19) & 0x1ff,
            ppn_2: (word >> 28) & 0x3ff_ffff,
            reserved: (word >> 54) & 0x7f,
            pbmt: (word >> 61) & 0x3,
        }
    }

    fn is_leaf(&self) -> bool {
        self.r || self.w || self.x
    }

    fn ppn(&self) -> u64 {
        self.ppn_0 | (self.ppn_1 << 9) | (self.ppn_2 << 18)
    }
}

fn vpn(vaddr: u64, level: u32) -> u64 {
    (vaddr >> (12 + 9 * level)) & 0x1ff
}

/// `satp`'s three fields, unpacked once per translation.
struct Satp {
    mode: u64,
    asid: u16,
    ppn: u64,
}

impl Satp {
    fn from_word(word: u64) -> Self {
        Self {
            mode: (word >> 60) & 0xf,
            asid: ((word >> 44) & 0xffff) as u16,
            ppn: word & 0xfff_ffff_ffff,
        }
    }
}

/// Sv39 MMU: an owned TLB plus the `Bus` access that backs page-table
/// walks and the final physical access. The bus and CSR file are passed
/// in at call time rather than stored, since the hart already owns both
/// and a stored reference would recreate the cyclic-ownership problem
/// design note 9 calls out; this is this crate's resolution of it.
#[derive(Default)]
pub struct Mmu {
    tlb: [TlbEntry; TLB_SIZE],
    index: usize,
}

impl Mmu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.tlb = [TlbEntry::default(); TLB_SIZE];
        self.index = 0;
    }

    fn lookup_tlb(&self, satp: &Satp, vaddr: u64) -> Option<&TlbEntry> {
        self.tlb.iter().find(|entry| {
            entry.page_size != 0
                && (entry.g || entry.asid == satp.asid)
                && tlb_tag(vaddr, entry.page_size) == entry.tag
        })
    }

    fn walk(&self, bus: &Bus, satp: &Satp, vaddr: u64) -> Option<(Pte, u8)> {
        if satp.mode != SV39_MODE {
            return None;
        }
        let mut table_addr = satp.ppn << PAGE_SHIFT;
        for level in (0..=2).rev() {
            let index = vpn(vaddr, level);
            let pte_addr = table_addr + index * 8;
            let word = bus.load(pte_addr, 8).ok()?;
            let pte = Pte::from_word(word);
            if !pte.v || (pte.w && !pte.r) || pte.reserved != 0 || pte.pbmt != 0 {
                return None;
            }
            if pte.is_leaf() {
                let page_size = (level + 1) as u8;
                let ppn_invalid = (level == 2 && (pte.ppn_1 != 0 || pte.ppn_0 != 0))
                    || (level == 1 && pte.ppn_0 != 0);
                if ppn_invalid {
                    return None;
                }
                return Some((pte, page_size));
            }
            table_addr = pte.ppn() << PAGE_SHIFT;
        }
        None
    }

    /// Look up a TLB entry for `vaddr`, walking and installing on miss.
    /// Returns `None` on an illegal virtual address, a non-Sv39 mode, or a
    /// page-table walk failure.
    fn translate(&mut self, bus: &Bus, satp_word: u64, vaddr: u64) -> Option<TlbEntry> {
        let legal = vaddr <= 0x0000_003f_ffff_ffff || vaddr >= 0xffff_ffc0_0000_0000;
        if !legal {
            return None;
        }
        let satp = Satp::from_word(satp_word);
        if let Some(entry) = self.lookup_tlb(&satp, vaddr) {
            return Some(*entry);
        }
        let (pte, page_size) = self.walk(bus, &satp, vaddr)?;
        let entry = TlbEntry {
            ppn: pte.ppn(),
            tag: tlb_tag(vaddr, page_size),
            asid: satp.asid,
            r: pte.r,
            w: pte.w,
            x: pte.x,
            u: pte.u,
            g: pte.g,
            a: pte.a,
            d: pte.d,
            page_size,
        };
        let _ = pte.rsw;
        self.tlb[self.index] = entry;
        self.index = (self.index + 1) % TLB_SIZE;
        Some(entry)
    }

    fn map(entry: &TlbEntry, vaddr: u64) -> u64 {
        let bits = page_bits(entry.page_size);
        (entry.ppn << PAGE_SHIFT) + (vaddr & ((1 << bits) - 1))
    }

    fn crosses_page(addr: u64, width: u8) -> bool {
        (addr >> PAGE_SHIFT) != ((addr + width as u64 - 1) >> PAGE_SHIFT)
    }

    fn use_phys_addr_for_fetch(priv_mode: Privilege, satp_mode: u64) -> bool {
        priv_mode == Privilege::Machine || satp_mode == 0
    }

    fn use_phys_addr_for_data(priv_mode: Privilege, satp_mode: u64, csr: &Csr) -> bool {
        satp_mode == 0
            || (priv_mode == Privilege::Machine
                && (!csr.mstatus_mprv() || csr.mstatus_mpp() == Privilege::Machine))
    }

    /// Effective privilege for U/S permission checks: MPRV lets M-mode
    /// borrow MPP's privilege for data accesses only.
    fn effective_privilege(priv_mode: Privilege, csr: &Csr) -> Privilege {
        if csr.mstatus_mprv() && priv_mode == Privilege::Machine {
            csr.mstatus_mpp()
        } else {
            priv_mode
        }
    }

    /// Instruction fetch. A 4-byte fetch starting at a half-word-aligned
    /// (but not word-aligned) address is split into two 2-byte fetches so
    /// a page-crossing 4-byte instruction can still be read, matching the
    /// original's split-fetch recursion.
    pub fn fetch(
        &mut self,
        bus: &Bus,
        csr: &Csr,
        priv_mode: Privilege,
        addr: u64,
        width: u8,
    ) -> Result<u64, Exception> {
        if width == 4 && addr % 4 == 2 {
            let lo = self.fetch(bus, csr, priv_mode, addr, 2)? as u64;
            let hi = match self.fetch(bus, csr, priv_mode, addr + 2, 2) {
                Ok(hi) => hi,
                Err(_) => return Err(Exception::InstructionAccessFault),
            };
            return Ok(lo | (hi << 16));
        }

        let satp_word = csr.satp();
        let satp_mode = (satp_word >> 60) & 0xf;
        if Self::use_phys_addr_for_fetch(priv_mode, satp_mode) {
            return bus
                .load(addr, width)
                .map_err(|_| Exception::InstructionAccessFault);
        }

        if Self::crosses_page(addr, width) {
            return Err(Exception::InstructionAddressMisaligned);
        }

        let entry = self
            .translate(bus, satp_word, addr)
            .ok_or(Exception::InstructionPageFault)?;
        if !entry.a || !entry.x {
            return Err(Exception::InstructionPageFault);
        }
        if (priv_mode == Privilege::User && !entry.u)
            || (priv_mode == Privilege::Supervisor && entry.u)
        {
            return Err(Exception::InstructionPageFault);
        }

        let phys = Self::map(&entry, addr);
        bus.load(phys, width)
            .map_err(|_| Exception::InstructionAccessFault)
    }

    pub fn load(
        &mut self,
        bus: &Bus,
        csr: &Csr,
        priv_mode: Privilege,
        addr: u64,
        width: u8,
    ) -> Result<u64, Exception> {
        let satp_word = csr.satp();
        let satp_mode = (satp_word >> 60) & 0xf;
        if Self::use_phys_addr_for_data(priv_mode, satp_mode, csr) {
            return bus.load(addr, width).map_err(|_| Exception::LoadAccessFault);
        }

        if Self::crosses_page(addr, width) {
            return Err(Exception::LoadAddressMisaligned);
        }

        let entry = self
            .translate(bus, satp_word, addr)
            .ok_or(Exception::LoadPageFault)?;
        if !entry.a || !(entry.r || (csr.mstatus_mxr() && entry.x)) {
            return Err(Exception::LoadPageFault);
        }
        let real_mode = Self::effective_privilege(priv_mode, csr);
        if real_mode == Privilege::User && !entry.u {
            return Err(Exception::LoadPageFault);
        }
        if !csr.mstatus_sum() && real_mode == Privilege::Supervisor && entry.u {
            return Err(Exception::LoadAccessFault);
        }

        let phys = Self::map(&entry, addr);
        bus.load(phys, width).map_err(|_| Exception::LoadAccessFault)
    }

    pub fn store(
        &mut self,
        bus: &Bus,
        csr: &Csr,
        priv_mode: Privilege,
        addr: u64,
        width: u8,
        value: u64,
    ) -> Result<(), Exception> {
        let satp_word = csr.satp();
        let satp_mode = (satp_word >> 60) & 0xf;
        if Self::use_phys_addr_for_data(priv_mode, satp_mode, csr) {
            return bus
                .store(addr, width, value)
                .map_err(|_| Exception::StoreAccessFault);
        }

        if Self::crosses_page(addr, width) {
            return Err(Exception::StoreAddressMisaligned);
        }

        let entry = self
            .translate(bus, satp_word, addr)
            .ok_or(Exception::StorePageFault)?;
        // A clear dirty bit is treated the same as a missing mapping,
        // matching the hardware convention the original targets.
        if !entry.a || !entry.w || !entry.d {
            return Err(Exception::StorePageFault);
        }
        let real_mode = Self::effective_privilege(priv_mode, csr);
        if real_mode == Privilege::User && !entry.u {
            return Err(Exception::StorePageFault);
        }
        if !csr.mstatus_sum() && real_mode == Privilege::Supervisor && entry.u {
            return Err(Exception::StoreAccessFault);
        }

        let phys = Self::map(&entry, addr);
        bus.store(phys, width, value)
            .map_err(|_| Exception::StoreAccessFault)
    }

    /// Invalidate TLB entries matching `asid` (or all if `asid == 0`) and
    /// matching the tag derived from `vaddr` at each entry's own page size
    /// (or all if `vaddr == 0`).
    pub fn flush_tlb(&mut self, vaddr: u64, asid: u16) {
        for entry in self.tlb.iter_mut() {
            if asid != 0 && entry.asid != asid {
                continue;
            }
            if vaddr == 0 {
                entry.page_size = 0;
            } else if entry.page_size != 0 && entry.tag == tlb_tag(vaddr, entry.page_size) {
                entry.page_size = 0;
            }
        }
    }
}
