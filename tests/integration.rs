//! Full-stack integration tests: a `Platform` driven purely through its
//! public surface (no access to `Hart`/`Mmu`/`Csr` internals), executing
//! real instruction streams rather than calling executor functions
//! directly. These exercise an ECALL trap, an Sv39 page-table walk, PLIC
//! claim/complete and a CLINT timer interrupt the way the whole system
//! would actually see them: fetched, decoded and executed through
//! `Platform::step`, not unit-tested in isolation.

use rv64emu::csr;
use rv64emu::platform::{Platform, PLIC_BASE, RAM_BASE, UART_BASE};
use rv64emu::trap::Privilege;

const OPC_LUI: u32 = 0x37;
const OPC_LOAD: u32 = 0x03;
const OPC_OP_IMM: u32 = 0x13;
const OPC_OP: u32 = 0x33;
const OPC_SYSTEM: u32 = 0x73;

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn i_type(imm: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (imm << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn u_type(imm20: u32, rd: u32, opcode: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | opcode
}

fn addi(rd: u32, rs1: u32, imm12: u32) -> u32 {
    i_type(imm12 & 0xfff, rs1, 0, rd, OPC_OP_IMM)
}

fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0, rd, OPC_OP)
}

fn lui(rd: u32, imm20: u32) -> u32 {
    u_type(imm20, rd, OPC_LUI)
}

fn ld(rd: u32, rs1: u32, imm12: u32) -> u32 {
    i_type(imm12 & 0xfff, rs1, 0b011, rd, OPC_LOAD)
}

const ECALL: u32 = OPC_SYSTEM; // all other fields zero

fn write_program(platform: &Platform, words: &[u32]) {
    for (n, word) in words.iter().enumerate() {
        platform
            .bus_store(RAM_BASE + 4 * n as u64, 4, *word as u64)
            .unwrap();
    }
}

#[test]
fn runs_a_small_arithmetic_program_end_to_end() {
    let mut platform = Platform::new();
    write_program(
        &platform,
        &[
            addi(1, 0, 5),  // x1 = 5
            addi(2, 0, 7),  // x2 = 7
            add(3, 1, 2),   // x3 = x1 + x2
        ],
    );

    platform.step();
    platform.step();
    platform.step();

    assert_eq!(platform.x(1), 5);
    assert_eq!(platform.x(2), 7);
    assert_eq!(platform.x(3), 12);
    assert_eq!(platform.minstret(), 3);
    assert_eq!(platform.pc(), RAM_BASE + 12);
}

/// Driven end-to-end: an ECALL instruction fetched, decoded and executed
/// by `Platform::step` takes the M-mode trap path and lands at `mtvec`.
#[test]
fn ecall_instruction_traps_through_the_full_tick_loop() {
    let mut platform = Platform::new();
    write_program(&platform, &[ECALL]);
    platform.write_csr(csr::MTVEC, 0x1000_0000).unwrap();

    platform.step();

    assert_eq!(platform.pc(), 0x1000_0000);
    assert_eq!(platform.read_csr(csr::MCAUSE).unwrap(), 11);
    assert_eq!(platform.read_csr(csr::MEPC).unwrap(), RAM_BASE);
    assert_eq!(platform.priv_mode(), Privilege::Machine);
    // An instruction that traps never retires.
    assert_eq!(platform.minstret(), 0);
    assert_eq!(platform.mcycle(), 1);
}

/// Driven end-to-end: a real `ld` instruction resolves a
/// 2 MiB Sv39 superpage mapping. The page tables are seeded directly via
/// `bus_store` (playing the role of an external loader setting up a
/// guest's page tables before it runs), but the translation itself is
/// exercised by the hart's `ld` executing through the MMU, not called
/// directly. `mstatus.MPRV`+`MPP=S` makes the data access (but not the
/// instruction fetch, which stays physical) go through translation while
/// the hart remains in M-mode, matching the privileged spec's definition
/// of MPRV.
#[test]
fn sv39_superpage_translation_reached_through_a_real_load_instruction() {
    let mut platform = Platform::new();

    let root_table_pa = RAM_BASE + 0x2000;
    let l1_table_pa = RAM_BASE + 0x3000;
    let leaf_page_pa = RAM_BASE + 0x0020_0000;
    let vaddr: u32 = 0x0020_0000;

    let l1_ppn = l1_table_pa >> 12;
    let root_pte = 1u64 /* V */ | (l1_ppn << 10);
    platform.bus_store(root_table_pa, 8, root_pte).unwrap(); // vpn[2] == 0

    let leaf_ppn = leaf_page_pa >> 12;
    let leaf_pte = 1u64 /* V */
        | (1 << 1) /* R */
        | (1 << 2) /* W */
        | (1 << 3) /* X */
        | (1 << 6) /* A */
        | (1 << 7) /* D */
        | (leaf_ppn << 10);
    platform
        .bus_store(l1_table_pa + 8 /* vpn[1] == 1 */, 8, leaf_pte)
        .unwrap();

    platform
        .bus_store(leaf_page_pa, 8, 0xdead_beef_cafe_babe)
        .unwrap();

    let satp_ppn = root_table_pa >> 12;
    platform.write_csr(csr::SATP, (8u64 << 60) | satp_ppn).unwrap();

    const MSTATUS_MPRV: u64 = 1 << 17;
    const MSTATUS_MPP_SUPERVISOR: u64 = 0b01 << 11;
    platform
        .write_csr(csr::MSTATUS, MSTATUS_MPRV | MSTATUS_MPP_SUPERVISOR)
        .unwrap();

    write_program(
        &platform,
        &[
            lui(1, vaddr >> 12), // x1 = 0x0020_0000
            ld(2, 1, 0),         // x2 = *(u64*)x1, translated via Sv39
        ],
    );

    platform.step();
    platform.step();

    assert_eq!(platform.x(2), 0xdead_beef_cafe_babe);
    assert_eq!(platform.minstret(), 2);
    // Still in M-mode: MPRV only changes the effective privilege for the
    // data access's permission checks, not the hart's actual priv_mode.
    assert_eq!(platform.priv_mode(), Privilege::Machine);
}

/// Driven through the platform's real address map: the PLIC is configured
/// and claimed/completed via memory-mapped loads and stores at its
/// documented offsets, not via its Rust API directly.
#[test]
fn plic_claim_and_complete_through_memory_mapped_registers() {
    let mut platform = Platform::new();
    write_program(&platform, &[addi(0, 0, 0)]); // harmless nop, never retires here

    const PRIORITY_BASE: u64 = PLIC_BASE;
    const ENABLE_BASE: u64 = PLIC_BASE + 0x2000;
    const CONTEXT_BASE: u64 = PLIC_BASE + 0x20_0000;
    const CLAIM_OFFSET: u64 = 4;

    platform.bus_store(PRIORITY_BASE + 4 * 1, 4, 5).unwrap(); // priority[1] = 5
    platform.bus_store(ENABLE_BASE, 4, 1 << 1).unwrap(); // enable source 1, ctx 0 (M)

    // Source 1 is wired to the UART on the reference map; driving it
    // through the real UART device (rather than Plic::update_ext
    // directly) exercises the Platform::step wiring between the two.
    platform.uart().putc(b'Q');
    platform.step(); // samples uart.irq() -> plic pending, then claim-selects it

    let claimed = platform.bus_load(CONTEXT_BASE + CLAIM_OFFSET, 4).unwrap();
    assert_eq!(claimed, 1);

    // UART interrupt source starts back at 0 only after completing the
    // claim; reading again is idempotent (claim-on-read does not
    // re-select until get_interrupt runs again).
    platform
        .bus_store(CONTEXT_BASE + CLAIM_OFFSET, 4, claimed)
        .unwrap();

    // The UART's own IRQ line is still asserted (wait_ack not yet
    // cleared, rx not drained), so the next step's sampling re-selects it.
    platform.step();
    let reclaimed = platform.bus_load(CONTEXT_BASE + CLAIM_OFFSET, 4).unwrap();
    assert_eq!(reclaimed, 1);
}

/// Driven through the full device stack and memory map: the CLINT ticks
/// via its own `tick()`, the hart observes `mtip` through `Platform::step`'s
/// line sampling, and takes interrupt #7.
#[test]
fn clint_timer_interrupt_taken_through_the_full_tick_loop() {
    let mut platform = Platform::new();
    write_program(&platform, &[addi(0, 0, 0)]);
    platform.write_csr(csr::MSTATUS, 1 << 3).unwrap(); // MIE
    platform.write_csr(csr::MIE, 1 << 7).unwrap(); // MTIE
    platform.write_csr(csr::MTVEC, 0x1000_0000).unwrap();

    const MTIMECMP_OFFSET: u64 = 0x4000;
    const MTIME_OFFSET: u64 = 0xbff8;
    let clint_base = rv64emu::platform::CLINT_BASE;
    platform.bus_store(clint_base + MTIMECMP_OFFSET, 8, 0).unwrap();
    platform.clint().tick(); // mtime = 1 > mtimecmp[0] = 0
    let _ = platform.bus_load(clint_base + MTIME_OFFSET, 8).unwrap();

    platform.step();

    assert_eq!(platform.pc(), 0x1000_0000);
    assert_eq!(platform.read_csr(csr::MCAUSE).unwrap(), (1u64 << 63) | 7);
}

#[test]
fn uart_is_reachable_at_its_documented_base_address() {
    let platform = Platform::new();
    // Status register starts out tx-empty (bit 2), rx-invalid.
    assert_eq!(platform.bus_load(UART_BASE + 0x8, 4).unwrap(), 0b100);
}
