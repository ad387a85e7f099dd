//! T-state timing against the documented instruction table.
//!
//! Each case runs a short program from address 0 and compares the summed
//! `step()` returns (prefix fetches included) with the documented total.

use zilog_z80::{FlatBus, Z80};

/// Run `steps` CPU steps over `program` and return total T-states.
fn time_of(program: &[u8], steps: usize, setup: impl FnOnce(&mut Z80, &mut FlatBus)) -> u32 {
    let mut bus = FlatBus::new();
    bus.load(0x0000, program);
    let mut cpu = Z80::new();
    cpu.reset();
    cpu.set_sp(0xFF00);
    setup(&mut cpu, &mut bus);
    (0..steps).map(|_| cpu.step(&mut bus)).sum()
}

fn time(program: &[u8], steps: usize) -> u32 {
    time_of(program, steps, |_, _| {})
}

#[test]
fn main_table_timings() {
    assert_eq!(time(&[0x00], 1), 4, "NOP");
    assert_eq!(time(&[0x3E, 0x00], 1), 7, "LD A,n");
    assert_eq!(time(&[0x01, 0x00, 0x00], 1), 10, "LD BC,nn");
    assert_eq!(time(&[0x47], 1), 4, "LD B,A");
    assert_eq!(time(&[0x7E], 1), 7, "LD A,(HL)");
    assert_eq!(time(&[0x77], 1), 7, "LD (HL),A");
    assert_eq!(time(&[0x36, 0x12], 1), 10, "LD (HL),n");
    assert_eq!(time(&[0x0A], 1), 7, "LD A,(BC)");
    assert_eq!(time(&[0x02], 1), 7, "LD (BC),A");
    assert_eq!(time(&[0x3A, 0x00, 0x80], 1), 13, "LD A,(nn)");
    assert_eq!(time(&[0x32, 0x00, 0x80], 1), 13, "LD (nn),A");
    assert_eq!(time(&[0x2A, 0x00, 0x80], 1), 16, "LD HL,(nn)");
    assert_eq!(time(&[0x22, 0x00, 0x80], 1), 16, "LD (nn),HL");
    assert_eq!(time(&[0xF9], 1), 6, "LD SP,HL");
    assert_eq!(time(&[0x03], 1), 6, "INC BC");
    assert_eq!(time(&[0x0B], 1), 6, "DEC BC");
    assert_eq!(time(&[0x3C], 1), 4, "INC A");
    assert_eq!(time(&[0x34], 1), 11, "INC (HL)");
    assert_eq!(time(&[0x09], 1), 11, "ADD HL,BC");
    assert_eq!(time(&[0x80], 1), 4, "ADD A,B");
    assert_eq!(time(&[0x86], 1), 7, "ADD A,(HL)");
    assert_eq!(time(&[0xC6, 0x01], 1), 7, "ADD A,n");
    assert_eq!(time(&[0x27], 1), 4, "DAA");
    assert_eq!(time(&[0x07], 1), 4, "RLCA");
    assert_eq!(time(&[0x76], 1), 4, "HALT");
    assert_eq!(time(&[0xC3, 0x00, 0x10], 1), 10, "JP nn");
    assert_eq!(time(&[0xE9], 1), 4, "JP (HL)");
    assert_eq!(time(&[0xCD, 0x00, 0x10], 1), 17, "CALL nn");
    assert_eq!(time(&[0xC9], 1), 10, "RET");
    assert_eq!(time(&[0xC5], 1), 11, "PUSH BC");
    assert_eq!(time(&[0xC1], 1), 10, "POP BC");
    assert_eq!(time(&[0xE3], 1), 19, "EX (SP),HL");
    assert_eq!(time(&[0xEB], 1), 4, "EX DE,HL");
    assert_eq!(time(&[0xD9], 1), 4, "EXX");
    assert_eq!(time(&[0xEF], 1), 11, "RST 28h");
    assert_eq!(time(&[0xD3, 0xFF], 1), 11, "OUT (n),A");
    assert_eq!(time(&[0xDB, 0xFF], 1), 11, "IN A,(n)");
    assert_eq!(time(&[0xF3], 1), 4, "DI");
}

#[test]
fn conditional_timings() {
    // Z is clear after reset (F = 0)
    assert_eq!(time(&[0xC2, 0x00, 0x10], 1), 10, "JP NZ taken");
    assert_eq!(time(&[0xCA, 0x00, 0x10], 1), 10, "JP Z not taken (same cost)");
    assert_eq!(time(&[0xC4, 0x00, 0x10], 1), 17, "CALL NZ taken");
    assert_eq!(time(&[0xCC, 0x00, 0x10], 1), 10, "CALL Z not taken");
    assert_eq!(time(&[0xC0], 1), 11, "RET NZ taken");
    assert_eq!(time(&[0xC8], 1), 5, "RET Z not taken");
    assert_eq!(time(&[0x20, 0x02], 1), 12, "JR NZ taken");
    assert_eq!(time(&[0x28, 0x02], 1), 7, "JR Z not taken");
    assert_eq!(time(&[0x18, 0x02], 1), 12, "JR");

    // DJNZ: 13 taken, 8 when B reaches zero
    assert_eq!(
        time_of(&[0x10, 0xFE], 1, |cpu, _| cpu.regs.b = 2),
        13,
        "DJNZ taken"
    );
    assert_eq!(
        time_of(&[0x10, 0xFE], 1, |cpu, _| cpu.regs.b = 1),
        8,
        "DJNZ not taken"
    );
}

#[test]
fn cb_table_timings() {
    assert_eq!(time(&[0xCB, 0x07], 2), 8, "RLC A");
    assert_eq!(time(&[0xCB, 0x06], 2), 15, "RLC (HL)");
    assert_eq!(time(&[0xCB, 0x47], 2), 8, "BIT 0,A");
    assert_eq!(time(&[0xCB, 0x46], 2), 12, "BIT 0,(HL)");
    assert_eq!(time(&[0xCB, 0xC7], 2), 8, "SET 0,A");
    assert_eq!(time(&[0xCB, 0xC6], 2), 15, "SET 0,(HL)");
}

#[test]
fn ed_table_timings() {
    assert_eq!(time(&[0xED, 0x44], 2), 8, "NEG");
    assert_eq!(time(&[0xED, 0x56], 2), 8, "IM 1");
    assert_eq!(time(&[0xED, 0x47], 2), 9, "LD I,A");
    assert_eq!(time(&[0xED, 0x57], 2), 9, "LD A,I");
    assert_eq!(time(&[0xED, 0x4A], 2), 15, "ADC HL,BC");
    assert_eq!(time(&[0xED, 0x42], 2), 15, "SBC HL,BC");
    assert_eq!(time(&[0xED, 0x43, 0x00, 0x80], 2), 20, "LD (nn),BC");
    assert_eq!(time(&[0xED, 0x4B, 0x00, 0x80], 2), 20, "LD BC,(nn)");
    assert_eq!(time(&[0xED, 0x45], 2), 14, "RETN");
    assert_eq!(time(&[0xED, 0x67], 2), 18, "RRD");
    assert_eq!(time(&[0xED, 0x78], 2), 12, "IN A,(C)");
    assert_eq!(time(&[0xED, 0x79], 2), 12, "OUT (C),A");
    assert_eq!(time(&[0xED, 0xA2], 2), 16, "INI");
    assert_eq!(time(&[0xED, 0xA3], 2), 16, "OUTI");
}

#[test]
fn block_transfer_timings() {
    // Terminating: BC becomes 0
    assert_eq!(
        time_of(&[0xED, 0xB0], 2, |cpu, _| {
            cpu.regs.set_bc(1);
            cpu.regs.set_hl(0x8000);
            cpu.regs.set_de(0x9000);
        }),
        16,
        "LDIR terminating"
    );
    // Repeating: BC stays nonzero
    assert_eq!(
        time_of(&[0xED, 0xB0], 2, |cpu, _| {
            cpu.regs.set_bc(2);
            cpu.regs.set_hl(0x8000);
            cpu.regs.set_de(0x9000);
        }),
        21,
        "LDIR repeating"
    );
    assert_eq!(
        time_of(&[0xED, 0xA0], 2, |cpu, _| cpu.regs.set_bc(5)),
        16,
        "LDI"
    );
    assert_eq!(
        time_of(&[0xED, 0xA1], 2, |cpu, _| cpu.regs.set_bc(5)),
        16,
        "CPI"
    );
    assert_eq!(
        time_of(&[0xED, 0xB1], 2, |cpu, _| {
            cpu.regs.set_bc(2);
            cpu.regs.a = 0xEE; // no match at (HL)=0
            cpu.regs.set_hl(0x8000);
        }),
        21,
        "CPIR repeating"
    );
}

#[test]
fn indexed_timings() {
    assert_eq!(time(&[0xDD, 0x21, 0x00, 0x80], 2), 14, "LD IX,nn");
    assert_eq!(time(&[0xDD, 0x23], 2), 10, "INC IX");
    assert_eq!(time(&[0xDD, 0x09], 2), 15, "ADD IX,BC");
    assert_eq!(time(&[0xDD, 0x7E, 0x00], 2), 19, "LD A,(IX+d)");
    assert_eq!(time(&[0xDD, 0x77, 0x00], 2), 19, "LD (IX+d),A");
    assert_eq!(time(&[0xDD, 0x86, 0x00], 2), 19, "ADD A,(IX+d)");
    assert_eq!(time(&[0xDD, 0x34, 0x00], 2), 23, "INC (IX+d)");
    assert_eq!(time(&[0xDD, 0x36, 0x00, 0x12], 2), 19, "LD (IX+d),n");
    assert_eq!(time(&[0xDD, 0xE5], 2), 15, "PUSH IX");
    assert_eq!(time(&[0xDD, 0xE1], 2), 14, "POP IX");
    assert_eq!(time(&[0xDD, 0xE3], 2), 23, "EX (SP),IX");
    assert_eq!(time(&[0xDD, 0xE9], 2), 8, "JP (IX)");
    assert_eq!(time(&[0xDD, 0x2A, 0x00, 0x80], 2), 20, "LD IX,(nn)");
    assert_eq!(time(&[0xDD, 0x22, 0x00, 0x80], 2), 20, "LD (nn),IX");
    assert_eq!(time(&[0xDD, 0x24], 2), 8, "INC IXH (undocumented)");
    assert_eq!(time(&[0xDD, 0x7C], 2), 8, "LD A,IXH (undocumented)");
}

#[test]
fn index_cb_timings() {
    assert_eq!(time(&[0xDD, 0xCB, 0x00, 0x06], 2), 23, "RLC (IX+d)");
    assert_eq!(time(&[0xDD, 0xCB, 0x00, 0x46], 2), 20, "BIT 0,(IX+d)");
    assert_eq!(time(&[0xDD, 0xCB, 0x00, 0xC6], 2), 23, "SET 0,(IX+d)");
}

#[test]
fn interrupted_ldir_resumes() {
    // A repeating LDIR rewinds PC by 2, so the driver can deliver an
    // interrupt between repeats and the transfer still completes.
    let mut bus = FlatBus::new();
    bus.load(0x0000, &[0xED, 0xB0]);
    bus.load(0x8000, &[0x11, 0x22, 0x33]);
    let mut cpu = Z80::new();
    cpu.reset();
    cpu.regs.set_bc(3);
    cpu.regs.set_hl(0x8000);
    cpu.regs.set_de(0x9000);

    cpu.step(&mut bus); // ED prefix
    cpu.step(&mut bus); // first iteration
    assert_eq!(cpu.pc(), 0x0000, "PC rewound for the repeat");
    assert_eq!(cpu.regs.bc(), 2);

    while cpu.regs.bc() != 0 {
        cpu.step(&mut bus);
    }
    assert_eq!(bus.mem[0x9000..0x9003], [0x11, 0x22, 0x33]);
    assert_eq!(cpu.pc(), 0x0002);
}
