//! Instruction execution for the Z80.
//!
//! One function per dispatch table (main, CB, ED, DD/FD, DD-CB/FD-CB),
//! each a single `match` over the opcode byte. T-states accumulate through
//! the fetch/read/write/internal primitives in `cpu.rs`, so every arm's
//! total matches the documented timing table.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::Bus;
use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};

use super::{Index, Z80};

impl Z80 {
    // =========================================================================
    // Register-code helpers (B=0 C=1 D=2 E=3 H=4 L=5 (HL)=6 A=7)
    // =========================================================================

    fn get_r8(&self, code: u8) -> u8 {
        match code {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_r8(&mut self, code: u8, value: u8) {
        match code {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            _ => self.regs.a = value,
        }
    }

    /// Register pair by code (BC=0 DE=1 HL=2 SP=3).
    fn get_rp(&self, code: u8) -> u16 {
        match code {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, code: u8, value: u16) {
        match code {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Condition by code (NZ Z NC C PO PE P M).
    fn cond(&self, code: u8) -> bool {
        let f = self.regs.f;
        match code {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & PF == 0,
            5 => f & PF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    /// ALU operation by code (ADD ADC SUB SBC AND XOR OR CP).
    fn alu_op(&mut self, code: u8, value: u8) {
        let carry = self.regs.f & CF != 0;
        let result = match code {
            0 => alu::add8(self.regs.a, value, false),
            1 => alu::add8(self.regs.a, value, carry),
            2 => alu::sub8(self.regs.a, value, false),
            3 => alu::sub8(self.regs.a, value, carry),
            4 => alu::and8(self.regs.a, value),
            5 => alu::xor8(self.regs.a, value),
            6 => alu::or8(self.regs.a, value),
            _ => alu::cp8(self.regs.a, value),
        };
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }

    /// Rotate/shift operation by code (RLC RRC RL RR SLA SRA SLL SRL).
    fn rot_op(&mut self, code: u8, value: u8) -> u8 {
        let carry = self.regs.f & CF != 0;
        let result = match code {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        };
        self.regs.f = result.flags;
        result.value
    }

    // =========================================================================
    // Unprefixed instructions
    // =========================================================================

    pub(super) fn execute_main<B: Bus>(&mut self, bus: &mut B, op: u8) {
        match op {
            // NOP
            0x00 => {}

            // LD rr, nn (01=BC, 11=DE, 21=HL, 31=SP)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch16(bus);
                self.set_rp((op >> 4) & 3, value);
            }

            // LD (BC), A / LD (DE), A
            0x02 | 0x12 => {
                let addr = if op == 0x02 { self.regs.bc() } else { self.regs.de() };
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                let a = self.regs.a;
                self.write8(bus, addr, a);
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.internal(2);
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_add(1);
                self.set_rp(rp, value);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                self.internal(2);
                let rp = (op >> 4) & 3;
                let value = self.get_rp(rp).wrapping_sub(1);
                self.set_rp(rp, value);
            }

            // INC (HL) / DEC (HL)
            0x34 | 0x35 => {
                let addr = self.regs.hl();
                let value = self.read8(bus, addr);
                self.internal(1);
                let result = if op == 0x34 { alu::inc8(value) } else { alu::dec8(value) };
                self.write8(bus, addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.get_r8(r));
                self.set_r8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.get_r8(r));
                self.set_r8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD (HL), n
            0x36 => {
                let value = self.fetch(bus);
                let addr = self.regs.hl();
                self.write8(bus, addr, value);
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.fetch(bus);
                self.set_r8((op >> 3) & 7, value);
            }

            // RLCA / RRCA / RLA / RRA (S/Z/P preserved)
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x17 => {
                let old_carry = self.regs.f & CF;
                let new_carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }
            0x1F => {
                let old_carry = (self.regs.f & CF) << 7;
                let new_carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | old_carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if new_carry != 0 { CF } else { 0 };
            }

            // EX AF, AF'
            0x08 => self.regs.ex_af(),

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.internal(7);
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let (result, flags) = alu::add16(hl, self.get_rp((op >> 4) & 3));
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD A, (BC) / LD A, (DE)
            0x0A | 0x1A => {
                let addr = if op == 0x0A { self.regs.bc() } else { self.regs.de() };
                self.regs.wz = addr.wrapping_add(1);
                self.regs.a = self.read8(bus, addr);
            }

            // DJNZ e
            0x10 => {
                self.internal(1);
                let offset = self.fetch(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.internal(5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    self.regs.wz = self.regs.pc;
                }
            }

            // JR e
            0x18 => {
                let offset = self.fetch(bus) as i8;
                self.internal(5);
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                self.regs.wz = self.regs.pc;
            }

            // JR cc, e (20=NZ, 28=Z, 30=NC, 38=C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch(bus) as i8;
                if self.cond((op >> 3) & 3) {
                    self.internal(5);
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    self.regs.wz = self.regs.pc;
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let hl = self.regs.hl();
                self.write16(bus, addr, hl);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.read16(bus, addr);
                self.regs.set_hl(value);
            }

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.fetch16(bus);
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0xFF);
                let a = self.regs.a;
                self.write8(bus, addr, a);
            }
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                self.regs.a = self.read8(bus, addr);
            }

            // SCF / CCF
            0x37 => {
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | CF;
            }
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_carry != 0 { HF } else { CF };
            }

            // HALT: PC stays on the opcode; interrupt wake advances past it
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD r, r' (with (HL) source/destination)
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                let value = if src == 6 {
                    let hl = self.regs.hl();
                    self.read8(bus, hl)
                } else {
                    self.get_r8(src)
                };
                if dst == 6 {
                    let hl = self.regs.hl();
                    self.write8(bus, hl, value);
                } else {
                    self.set_r8(dst, value);
                }
            }

            // ALU A, r (80-87=ADD, 88-8F=ADC, ... B8-BF=CP)
            0x80..=0xBF => {
                let src = op & 7;
                let value = if src == 6 {
                    let hl = self.regs.hl();
                    self.read8(bus, hl)
                } else {
                    self.get_r8(src)
                };
                self.alu_op((op >> 3) & 7, value);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                self.internal(1);
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = self.pop(bus);
                    self.regs.wz = self.regs.pc;
                }
            }

            // POP rr (C1=BC, D1=DE, E1=HL, F1=AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop(bus);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.set_af(value),
                }
            }

            // PUSH rr
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.af(),
                };
                self.push(bus, value);
            }

            // JP cc, nn (address always fetched)
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
            }

            // JP nn
            0xC3 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                self.regs.pc = addr;
            }

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.cond((op >> 3) & 7) {
                    let pc = self.regs.pc;
                    self.push(bus, pc);
                    self.regs.pc = addr;
                }
            }

            // CALL nn
            0xCD => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                let pc = self.regs.pc;
                self.push(bus, pc);
                self.regs.pc = addr;
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop(bus);
                self.regs.wz = self.regs.pc;
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch(bus);
                self.alu_op((op >> 3) & 7, value);
            }

            // RST n
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let pc = self.regs.pc;
                self.push(bus, pc);
                self.regs.pc = u16::from(op & 0x38);
                self.regs.wz = self.regs.pc;
            }

            // OUT (n), A
            0xD3 => {
                let port = self.fetch(bus);
                self.regs.wz = (u16::from(self.regs.a) << 8)
                    | u16::from(port.wrapping_add(1));
                let a = self.regs.a;
                self.io_write(bus, port, a);
            }

            // IN A, (n)
            0xDB => {
                let port = self.fetch(bus);
                self.regs.wz = ((u16::from(self.regs.a) << 8) | u16::from(port))
                    .wrapping_add(1);
                self.regs.a = self.io_read(bus, port);
            }

            // EXX
            0xD9 => self.regs.exx(),

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let value = self.read16(bus, sp);
                self.internal(1);
                let hl = self.regs.hl();
                self.write16(bus, sp, hl);
                self.internal(2);
                self.regs.set_hl(value);
                self.regs.wz = value;
            }

            // JP (HL)
            0xE9 => self.regs.pc = self.regs.hl(),

            // EX DE, HL
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
            }

            // LD SP, HL
            0xF9 => {
                self.internal(2);
                self.regs.sp = self.regs.hl();
            }

            // Prefix bytes are latched in step() and never dispatched here.
            0xCB | 0xDD | 0xED | 0xFD => {}

            _ => self.warn_unimplemented("main", op),
        }
    }

    // =========================================================================
    // CB-prefixed instructions
    // =========================================================================

    pub(super) fn execute_cb<B: Bus>(&mut self, bus: &mut B, op: u8) {
        let group = op >> 6;
        let sel = (op >> 3) & 7;
        let target = op & 7;

        match group {
            // Rotates and shifts
            0 => {
                if target == 6 {
                    let addr = self.regs.hl();
                    let value = self.read8(bus, addr);
                    self.internal(1);
                    let result = self.rot_op(sel, value);
                    self.write8(bus, addr, result);
                } else {
                    let value = self.get_r8(target);
                    let result = self.rot_op(sel, value);
                    self.set_r8(target, result);
                }
            }

            // BIT b, r — X/Y from the operand; for (HL), from WZ's high byte
            1 => {
                let (value, xy) = if target == 6 {
                    let addr = self.regs.hl();
                    let value = self.read8(bus, addr);
                    self.internal(1);
                    (value, (self.regs.wz >> 8) as u8)
                } else {
                    let value = self.get_r8(target);
                    (value, value)
                };
                self.bit_flags(sel, value, xy);
            }

            // RES b, r / SET b, r
            _ => {
                let mask = 1u8 << sel;
                if target == 6 {
                    let addr = self.regs.hl();
                    let value = self.read8(bus, addr);
                    self.internal(1);
                    let result = if group == 2 { value & !mask } else { value | mask };
                    self.write8(bus, addr, result);
                } else {
                    let value = self.get_r8(target);
                    let result = if group == 2 { value & !mask } else { value | mask };
                    self.set_r8(target, result);
                }
            }
        }
    }

    /// Flags for BIT b: Z/P from the tested bit, S only for bit 7, H set,
    /// X/Y copied from `xy`, carry preserved.
    fn bit_flags(&mut self, bit: u8, value: u8, xy: u8) {
        let tested = value & (1 << bit);
        let mut f = (self.regs.f & CF) | HF | (xy & (YF | XF));
        if tested == 0 {
            f |= ZF | PF;
        }
        if bit == 7 && tested != 0 {
            f |= SF;
        }
        self.regs.f = f;
    }

    // =========================================================================
    // ED-prefixed instructions
    // =========================================================================

    pub(super) fn execute_ed<B: Bus>(&mut self, bus: &mut B, op: u8) {
        match op {
            // IN r, (C) — 0x70 sets flags only
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                self.regs.wz = self.regs.bc().wrapping_add(1);
                let port = self.regs.c;
                let value = self.io_read(bus, port);
                self.regs.f = (self.regs.f & CF) | sz53p(value);
                if op != 0x70 {
                    self.set_r8((op >> 3) & 7, value);
                }
            }

            // OUT (C), r — 0x71 outputs zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                self.regs.wz = self.regs.bc().wrapping_add(1);
                let value = if op == 0x71 { 0 } else { self.get_r8((op >> 3) & 7) };
                let port = self.regs.c;
                self.io_write(bus, port, value);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                self.internal(7);
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::sbc16(hl, self.get_rp((op >> 4) & 3), carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                self.internal(7);
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::adc16(hl, self.get_rp((op >> 4) & 3), carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.get_rp((op >> 4) & 3);
                self.write16(bus, addr, value);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.read16(bus, addr);
                self.set_rp((op >> 4) & 3, value);
            }

            // NEG (and mirrors)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // RETN / RETI: both restore IFF1 from IFF2
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop(bus);
                self.regs.wz = self.regs.pc;
                self.regs.iff1 = self.regs.iff2;
            }

            // IM 0 / IM 1 / IM 2 (and mirrors)
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,

            // LD I, A / LD R, A
            0x47 => {
                self.internal(1);
                self.regs.i = self.regs.a;
            }
            0x4F => {
                self.internal(1);
                self.regs.r = self.regs.a;
            }

            // LD A, I / LD A, R — P/V reports IFF2
            0x57 => {
                self.internal(1);
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }
            0x5F => {
                self.internal(1);
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD / RLD
            0x67 => {
                let addr = self.regs.hl();
                self.regs.wz = addr.wrapping_add(1);
                let mem = self.read8(bus, addr);
                self.internal(4);
                let (a, new_mem, flags) = alu::rrd(self.regs.a, mem);
                self.write8(bus, addr, new_mem);
                self.regs.a = a;
                self.regs.f = (self.regs.f & CF) | flags;
            }
            0x6F => {
                let addr = self.regs.hl();
                self.regs.wz = addr.wrapping_add(1);
                let mem = self.read8(bus, addr);
                self.internal(4);
                let (a, new_mem, flags) = alu::rld(self.regs.a, mem);
                self.write8(bus, addr, new_mem);
                self.regs.a = a;
                self.regs.f = (self.regs.f & CF) | flags;
            }

            // Block transfer / compare / IO
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            _ => self.warn_unimplemented("ED", op),
        }
    }

    /// LDI/LDD/LDIR/LDDR.
    fn block_ld<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = self.read8(bus, hl);
        self.write8(bus, de, value);
        self.internal(2);

        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.set_de(de.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // X/Y from A + transferred byte (bit 1 -> Y, bit 3 -> X)
        let n = self.regs.a.wrapping_add(value);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | (n & XF)
            | if n & 0x02 != 0 { YF } else { 0 }
            | if bc != 0 { PF } else { 0 };

        if repeat && bc != 0 {
            self.internal(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.regs.wz = self.regs.pc.wrapping_add(1);
        }
    }

    /// CPI/CPD/CPIR/CPDR.
    fn block_cp<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let hl = self.regs.hl();
        let value = self.read8(bus, hl);
        self.internal(5);

        let result = alu::sub8(self.regs.a, value, false);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);
        self.regs.wz = self.regs.wz.wrapping_add(dir as u16);

        // X/Y from A - (HL) - H (using H from the compare itself)
        let half = if result.flags & HF != 0 { 1 } else { 0 };
        let n = result.value.wrapping_sub(half);
        self.regs.f = (self.regs.f & CF)
            | NF
            | (result.flags & (SF | ZF | HF))
            | (n & XF)
            | if n & 0x02 != 0 { YF } else { 0 }
            | if bc != 0 { PF } else { 0 };

        if repeat && bc != 0 && result.flags & ZF == 0 {
            self.internal(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.regs.wz = self.regs.pc.wrapping_add(1);
        }
    }

    /// INI/IND/INIR/INDR.
    fn block_in<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        self.internal(1);
        self.regs.wz = self.regs.bc().wrapping_add(dir as u16);
        let port = self.regs.c;
        let value = self.io_read(bus, port);
        let hl = self.regs.hl();
        self.write8(bus, hl, value);

        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.b = self.regs.b.wrapping_sub(1);

        let k = u16::from(value) + u16::from(self.regs.c.wrapping_add_signed(dir as i8));
        self.block_io_flags(value, k);

        if repeat && self.regs.b != 0 {
            self.internal(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// OUTI/OUTD/OTIR/OTDR.
    fn block_out<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        self.internal(1);
        let hl = self.regs.hl();
        let value = self.read8(bus, hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        let port = self.regs.c;
        self.io_write(bus, port, value);

        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.wz = self.regs.bc().wrapping_add(dir as u16);

        let k = u16::from(value) + u16::from(self.regs.l);
        self.block_io_flags(value, k);

        if repeat && self.regs.b != 0 {
            self.internal(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// Shared flag derivation for the block IO group.
    fn block_io_flags(&mut self, value: u8, k: u16) {
        let b = self.regs.b;
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        if k > 0xFF {
            f |= HF | CF;
        }
        if parity((k as u8 & 0x07) ^ b) {
            f |= PF;
        }
        self.regs.f = f;
    }

    // =========================================================================
    // DD/FD-prefixed instructions (IX/IY)
    // =========================================================================

    fn get_index(&self, index: Index) -> u16 {
        match index {
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    fn set_index(&mut self, index: Index, value: u16) {
        match index {
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// Index-register half by register code (4 = high, 5 = low).
    fn get_index_half(&self, index: Index, code: u8) -> u8 {
        match (index, code) {
            (Index::Ix, 4) => self.regs.ixh(),
            (Index::Ix, _) => self.regs.ixl(),
            (Index::Iy, 4) => self.regs.iyh(),
            (Index::Iy, _) => self.regs.iyl(),
        }
    }

    fn set_index_half(&mut self, index: Index, code: u8, value: u8) {
        match (index, code) {
            (Index::Ix, 4) => self.regs.set_ixh(value),
            (Index::Ix, _) => self.regs.set_ixl(value),
            (Index::Iy, 4) => self.regs.set_iyh(value),
            (Index::Iy, _) => self.regs.set_iyl(value),
        }
    }

    /// Fetch a displacement and form the effective address (sets WZ).
    fn index_addr<B: Bus>(&mut self, bus: &mut B, index: Index) -> u16 {
        let offset = self.fetch(bus) as i8;
        let addr = self.get_index(index).wrapping_add(offset as u16);
        self.regs.wz = addr;
        addr
    }

    pub(super) fn execute_indexed<B: Bus>(&mut self, bus: &mut B, op: u8, index: Index) {
        match op {
            // ADD ix, rr (rr=2 is the index register itself)
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.internal(7);
                let ix = self.get_index(index);
                self.regs.wz = ix.wrapping_add(1);
                let rp = (op >> 4) & 3;
                let operand = if rp == 2 { ix } else { self.get_rp(rp) };
                let (result, flags) = alu::add16(ix, operand);
                self.set_index(index, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD ix, nn
            0x21 => {
                let value = self.fetch16(bus);
                self.set_index(index, value);
            }

            // LD (nn), ix / LD ix, (nn)
            0x22 => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.get_index(index);
                self.write16(bus, addr, value);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr.wrapping_add(1);
                let value = self.read16(bus, addr);
                self.set_index(index, value);
            }

            // INC ix / DEC ix
            0x23 => {
                self.internal(2);
                let value = self.get_index(index).wrapping_add(1);
                self.set_index(index, value);
            }
            0x2B => {
                self.internal(2);
                let value = self.get_index(index).wrapping_sub(1);
                self.set_index(index, value);
            }

            // INC/DEC/LD on IXH/IXL (undocumented)
            0x24 | 0x25 | 0x2C | 0x2D => {
                let half = (op >> 3) & 7;
                let value = self.get_index_half(index, half);
                let result = if op & 1 == 0 { alu::inc8(value) } else { alu::dec8(value) };
                self.set_index_half(index, half, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x26 | 0x2E => {
                let value = self.fetch(bus);
                self.set_index_half(index, (op >> 3) & 7, value);
            }

            // INC (ix+d) / DEC (ix+d)
            0x34 | 0x35 => {
                let addr = self.index_addr(bus, index);
                self.internal(5);
                let value = self.read8(bus, addr);
                self.internal(1);
                let result = if op == 0x34 { alu::inc8(value) } else { alu::dec8(value) };
                self.write8(bus, addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD (ix+d), n
            0x36 => {
                let addr = self.index_addr(bus, index);
                let value = self.fetch(bus);
                self.internal(2);
                self.write8(bus, addr, value);
            }

            // HALT is unaffected by the prefix
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD group: (HL) becomes (ix+d); H/L become IXH/IXL only when
            // no memory operand is involved
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let addr = self.index_addr(bus, index);
                    self.internal(5);
                    let value = self.read8(bus, addr);
                    self.set_r8(dst, value);
                } else if dst == 6 {
                    let addr = self.index_addr(bus, index);
                    self.internal(5);
                    let value = self.get_r8(src);
                    self.write8(bus, addr, value);
                } else {
                    let value = if src == 4 || src == 5 {
                        self.get_index_half(index, src)
                    } else {
                        self.get_r8(src)
                    };
                    if dst == 4 || dst == 5 {
                        self.set_index_half(index, dst, value);
                    } else {
                        self.set_r8(dst, value);
                    }
                }
            }

            // ALU group with (ix+d) or IXH/IXL operands
            0x80..=0xBF => {
                let src = op & 7;
                let value = match src {
                    6 => {
                        let addr = self.index_addr(bus, index);
                        self.internal(5);
                        self.read8(bus, addr)
                    }
                    4 | 5 => self.get_index_half(index, src),
                    _ => self.get_r8(src),
                };
                self.alu_op((op >> 3) & 7, value);
            }

            // POP ix / PUSH ix
            0xE1 => {
                let value = self.pop(bus);
                self.set_index(index, value);
            }
            0xE5 => {
                let value = self.get_index(index);
                self.push(bus, value);
            }

            // EX (SP), ix
            0xE3 => {
                let sp = self.regs.sp;
                let value = self.read16(bus, sp);
                self.internal(1);
                let ix = self.get_index(index);
                self.write16(bus, sp, ix);
                self.internal(2);
                self.set_index(index, value);
                self.regs.wz = value;
            }

            // JP (ix)
            0xE9 => self.regs.pc = self.get_index(index),

            // LD SP, ix
            0xF9 => {
                self.internal(2);
                self.regs.sp = self.get_index(index);
            }

            // Everything else behaves as if the prefix were absent
            _ => self.execute_main(bus, op),
        }
    }

    // =========================================================================
    // DD-CB / FD-CB instructions
    // =========================================================================

    /// The two-byte tail after DD CB is (displacement, sub-opcode). The
    /// result of a rotate/shift/RES/SET also writes back into the register
    /// encoded in the sub-opcode's low three bits (unless that is (HL)).
    pub(super) fn execute_index_cb<B: Bus>(&mut self, bus: &mut B, index: Index) {
        let offset = self.fetch(bus) as i8;
        let sub = self.fetch(bus);
        self.internal(2);
        let addr = self.get_index(index).wrapping_add(offset as u16);
        self.regs.wz = addr;

        let group = sub >> 6;
        let sel = (sub >> 3) & 7;
        let target = sub & 7;

        match group {
            // Rotates and shifts
            0 => {
                let value = self.read8(bus, addr);
                self.internal(1);
                let result = self.rot_op(sel, value);
                self.write8(bus, addr, result);
                if target != 6 {
                    self.set_r8(target, result);
                }
            }

            // BIT — X/Y from the high byte of the effective address
            1 => {
                let value = self.read8(bus, addr);
                self.internal(1);
                self.bit_flags(sel, value, (addr >> 8) as u8);
            }

            // RES / SET
            _ => {
                let value = self.read8(bus, addr);
                self.internal(1);
                let mask = 1u8 << sel;
                let result = if group == 2 { value & !mask } else { value | mask };
                self.write8(bus, addr, result);
                if target != 6 {
                    self.set_r8(target, result);
                }
            }
        }
    }
}
