//! Circular instruction trace and freeze detector.
//!
//! `record()` snapshots the CPU before every step; `check_freeze()` runs
//! two heuristics over the PC stream and triggers once per run:
//!
//! - a same-PC streak (HALT loops and single-address spins), and
//! - a rolling window whose PCs all fit inside a 64-byte span of user
//!   RAM, accumulating T-states until a budget is exhausted.
//!
//! Both require the PC in user RAM: the ROM's $KEY wait loop is an
//! intentional spin and must not fire the detector.

use std::io::Write;
use std::path::{Path, PathBuf};

use zilog_z80::Z80;

use crate::bus::Trs80Bus;

const BUF_SIZE: usize = 500;
const FREEZE_WINDOW: usize = 64;
const FREEZE_TICKS: u64 = 3_000_000;
const STREAK_LIMIT: u64 = 100_000;

/// One per-step CPU snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEntry {
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub ix: u16,
    pub iy: u16,
    pub i: u8,
    pub im: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,
    pub ticks: u64,
}

/// Trace ring plus freeze detection state.
pub struct Debugger {
    buf: Box<[TraceEntry; BUF_SIZE]>,
    head: usize,
    count: usize,

    pc_window: [u16; FREEZE_WINDOW],
    win_pos: usize,
    win_full: bool,
    ticks_acc: u64,
    dumped: bool,
    last_pc: u16,
    streak: u64,
    last_ticks: u64,

    trace_path: PathBuf,
}

impl Debugger {
    #[must_use]
    pub fn new(trace_path: PathBuf) -> Self {
        Self {
            buf: Box::new([TraceEntry::default(); BUF_SIZE]),
            head: 0,
            count: 0,
            pc_window: [0; FREEZE_WINDOW],
            win_pos: 0,
            win_full: false,
            ticks_acc: 0,
            dumped: false,
            last_pc: 0xFFFF,
            streak: 0,
            last_ticks: 0,
            trace_path,
        }
    }

    /// Snapshot the CPU into the ring.
    pub fn record(&mut self, cpu: &Z80, ticks: u64) {
        let regs = &cpu.regs;
        self.buf[self.head] = TraceEntry {
            pc: regs.pc,
            sp: regs.sp,
            a: regs.a,
            f: regs.f,
            b: regs.b,
            c: regs.c,
            d: regs.d,
            e: regs.e,
            h: regs.h,
            l: regs.l,
            ix: regs.ix,
            iy: regs.iy,
            i: regs.i,
            im: regs.im,
            iff1: regs.iff1,
            iff2: regs.iff2,
            halted: regs.halted,
            ticks,
        };
        self.last_ticks = ticks;
        self.head = (self.head + 1) % BUF_SIZE;
        if self.count < BUF_SIZE {
            self.count += 1;
        }
    }

    /// Update the freeze detector for the current PC. Returns true the
    /// first time a freeze is detected; the caller should dump.
    pub fn check_freeze(&mut self, pc: u16) -> bool {
        if self.dumped {
            return false;
        }

        // Fast path: the same PC repeated (HALT or single-address spin)
        if pc == self.last_pc {
            self.streak += 1;
        } else {
            self.last_pc = pc;
            self.streak = 0;
        }

        self.pc_window[self.win_pos] = pc;
        self.win_pos = (self.win_pos + 1) % FREEZE_WINDOW;
        if !self.win_full && self.win_pos == 0 {
            self.win_full = true;
        }

        let mut tight = self.streak > STREAK_LIMIT && pc >= 0x4000;
        if !tight && self.win_full {
            let lo = self.pc_window.iter().copied().min().unwrap_or(pc);
            let hi = self.pc_window.iter().copied().max().unwrap_or(pc);
            if lo >= 0x4000 && hi - lo < 64 {
                self.ticks_acc += 4;
            } else {
                self.ticks_acc = 0;
            }
            tight = self.ticks_acc >= FREEZE_TICKS;
        }

        if tight {
            eprintln!(
                "[FREEZE] detected at PC=0x{pc:04X} streak={} ticks={}",
                self.streak, self.last_ticks
            );
            self.dumped = true;
            return true;
        }
        false
    }

    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.count > 0
    }

    #[must_use]
    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    /// Write the buffered snapshots to the trace file, one line each,
    /// oldest first, with the two opcode bytes at each PC.
    pub fn dump(&self, bus: &Trs80Bus) {
        if self.count == 0 {
            return;
        }

        let mut out = match std::fs::File::create(&self.trace_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("[TRACE] could not open {}: {e}", self.trace_path.display());
                return;
            }
        };

        let mut text = String::new();
        text.push_str(&format!(
            "# freeze trace - last {} instructions\n\
             # TICKS       PC   SP   AF   BC   DE   HL   IX   IY  I IM IFF OP\n",
            self.count
        ));

        let start = if self.count < BUF_SIZE { 0 } else { self.head };
        for n in 0..self.count {
            let e = &self.buf[(start + n) % BUF_SIZE];
            let op0 = bus.peek(e.pc);
            let op1 = bus.peek(e.pc.wrapping_add(1));
            text.push_str(&format!(
                "{:12}  {:04X} {:04X}  {:02X}{:02X} {:04X} {:04X} {:04X}  {:04X} {:04X}  {:02X} {} {}{}  {:02X} {:02X}{}{}\n",
                e.ticks,
                e.pc,
                e.sp,
                e.a,
                e.f,
                (u16::from(e.b) << 8) | u16::from(e.c),
                (u16::from(e.d) << 8) | u16::from(e.e),
                (u16::from(e.h) << 8) | u16::from(e.l),
                e.ix,
                e.iy,
                e.i,
                e.im,
                u8::from(e.iff1),
                u8::from(e.iff2),
                op0,
                op1,
                if e.halted { " HALT" } else { "" },
                if e.iff1 { "" } else { " DI" },
            ));
        }

        match out.write_all(text.as_bytes()) {
            Ok(()) => eprintln!(
                "[TRACE] dumped {} instructions to {}",
                self.count,
                self.trace_path.display()
            ),
            Err(e) => eprintln!("[TRACE] write failed: {e}"),
        }
    }
}
