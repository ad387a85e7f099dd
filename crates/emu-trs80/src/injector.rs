//! Keyboard-injection queue.
//!
//! Characters queued here are drained one at a time through the $KEY ROM
//! intercept (0x0049), the wait-for-keypress routine used by BASIC line
//! input. INKEY$ polls the matrix directly and never reaches $KEY, so
//! injection cannot interfere with games.

use std::collections::VecDeque;
use std::path::Path;

use zilog_z80::Z80;

use crate::bus::Trs80Bus;
use crate::trs80::TrapOutcome;

/// ROM address of $KEY: wait-for-keypress, returns ASCII in A.
pub const ROM_KEY: u16 = 0x0049;

/// Approximate T-state cost of the intercepted call.
const INTERCEPT_TICKS: u64 = 10;

/// FIFO of synthetic keystrokes.
pub struct KeyInjector {
    queue: VecDeque<u8>,
}

impl KeyInjector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append text to the queue. a-z are uppercased (the machine has no
    /// lowercase keys), LF becomes Enter (0x0D), CR is dropped, and
    /// control characters below space are dropped.
    pub fn enqueue(&mut self, text: &str) {
        for byte in text.bytes() {
            match byte {
                b'a'..=b'z' => self.queue.push_back(byte - 32),
                b'\n' => self.queue.push_back(0x0D),
                b'\r' => {}
                b if b >= 0x20 => self.queue.push_back(b),
                _ => {}
            }
        }
    }

    /// Read a plain-text BASIC file and queue it, prepending `NEW` to
    /// clear any existing program.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load_source_file(&mut self, path: &Path) -> Result<(), String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
        self.enqueue("NEW\n");
        let mut lines = 0;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                self.enqueue(line);
                self.enqueue("\n");
                lines += 1;
            }
        }
        eprintln!(
            "[BAS] queued {lines} lines ({} chars) from {}",
            self.queue.len(),
            path.display()
        );
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.queue.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Probe the $KEY trap. When the PC sits at $KEY and the queue is
    /// non-empty: pop one character into A, fake the RET, and report the
    /// T-states so the driver skips the CPU step for this cycle.
    pub fn handle_intercept(&mut self, pc: u16, cpu: &mut Z80, bus: &mut Trs80Bus) -> TrapOutcome {
        if pc != ROM_KEY {
            return TrapOutcome::Stepped;
        }
        let Some(ch) = self.queue.pop_front() else {
            return TrapOutcome::Stepped;
        };

        let sp = cpu.sp();
        let ret_addr = u16::from(bus.peek(sp)) | (u16::from(bus.peek(sp.wrapping_add(1))) << 8);
        cpu.set_sp(sp.wrapping_add(2));
        cpu.set_pc(ret_addr);
        cpu.set_a(ch);
        TrapOutcome::Skipped(INTERCEPT_TICKS)
    }
}

impl Default for KeyInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::Cassette;

    #[test]
    fn enqueue_normalises_text() {
        let mut inj = KeyInjector::new();
        inj.enqueue("print \"hi\"\r\n");
        let drained: Vec<u8> = std::iter::from_fn(|| inj.queue.pop_front()).collect();
        assert_eq!(drained, b"PRINT \"HI\"\x0D");
    }

    #[test]
    fn control_characters_dropped() {
        let mut inj = KeyInjector::new();
        inj.enqueue("\x01A\x07B");
        assert_eq!(inj.len(), 2);
    }

    #[test]
    fn intercept_fakes_ret_with_char_in_a() {
        let mut inj = KeyInjector::new();
        inj.enqueue("X");

        let mut bus = Trs80Bus::new(Cassette::new(std::env::temp_dir()));
        let mut cpu = Z80::new();
        cpu.reset();
        cpu.set_sp(0x8000);
        // Stacked return address 0x1234
        bus.poke(0x8000, 0x34);
        bus.poke(0x8001, 0x12);
        cpu.set_pc(ROM_KEY);

        let outcome = inj.handle_intercept(ROM_KEY, &mut cpu, &mut bus);
        assert_eq!(outcome, TrapOutcome::Skipped(10));
        assert_eq!(cpu.pc(), 0x1234);
        assert_eq!(cpu.sp(), 0x8002);
        assert_eq!(cpu.a(), b'X');
        assert!(!inj.is_active());
    }

    #[test]
    fn intercept_ignores_other_addresses() {
        let mut inj = KeyInjector::new();
        inj.enqueue("X");
        let mut bus = Trs80Bus::new(Cassette::new(std::env::temp_dir()));
        let mut cpu = Z80::new();
        assert_eq!(
            inj.handle_intercept(0x1234, &mut cpu, &mut bus),
            TrapOutcome::Stepped
        );
        assert!(inj.is_active(), "queue untouched");
    }

    #[test]
    fn empty_queue_never_fires() {
        let mut inj = KeyInjector::new();
        let mut bus = Trs80Bus::new(Cassette::new(std::env::temp_dir()));
        let mut cpu = Z80::new();
        assert_eq!(
            inj.handle_intercept(ROM_KEY, &mut cpu, &mut bus),
            TrapOutcome::Stepped
        );
    }
}
