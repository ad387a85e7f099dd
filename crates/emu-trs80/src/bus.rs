//! TRS-80 Model I memory and I/O bus.
//!
//! # Memory map
//!
//! | Range           | Contents                                     |
//! |-----------------|----------------------------------------------|
//! | 0x0000-0x2FFF   | 12 KiB Level II BASIC ROM (shadow RAM on top)|
//! | 0x3000-0x37DF   | Unmapped (reads 0xFF)                        |
//! | 0x37E0-0x37EF   | Expansion-interface register window          |
//! | 0x3800-0x3BFF   | Memory-mapped keyboard matrix                |
//! | 0x3C00-0x3FFF   | 1 KiB video RAM (64×16 character cells)      |
//! | 0x4000-0xFFFF   | Up to 48 KiB user RAM                        |
//!
//! The expansion window splits into drive-select/IRQ-status (0x37E0-E3),
//! open bus (0x37E4-E7), printer status (0x37E8-EB), and the four FDC
//! registers (0x37EC-EF).
//!
//! A separate *flat mode* reinterprets the whole 64 KiB as plain RAM for
//! CP/M-style test harnesses.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::large_stack_arrays)] // The full address space lives here.

use std::path::Path;

use wd_fd1771::Fd1771;
use zilog_z80::Bus;

use crate::cassette::Cassette;
use crate::keyboard::KeyboardMatrix;

pub const ROM_START: u16 = 0x0000;
pub const ROM_END: u16 = 0x2FFF;
pub const ROM_SIZE: usize = 0x3000;

pub const EXPANSION_START: u16 = 0x37E0;
pub const EXPANSION_END: u16 = 0x37EF;

pub const KEYBOARD_START: u16 = 0x3800;
pub const KEYBOARD_END: u16 = 0x3BFF;

pub const VRAM_START: u16 = 0x3C00;
pub const VRAM_END: u16 = 0x3FFF;
pub const VRAM_SIZE: usize = 0x0400;

pub const RAM_START: u16 = 0x4000;
pub const RAM_SIZE: usize = 0xC000;

// NTSC video timing
pub const SCANLINE_VISIBLE_START: u16 = 48;
pub const VISIBLE_LINES: u16 = 192;
pub const TOTAL_SCANLINES: u16 = 262;
pub const TSTATES_PER_SCANLINE: u16 = 114;
pub const TSTATES_PER_FRAME: u64 = 29_498;

// M1 fetches of VRAM stall while the video counters hold the bus. The
// window is an uncalibrated heuristic: roughly the middle of the
// scanline's T-count.
const CONTENTION_START: u16 = 30;
const CONTENTION_END: u16 = 90;
const CONTENTION_PENALTY: u64 = 2;

/// The TRS-80 bus: memory, keyboard window, video RAM, expansion
/// registers, cassette port, and frame-interrupt timing.
pub struct Trs80Bus {
    rom: [u8; ROM_SIZE],
    /// Writes into the ROM range land here; reads prefer a shadowed byte.
    /// The expansion interface maps RAM over ROM this way so disk systems
    /// can hook the 0x0038 interrupt vector.
    rom_shadow: [u8; ROM_SIZE],
    rom_shadow_active: [bool; ROM_SIZE],

    vram: [u8; VRAM_SIZE],
    ram: [u8; RAM_SIZE],

    pub keyboard: KeyboardMatrix,
    pub cassette: Cassette,
    pub fdc: Fd1771,

    // Timing
    global_t: u64,
    scanline: u16,
    t_in_scanline: u16,
    frame_count: u64,

    /// Frame interrupt pending; cleared by `clear_interrupt()` on delivery.
    int_pending: bool,
    /// Sticky frame-interrupt latch; cleared by reading 0x37E0.
    int_latched: bool,

    /// Last value written to port 0xFF.
    port_ff: u8,

    // Flat 64 KiB mode for CP/M test programs
    flat_mode: bool,
    flat_mem: Vec<u8>,
}

impl Trs80Bus {
    #[must_use]
    pub fn new(cassette: Cassette) -> Self {
        let mut bus = Self {
            rom: [0; ROM_SIZE],
            rom_shadow: [0; ROM_SIZE],
            rom_shadow_active: [false; ROM_SIZE],
            vram: [0x20; VRAM_SIZE], // spaces: a blank screen
            ram: [0; RAM_SIZE],
            keyboard: KeyboardMatrix::new(),
            cassette,
            fdc: Fd1771::new(),
            global_t: 0,
            scanline: 0,
            t_in_scanline: 0,
            frame_count: 0,
            int_pending: false,
            int_latched: false,
            port_ff: 0,
            flat_mode: false,
            flat_mem: Vec::new(),
        };
        bus.reset();
        bus
    }

    /// Flat 64 KiB RAM variant for CP/M-style test programs.
    #[must_use]
    pub fn new_flat(cassette: Cassette) -> Self {
        let mut bus = Self::new(cassette);
        bus.flat_mode = true;
        bus.flat_mem = vec![0; 0x10000];
        bus
    }

    pub fn reset(&mut self) {
        self.vram.fill(0x20);
        self.ram.fill(0);
        self.rom_shadow_active.fill(false);
        self.global_t = 0;
        self.scanline = 0;
        self.t_in_scanline = 0;
        self.int_pending = false;
        self.int_latched = false;
        self.port_ff = 0;
    }

    /// Load the BASIC ROM image at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or exceeds the ROM window.
    pub fn load_rom(&mut self, path: &Path) -> Result<(), String> {
        let data = std::fs::read(path)
            .map_err(|e| format!("failed to open ROM file {}: {e}", path.display()))?;
        self.load_rom_image(&data)?;
        eprintln!("[ROM] loaded {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    /// Load ROM bytes directly (tests and embedded images).
    ///
    /// # Errors
    ///
    /// Returns an error if the image exceeds the 12 KiB window.
    pub fn load_rom_image(&mut self, data: &[u8]) -> Result<(), String> {
        if data.len() > ROM_SIZE {
            return Err(format!("ROM too large: {} bytes > {ROM_SIZE}", data.len()));
        }
        self.rom[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Mount a disk image into a drive slot.
    ///
    /// # Errors
    ///
    /// Propagates the FDC's loading error.
    pub fn load_disk(&mut self, drive: usize, path: &str) -> Result<(), String> {
        self.fdc.load_disk(drive, path)
    }

    #[must_use]
    pub fn is_flat_mode(&self) -> bool {
        self.flat_mode
    }

    // =========================================================================
    // Timing: scanline counters and the 60 Hz frame interrupt
    // =========================================================================

    /// Advance the T-state accumulator and the video position.
    pub fn add_ticks(&mut self, t: u64) {
        self.global_t += t;
        let mut remaining = t;
        while remaining > 0 {
            let step = remaining.min(u64::from(TSTATES_PER_SCANLINE)) as u16;
            self.t_in_scanline += step;
            remaining -= u64::from(step);
            while self.t_in_scanline >= TSTATES_PER_SCANLINE {
                self.t_in_scanline -= TSTATES_PER_SCANLINE;
                self.scanline += 1;
                if self.scanline >= TOTAL_SCANLINES {
                    self.scanline = 0;
                    self.frame_count += 1;
                    // Frame boundary: latch the timer interrupt
                    self.int_pending = true;
                    self.int_latched = true;
                }
            }
        }
    }

    #[must_use]
    pub fn global_t_states(&self) -> u64 {
        self.global_t
    }

    #[must_use]
    pub fn current_scanline(&self) -> u16 {
        self.scanline
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn is_visible_scanline(&self) -> bool {
        (SCANLINE_VISIBLE_START..SCANLINE_VISIBLE_START + VISIBLE_LINES).contains(&self.scanline)
    }

    /// Timer or FDC interrupt waiting for delivery.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        self.int_pending || self.fdc.intrq_pending()
    }

    /// Clears the transient timer flag only; the 0x37E0 latch and the FDC
    /// INTRQ are cleared by their own register reads.
    pub fn clear_interrupt(&mut self) {
        self.int_pending = false;
    }

    fn contention_applies(&self, addr: u16, m1: bool) -> bool {
        m1 && (VRAM_START..=VRAM_END).contains(&addr)
            && self.is_visible_scanline()
            && (CONTENTION_START..=CONTENTION_END).contains(&self.t_in_scanline)
    }

    // =========================================================================
    // Video access for the presentation layer
    // =========================================================================

    #[must_use]
    pub fn get_vram_byte(&self, index: u16) -> u8 {
        self.vram.get(index as usize).copied().unwrap_or(0x20)
    }

    /// Bit 1 of port 0xFF: the sound/cassette-out line.
    #[must_use]
    pub fn sound_bit(&self) -> bool {
        self.port_ff & 0x02 != 0
    }

    /// Side-effect-free read for trap filename extraction, the debugger,
    /// and tests.
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        if self.flat_mode {
            return self.flat_mem[addr as usize];
        }
        match addr {
            ROM_START..=ROM_END => {
                let i = addr as usize;
                if self.rom_shadow_active[i] { self.rom_shadow[i] } else { self.rom[i] }
            }
            KEYBOARD_START..=KEYBOARD_END => self.keyboard.read(addr as u8),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize],
            _ => 0xFF,
        }
    }

    /// Direct write used by loaders and tests (no timing side effects).
    pub fn poke(&mut self, addr: u16, value: u8) {
        if self.flat_mode {
            self.flat_mem[addr as usize] = value;
            return;
        }
        match addr {
            ROM_START..=ROM_END => {
                let i = addr as usize;
                self.rom_shadow[i] = value;
                self.rom_shadow_active[i] = true;
            }
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize] = value,
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize] = value,
            _ => {}
        }
    }
}

impl Bus for Trs80Bus {
    fn read(&mut self, addr: u16, m1: bool) -> u8 {
        if self.flat_mode {
            return self.flat_mem[addr as usize];
        }

        // Video contention: the bus self-charges the wait states and
        // advances its own clock; the CPU's step total never sees them.
        if self.contention_applies(addr, m1) {
            self.add_ticks(CONTENTION_PENALTY);
        }

        match addr {
            ROM_START..=ROM_END => {
                let i = addr as usize;
                if self.rom_shadow_active[i] { self.rom_shadow[i] } else { self.rom[i] }
            }
            KEYBOARD_START..=KEYBOARD_END => self.keyboard.read(addr as u8),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            0x37E0..=0x37E3 => {
                // IRQ source latch: bit 7 = timer, bit 6 = FDC. Reading
                // acknowledges the timer side.
                let mut value = 0;
                if self.int_latched {
                    value |= 0x80;
                }
                if self.fdc.intrq_pending() {
                    value |= 0x40;
                }
                self.int_latched = false;
                self.int_pending = false;
                value
            }
            0x37E4..=0x37E7 => 0xFF,
            // Printer status: ready, no fault
            0x37E8..=0x37EB => 0x30,
            0x37EC..=EXPANSION_END => self.fdc.read(addr - 0x37EC),
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize],
            _ => 0xFF,
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        if self.flat_mode {
            self.flat_mem[addr as usize] = value;
            return;
        }

        match addr {
            ROM_START..=ROM_END => {
                // Shadow RAM over ROM: the write takes effect and wins
                // subsequent reads of this byte.
                let i = addr as usize;
                self.rom_shadow[i] = value;
                self.rom_shadow_active[i] = true;
            }
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize] = value,
            0x37E0..=0x37E3 => self.fdc.select_drive(value),
            0x37EC..=EXPANSION_END => self.fdc.write(addr - 0x37EC, value),
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize] = value,
            // Keyboard window and the rest of the expansion window ignore writes
            _ => {}
        }
    }

    fn read_port(&mut self, port: u8) -> u8 {
        if port == 0xFF {
            let playback = self.cassette.signal(self.global_t);
            (self.port_ff & 0x7F) | if playback { 0x80 } else { 0x00 }
        } else {
            0xFF
        }
    }

    fn write_port(&mut self, port: u8, value: u8) {
        if port == 0xFF {
            // Bit 0: cassette motor, bit 1: sound/cassette-out. Recording
            // watches the bit-0 edges.
            self.cassette.on_port_write(value, self.global_t);
            self.port_ff = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::Cassette;

    fn make_bus() -> Trs80Bus {
        let mut bus = Trs80Bus::new(Cassette::new(std::env::temp_dir()));
        let mut rom = vec![0u8; ROM_SIZE];
        for (i, byte) in rom.iter_mut().enumerate() {
            *byte = (i & 0xFF) as u8;
        }
        bus.load_rom_image(&rom).expect("ROM image fits");
        bus
    }

    #[test]
    fn rom_reads_back_image() {
        let mut bus = make_bus();
        assert_eq!(bus.read(0x0000, false), 0x00);
        assert_eq!(bus.read(0x0123, false), 0x23);
    }

    #[test]
    fn rom_shadow_write_wins_reads() {
        let mut bus = make_bus();
        assert_eq!(bus.read(0x0038, false), 0x38);
        bus.write(0x0038, 0xC3);
        assert_eq!(bus.read(0x0038, false), 0xC3, "shadow byte wins");
        assert_eq!(bus.read(0x0039, false), 0x39, "neighbours unaffected");

        // Last write wins
        bus.write(0x0038, 0x11);
        bus.write(0x0038, 0x22);
        assert_eq!(bus.read(0x0038, false), 0x22);
    }

    #[test]
    fn unmapped_region_reads_ff() {
        let mut bus = make_bus();
        assert_eq!(bus.read(0x3000, false), 0xFF);
        assert_eq!(bus.read(0x37DF, false), 0xFF);
    }

    #[test]
    fn keyboard_window_or_combines_rows() {
        let mut bus = make_bus();
        bus.keyboard.set_key(0, 1, true); // A
        bus.keyboard.set_key(4, 3, true); // 3
        assert_eq!(bus.read(0x3801, false), 0x02);
        assert_eq!(bus.read(0x3810, false), 0x08);
        assert_eq!(bus.read(0x3811, false), 0x0A);
        assert_eq!(bus.read(0x3800, false), 0x00, "no rows selected");
    }

    #[test]
    fn vram_read_write() {
        let mut bus = make_bus();
        assert_eq!(bus.read(0x3C00, false), 0x20, "VRAM starts blank");
        bus.write(0x3C05, b'R');
        assert_eq!(bus.read(0x3C05, false), b'R');
        assert_eq!(bus.get_vram_byte(5), b'R');
    }

    #[test]
    fn user_ram_read_write() {
        let mut bus = make_bus();
        bus.write(0x4000, 0xAA);
        bus.write(0xFFFF, 0xBB);
        assert_eq!(bus.read(0x4000, false), 0xAA);
        assert_eq!(bus.read(0xFFFF, false), 0xBB);
    }

    #[test]
    fn frame_interrupt_fires_every_frame() {
        let mut bus = make_bus();
        assert!(!bus.interrupt_pending());
        bus.add_ticks(u64::from(TSTATES_PER_SCANLINE) * u64::from(TOTAL_SCANLINES));
        assert!(bus.interrupt_pending());
        assert_eq!(bus.frame_count(), 1);

        bus.clear_interrupt();
        assert!(!bus.interrupt_pending());
    }

    #[test]
    fn irq_latch_survives_delivery_until_read() {
        let mut bus = make_bus();
        bus.add_ticks(u64::from(TSTATES_PER_SCANLINE) * u64::from(TOTAL_SCANLINES));
        bus.clear_interrupt(); // delivery clears the transient flag

        // 0x37E0 still reports the latched timer bit, then clears it
        assert_eq!(bus.read(0x37E0, false) & 0x80, 0x80);
        assert_eq!(bus.read(0x37E0, false) & 0x80, 0x00);
    }

    #[test]
    fn printer_status_reads_ready() {
        let mut bus = make_bus();
        assert_eq!(bus.read(0x37E8, false), 0x30);
        assert_eq!(bus.read(0x37E4, false), 0xFF, "open bus");
    }

    #[test]
    fn contention_charges_on_vram_m1_fetch_only() {
        let mut bus = make_bus();
        // Move into the visible region and the contention window
        while !(bus.is_visible_scanline()
            && (CONTENTION_START..=CONTENTION_END).contains(&bus.t_in_scanline))
        {
            bus.add_ticks(1);
        }
        let before = bus.global_t_states();
        bus.read(0x3C00, true);
        assert_eq!(bus.global_t_states(), before + CONTENTION_PENALTY);

        // Non-M1 VRAM read: no penalty
        let before = bus.global_t_states();
        bus.read(0x3C00, false);
        assert_eq!(bus.global_t_states(), before);

        // M1 fetch from ROM or user RAM: no penalty
        let before = bus.global_t_states();
        bus.read(0x0000, true);
        bus.read(0x8000, true);
        assert_eq!(bus.global_t_states(), before);
    }

    #[test]
    fn port_ff_readback_and_playback_bit() {
        let mut bus = make_bus();
        bus.write_port(0xFF, 0x03);
        let value = bus.read_port(0xFF);
        assert_eq!(value & 0x7F, 0x03, "low bits echo the last write");
        assert!(bus.sound_bit());
    }

    #[test]
    fn flat_mode_is_plain_ram() {
        let mut bus = Trs80Bus::new_flat(Cassette::new(std::env::temp_dir()));
        bus.write(0x0000, 0x12); // ROM range writable in flat mode
        bus.write(0x3800, 0x34); // keyboard range too
        assert_eq!(bus.read(0x0000, false), 0x12);
        assert_eq!(bus.read(0x3800, false), 0x34);
    }
}
