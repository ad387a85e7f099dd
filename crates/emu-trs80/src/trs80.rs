//! Top-level TRS-80 machine and the budget-a-frame scheduler.
//!
//! One 60 Hz frame is 29,498 T-states; turbo runs 100 frames' worth per
//! iteration. Within the budget each step follows a fixed effect order:
//! trap probes, the $KEY intercept (which replaces the CPU step when it
//! fires), trace recording and freeze check, the CPU step, bus tick
//! accounting, audio sampling, interrupt acceptance, cassette polling.

use zilog_z80::{Bus, Z80};

use crate::bus::{TSTATES_PER_FRAME, Trs80Bus};
use crate::cassette::{Cassette, CassetteState};
use crate::config::Trs80Config;
use crate::dac::Dac;
use crate::debugger::Debugger;
use crate::injector::KeyInjector;
use crate::loader::SoftwareLoader;

/// How a trap probe resolved: the CPU should step normally, or the trap
/// replaced the step and consumed T-states of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    Stepped,
    Skipped(u64),
}

/// Emulation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedMode {
    Normal,
    Turbo,
}

/// Turbo multiplier over the normal frame budget.
const TURBO_FACTOR: u64 = 100;
/// IM1 acceptance latency: 2 T sample + 11 T push-and-jump.
const IM1_LATENCY: u64 = 13;

/// The machine: CPU, bus, traps, injector, debugger, and audio DAC.
pub struct Trs80 {
    pub cpu: Z80,
    pub bus: Trs80Bus,
    pub loader: SoftwareLoader,
    pub injector: KeyInjector,
    pub debugger: Debugger,
    pub dac: Dac,

    total_ticks: u64,
}

impl Trs80 {
    /// Build a machine from a configuration. The ROM image, when
    /// non-empty, is installed at 0x0000.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM image does not fit its window.
    pub fn new(config: Trs80Config) -> Result<Self, String> {
        let cassette = Cassette::new(config.software_dir.clone());
        let mut bus = Trs80Bus::new(cassette);
        if !config.rom.is_empty() {
            bus.load_rom_image(&config.rom)?;
        }

        let mut cpu = Z80::new();
        cpu.reset();

        Ok(Self {
            cpu,
            bus,
            loader: SoftwareLoader::new(config.software_dir),
            injector: KeyInjector::new(),
            debugger: Debugger::new(config.trace_path),
            dac: Dac::new(),
            total_ticks: 0,
        })
    }

    /// Cumulative T-states across the whole run.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// The frame budget for a speed mode.
    #[must_use]
    pub fn frame_budget(speed: SpeedMode) -> u64 {
        match speed {
            SpeedMode::Normal => TSTATES_PER_FRAME,
            SpeedMode::Turbo => TSTATES_PER_FRAME * TURBO_FACTOR,
        }
    }

    /// Run one frame's worth of T-states.
    pub fn step_frame(&mut self, t_budget: u64, mute_audio: bool) {
        let mut frame_ts: u64 = 0;
        while frame_ts < t_budget {
            let pc = self.cpu.pc();

            // ROM trap probes, in fixed order
            self.loader.on_system_entry(pc, &mut self.cpu, &mut self.bus);
            self.loader
                .on_cload_entry(pc, &mut self.cpu, &mut self.bus, &mut self.injector);
            self.loader
                .on_cload_tracking(pc, &self.cpu, &mut self.bus, &mut self.injector);
            self.loader.on_csave_entry(pc, &mut self.bus);

            if let TrapOutcome::Skipped(ticks) =
                self.injector.handle_intercept(pc, &mut self.cpu, &mut self.bus)
            {
                self.bus.add_ticks(ticks);
                frame_ts += ticks;
                self.total_ticks += ticks;
                continue;
            }

            self.debugger.record(&self.cpu, self.total_ticks);
            if self.debugger.check_freeze(pc) {
                self.debugger.dump(&self.bus);
            }

            let ticks = u64::from(self.cpu.step(&mut self.bus));
            self.bus.add_ticks(ticks);
            frame_ts += ticks;
            self.total_ticks += ticks;

            // Audio: mute while the cassette is busy or in turbo
            let audio_active =
                !mute_audio && self.bus.cassette.state() == CassetteState::Idle;
            self.dac
                .update(self.bus.sound_bit(), ticks, audio_active);

            frame_ts += self.deliver_interrupt();

            // Cassette transport polling
            let now = self.bus.global_t_states();
            if self.bus.cassette.recording_idle(now) || self.bus.cassette.playback_done(now) {
                self.bus.cassette.stop();
            }
        }
    }

    /// IM1 acceptance: runs after the instruction that crossed the frame
    /// boundary, never mid-instruction. IFF2 saves IFF1 for RETI/RETN;
    /// clearing IFF2 here would make RETI disable interrupts permanently.
    fn deliver_interrupt(&mut self) -> u64 {
        if !self.bus.interrupt_pending() || !self.cpu.iff1() {
            return 0;
        }

        self.bus.clear_interrupt();
        self.cpu.set_iff2(self.cpu.iff1());
        self.cpu.set_iff1(false);

        if self.cpu.halted() {
            // Wake from HALT: resume at the instruction after it
            self.cpu.set_halted(false);
            self.cpu.set_pc(self.cpu.pc().wrapping_add(1));
        }

        let sp = self.cpu.sp().wrapping_sub(2);
        let ret = self.cpu.pc();
        self.bus.write(sp, (ret & 0xFF) as u8);
        self.bus.write(sp.wrapping_add(1), (ret >> 8) as u8);
        self.cpu.set_sp(sp);
        self.cpu.set_pc(0x0038);

        self.bus.add_ticks(IM1_LATENCY);
        self.total_ticks += IM1_LATENCY;
        IM1_LATENCY
    }

    /// Final trace dump on shutdown, freeze or not.
    pub fn dump_trace(&self) {
        if self.debugger.has_entries() {
            self.debugger.dump(&self.bus);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{TOTAL_SCANLINES, TSTATES_PER_SCANLINE};

    fn make_machine() -> Trs80 {
        let mut rom = vec![0u8; 0x3000];
        rom[0] = 0xC3; // JP 0x0000: spin at the reset vector
        rom[1] = 0x00;
        rom[2] = 0x00;
        Trs80::new(Trs80Config {
            rom,
            software_dir: std::env::temp_dir(),
            trace_path: std::env::temp_dir().join("trs80_driver_test.log"),
        })
        .expect("machine builds")
    }

    #[test]
    fn step_frame_consumes_budget() {
        let mut machine = make_machine();
        machine.step_frame(1000, true);
        assert!(machine.total_ticks() >= 1000);
        assert!(machine.total_ticks() < 1100, "stops soon after the budget");
    }

    #[test]
    fn interrupt_acceptance_protocol() {
        let mut machine = make_machine();
        // EI; then spin
        let mut rom = vec![0u8; 0x3000];
        rom[0] = 0xFB; // EI
        rom[1] = 0xC3; // JP 0x0001
        rom[2] = 0x01;
        rom[3] = 0x00;
        machine.bus.load_rom_image(&rom).expect("ROM fits");
        machine.cpu.reset();
        machine.cpu.set_sp(0x8000);
        machine.cpu.step(&mut machine.bus); // EI

        // Force a frame boundary
        machine
            .bus
            .add_ticks(u64::from(TSTATES_PER_SCANLINE) * u64::from(TOTAL_SCANLINES));
        assert!(machine.bus.interrupt_pending());

        let pc_before = machine.cpu.pc();
        let ticks = machine.deliver_interrupt();
        assert_eq!(ticks, 13);
        assert_eq!(machine.cpu.pc(), 0x0038);
        assert_eq!(machine.cpu.sp(), 0x7FFE);
        assert!(!machine.cpu.iff1());
        assert!(machine.cpu.iff2(), "IFF2 preserves the pre-acceptance state");
        let pushed = u16::from(machine.bus.peek(0x7FFE))
            | (u16::from(machine.bus.peek(0x7FFF)) << 8);
        assert_eq!(pushed, pc_before);
    }

    #[test]
    fn interrupt_wakes_halted_cpu() {
        let mut machine = make_machine();
        let mut rom = vec![0u8; 0x3000];
        rom[0] = 0xFB; // EI
        rom[1] = 0x76; // HALT
        machine.bus.load_rom_image(&rom).expect("ROM fits");
        machine.cpu.reset();
        machine.cpu.set_sp(0x8000);
        machine.cpu.step(&mut machine.bus);
        machine.cpu.step(&mut machine.bus);
        assert!(machine.cpu.halted());

        machine
            .bus
            .add_ticks(u64::from(TSTATES_PER_SCANLINE) * u64::from(TOTAL_SCANLINES));
        machine.deliver_interrupt();

        assert!(!machine.cpu.halted());
        assert_eq!(machine.cpu.pc(), 0x0038);
        // The pushed address is the instruction after HALT
        let pushed = u16::from(machine.bus.peek(0x7FFE))
            | (u16::from(machine.bus.peek(0x7FFF)) << 8);
        assert_eq!(pushed, 0x0002);
    }

    #[test]
    fn no_delivery_with_interrupts_disabled() {
        let mut machine = make_machine();
        machine
            .bus
            .add_ticks(u64::from(TSTATES_PER_SCANLINE) * u64::from(TOTAL_SCANLINES));
        assert!(machine.bus.interrupt_pending());
        assert_eq!(machine.deliver_interrupt(), 0, "IFF1 clear blocks delivery");
        assert!(machine.bus.interrupt_pending(), "still pending");
    }

    #[test]
    fn key_injection_drains_through_frame() {
        let mut machine = make_machine();
        // ROM: CALL 0x0049 in a loop; $KEY itself would spin forever,
        // but the intercept fakes the RET before it ever runs.
        let mut rom = vec![0u8; 0x3000];
        rom[0] = 0xCD; // CALL 0x0049
        rom[1] = 0x49;
        rom[2] = 0x00;
        rom[3] = 0xC3; // JP 0x0000
        rom[4] = 0x00;
        rom[5] = 0x00;
        // $KEY body: JR -2 (never reached when the queue is full)
        rom[0x49] = 0x18;
        rom[0x4A] = 0xFE;
        machine.bus.load_rom_image(&rom).expect("ROM fits");
        machine.cpu.reset();
        machine.cpu.set_sp(0x8000);

        machine.injector.enqueue("AB");
        machine.step_frame(200, true);
        assert!(!machine.injector.is_active(), "queue drained via $KEY trap");
        assert_eq!(machine.cpu.a(), b'B');
    }
}
