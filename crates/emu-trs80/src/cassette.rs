//! FSK cassette engine.
//!
//! Level II BASIC records at 500 baud: each data byte is eight bit-cells
//! of `BIT_PERIOD` T-states, MSB first. A 0 bit is one full square-wave
//! cycle per cell (half-period `BIT_PERIOD/2`); a 1 bit is two cycles
//! (half-period `BIT_PERIOD/4`). Playback computes the line level as a
//! closed-form function of the T-clock; recording classifies the interval
//! between consecutive rising edges of the port output.

use std::path::{Path, PathBuf};

/// T-states per bit cell at 500 baud (1.77408 MHz CPU clock).
pub const BIT_PERIOD: u64 = 3548;
/// Half-period of the 0-bit waveform.
pub const HALF_0: u64 = BIT_PERIOD / 2;
/// Half-period of the 1-bit waveform.
pub const HALF_1: u64 = BIT_PERIOD / 4;
/// Rising-edge interval above this is a completed 0-bit cycle.
pub const CYCLE_THRESHOLD: u64 = 2600;
/// No port activity for this long ends a recording (~113 ms).
pub const IDLE_TIMEOUT: u64 = 200_000;

/// T-states per byte cell.
const BYTE_PERIOD: u64 = BIT_PERIOD * 8;
/// Zero padding emitted past end-of-image so the ROM's final edge-detect
/// terminates cleanly.
const TRAILER_BYTES: u64 = 500;
/// Idle-line toggle half-period; a stuck wait-for-high loop in the ROM
/// terminates by timeout instead of hanging.
const IDLE_TOGGLE_HALF: u64 = 1000;

/// Cassette transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteState {
    Idle,
    Playing,
    Recording,
}

/// The cassette deck: one image for playback, one byte stream being
/// assembled during recording.
pub struct Cassette {
    state: CassetteState,
    /// Filename tag used when saving a recording.
    filename: String,
    /// Directory recordings are saved into.
    save_dir: PathBuf,

    // Playback
    data: Vec<u8>,
    playback_start_t: u64,

    // Recording
    rec_data: Vec<u8>,
    last_edge_t: Option<u64>,
    short_cycles: u32,
    rec_byte: u8,
    rec_bits: u32,
    prev_port_val: u8,
    last_activity_t: u64,
}

impl Cassette {
    #[must_use]
    pub fn new(save_dir: PathBuf) -> Self {
        Self {
            state: CassetteState::Idle,
            filename: String::new(),
            save_dir,
            data: Vec::new(),
            playback_start_t: 0,
            rec_data: Vec::new(),
            last_edge_t: None,
            short_cycles: 0,
            rec_byte: 0,
            rec_bits: 0,
            prev_port_val: 0,
            last_activity_t: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> CassetteState {
        self.state
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_filename(&mut self, name: &str) {
        self.filename = name.to_string();
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Load a cassette image for playback.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load_file(&mut self, path: &Path) -> Result<(), String> {
        self.data = std::fs::read(path)
            .map_err(|e| format!("cannot read cassette image {}: {e}", path.display()))?;
        Ok(())
    }

    /// Use an in-memory image for playback.
    pub fn load_image(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn start_playback(&mut self, now: u64) {
        self.state = CassetteState::Playing;
        self.playback_start_t = now;
    }

    pub fn start_recording(&mut self, now: u64) {
        self.state = CassetteState::Recording;
        self.rec_data.clear();
        self.last_edge_t = None;
        self.short_cycles = 0;
        self.rec_byte = 0;
        self.rec_bits = 0;
        self.last_activity_t = now;
    }

    /// Stop the transport. A recording flushes any half-assembled byte
    /// (left-aligned) and, when a filename tag is set, saves the stream
    /// under the software directory.
    pub fn stop(&mut self) {
        if self.state == CassetteState::Recording {
            if self.rec_bits > 0 {
                let padded = self.rec_byte << (8 - self.rec_bits);
                self.rec_data.push(padded);
                self.rec_byte = 0;
                self.rec_bits = 0;
            }
            eprintln!("[CAS] recording stopped: {} bytes", self.rec_data.len());
            if !self.filename.is_empty() && !self.rec_data.is_empty() {
                let path = self.save_dir.join(format!("{}.cas", self.filename));
                match std::fs::write(&path, &self.rec_data) {
                    Ok(()) => eprintln!("[CAS] saved {}", path.display()),
                    Err(e) => eprintln!("[CAS] save failed {}: {e}", path.display()),
                }
            }
        }
        self.state = CassetteState::Idle;
    }

    /// Bytes assembled by the current/most recent recording.
    #[must_use]
    pub fn recorded(&self) -> &[u8] {
        &self.rec_data
    }

    // =========================================================================
    // Playback signal
    // =========================================================================

    /// The line level as sampled through bit 7 of port 0xFF.
    #[must_use]
    pub fn signal(&self, now: u64) -> bool {
        if self.state != CassetteState::Playing {
            // Slow idle toggle so a wait-for-high loop still terminates
            return (now / IDLE_TOGGLE_HALF) % 2 == 0;
        }

        let elapsed = now.saturating_sub(self.playback_start_t);
        // Lead-in: hold LOW for one half-period so the ROM does not lock
        // onto a false edge at motor start.
        if elapsed < HALF_0 {
            return false;
        }

        let after = elapsed - HALF_0;
        let byte_idx = (after / BYTE_PERIOD) as usize;
        let byte = self.data.get(byte_idx).copied().unwrap_or(0x00);

        let in_byte = after % BYTE_PERIOD;
        let bit_idx = (in_byte / BIT_PERIOD) as u8;
        let bit = (byte >> (7 - bit_idx)) & 1;

        let half = if bit != 0 { HALF_1 } else { HALF_0 };
        let phase = (in_byte % BIT_PERIOD) / half;
        phase % 2 == 0
    }

    /// Current playback position: (byte index, bit index, bit value).
    #[must_use]
    pub fn position(&self, now: u64) -> (usize, u8, bool) {
        let elapsed = now.saturating_sub(self.playback_start_t);
        let after = elapsed.saturating_sub(HALF_0);
        let byte_idx = (after / BYTE_PERIOD) as usize;
        let bit_idx = ((after % BYTE_PERIOD) / BIT_PERIOD) as u8;
        let byte = self.data.get(byte_idx).copied().unwrap_or(0x00);
        (byte_idx, bit_idx, (byte >> (7 - bit_idx)) & 1 != 0)
    }

    /// Snap the playback clock so `now` sits at the start of the current
    /// byte cell. Invoked once when the ROM first enters its per-byte
    /// reader, which otherwise starts mid-cell after the sync search.
    pub fn realign(&mut self, now: u64) {
        let (byte_idx, _, _) = self.position(now);
        self.playback_start_t = now - HALF_0 - byte_idx as u64 * BYTE_PERIOD;
    }

    /// True when playback has run past the image and its zero trailer.
    #[must_use]
    pub fn playback_done(&self, now: u64) -> bool {
        if self.state != CassetteState::Playing {
            return false;
        }
        let after = now
            .saturating_sub(self.playback_start_t)
            .saturating_sub(HALF_0);
        after / BYTE_PERIOD >= self.data.len() as u64 + TRAILER_BYTES
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Inspect a port-0xFF write. During recording, a rising edge on bit 0
    /// feeds the interval classifier.
    pub fn on_port_write(&mut self, value: u8, now: u64) {
        let rising = self.prev_port_val & 0x01 == 0 && value & 0x01 != 0;
        self.prev_port_val = value;

        if self.state != CassetteState::Recording {
            return;
        }
        self.last_activity_t = now;
        if rising {
            self.on_cycle_start(now);
        }
    }

    /// A rising edge: classify the interval since the previous one.
    fn on_cycle_start(&mut self, now: u64) {
        let Some(last) = self.last_edge_t else {
            self.last_edge_t = Some(now);
            return;
        };
        let interval = now - last;
        self.last_edge_t = Some(now);

        if interval > IDLE_TIMEOUT {
            // Long silence: this edge starts a new block
            self.short_cycles = 0;
        } else if interval > CYCLE_THRESHOLD {
            // Long cycle: the previous bit-cell was a 0
            self.record_bit(false);
            self.short_cycles = 0;
        } else {
            self.short_cycles += 1;
            if self.short_cycles == 2 {
                self.record_bit(true);
                self.short_cycles = 0;
            }
        }
    }

    fn record_bit(&mut self, bit: bool) {
        self.rec_byte = (self.rec_byte << 1) | u8::from(bit);
        self.rec_bits += 1;
        if self.rec_bits == 8 {
            self.rec_data.push(self.rec_byte);
            self.rec_byte = 0;
            self.rec_bits = 0;
        }
    }

    /// True when a recording has seen no port activity for the timeout.
    #[must_use]
    pub fn recording_idle(&self, now: u64) -> bool {
        self.state == CassetteState::Recording
            && now.saturating_sub(self.last_activity_t) > IDLE_TIMEOUT
    }

    /// Transport status for the window title, or `None` when idle.
    #[must_use]
    pub fn status_line(&self, now: u64) -> Option<String> {
        match self.state {
            CassetteState::Idle => None,
            CassetteState::Playing => {
                let (byte_idx, _, _) = self.position(now);
                let total = self.data.len().max(1);
                let pct = (byte_idx.min(total) * 100) / total;
                Some(format!("PLAY {pct}%"))
            }
            CassetteState::Recording => Some(format!("REC {} bytes", self.rec_data.len())),
        }
    }
}
