//! 1-bit audio DAC.
//!
//! The machine has no speaker: software toggles bit 1 of port 0xFF at
//! audio frequencies and the cassette output jack feeds an external
//! amplifier. The jack's RC network smooths the square edges; an IIR
//! low-pass stands in for it, followed by a DC-blocking high-pass so
//! silence settles at zero instead of popping when sound starts or stops.

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;
/// T-states per audio sample: 1,774,000 Hz / 44,100 Hz.
const TICKS_PER_SAMPLE: u64 = 40;
/// Low-pass coefficient for a ~4 kHz cutoff at 44.1 kHz.
const LP_ALPHA: f32 = 0.363;
/// DC-blocking coefficient (~7 Hz cutoff, passes all audio).
const HP_ALPHA: f32 = 0.999;
/// Output amplitude; half scale leaves headroom.
const AMPLITUDE: f32 = 0.5;

/// Converts the 1-bit sound line into filtered f32 samples.
///
/// The machine pushes samples during `step_frame`; the frontend drains
/// them once per frame with [`Dac::take_buffer`].
pub struct Dac {
    lp_state: f32,
    hp_state: f32,
    ticks_acc: u64,
    buf: Vec<f32>,
}

impl Dac {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lp_state: 0.0,
            hp_state: 0.0,
            ticks_acc: 0,
            buf: Vec::with_capacity(SAMPLE_RATE as usize / 60 + 64),
        }
    }

    /// Advance by one instruction's worth of T-states.
    ///
    /// `active` is false during cassette I/O and turbo mode; the input is
    /// then driven toward zero so the filter decays smoothly to silence.
    pub fn update(&mut self, sound_bit: bool, ticks: u64, active: bool) {
        let raw = if active {
            if sound_bit { 1.0 } else { -1.0 }
        } else {
            0.0
        };

        self.ticks_acc += ticks;
        while self.ticks_acc >= TICKS_PER_SAMPLE {
            self.ticks_acc -= TICKS_PER_SAMPLE;

            let lp = LP_ALPHA * raw + (1.0 - LP_ALPHA) * self.lp_state;
            let hp = lp - self.lp_state + HP_ALPHA * self.hp_state;
            self.lp_state = lp;
            self.hp_state = hp;

            self.buf.push(hp * AMPLITUDE);
        }
    }

    /// Drain the accumulated samples.
    pub fn take_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buf)
    }

    /// Discard buffered samples and reset the filters. Called when
    /// leaving turbo mode so stale silence does not play before live
    /// audio.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.lp_state = 0.0;
        self.hp_state = 0.0;
        self.ticks_acc = 0;
    }
}

impl Default for Dac {
    fn default() -> Self {
        Self::new()
    }
}
