//! TRS-80 Model I emulator core.
//!
//! A Z80 at 1.77 MHz, 12 KiB of Level II BASIC ROM, a memory-mapped
//! keyboard matrix, 1 KiB of character-cell video RAM, a 500-baud FSK
//! cassette port, and an optional FD1771 floppy controller behind the
//! expansion interface. ROM-entrypoint traps fast-load cassette software
//! and inject keystrokes.

pub mod bus;
pub mod cassette;
pub mod config;
pub mod dac;
pub mod debugger;
pub mod font;
pub mod injector;
pub mod keyboard;
pub mod keyboard_map;
pub mod loader;
pub mod trs80;
pub mod video;

pub use bus::Trs80Bus;
pub use cassette::{Cassette, CassetteState};
pub use config::Trs80Config;
pub use dac::Dac;
pub use debugger::Debugger;
pub use injector::KeyInjector;
pub use keyboard::KeyboardMatrix;
pub use loader::SoftwareLoader;
pub use trs80::{SpeedMode, TrapOutcome, Trs80};
pub use video::Video;
