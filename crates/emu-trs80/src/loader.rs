//! ROM-entrypoint software loader.
//!
//! Watches the program counter for the Level II BASIC cassette entry
//! points and short-circuits them against host files, so software loads
//! instantly (SYSTEM) or through accelerated FSK playback (CLOAD)
//! instead of real-time tape audio. Call the `on_*` probes every step;
//! each checks the PC and transport state itself before acting.
//!
//! # Intercepted entry points
//!
//! | PC     | Routine                                     |
//! |--------|---------------------------------------------|
//! | 0x02CE | SYSTEM loader preamble (before motor-on)    |
//! | 0x0293 | CLOAD cassette sync search                  |
//! | 0x0235 | First call into the per-byte cassette reader|
//! | 0x0240 | Return from the per-byte cassette reader    |
//! | 0x0284 | CSAVE write-leader entry                    |

use std::path::{Path, PathBuf};

use zilog_z80::Z80;

use crate::bus::Trs80Bus;
use crate::cassette::CassetteState;
use crate::injector::KeyInjector;

pub const ROM_SYSTEM_ENTRY: u16 = 0x02CE;
pub const ROM_SYNC_SEARCH: u16 = 0x0293;
pub const ROM_WRITE_LEADER: u16 = 0x0284;
pub const ROM_BASIC_READY: u16 = 0x1A19;
pub const ROM_CASIN_FIRST: u16 = 0x0235;
pub const ROM_CASIN_RET: u16 = 0x0240;

/// RAM location of the 2-byte pointer to the 6-character filename.
pub const ROM_FILENAME_PTR: u16 = 0x40A7;

/// Cassette and BASIC-source loading against a host software directory.
pub struct SoftwareLoader {
    software_dir: PathBuf,

    /// Set when the SYSTEM entry fires; suppresses the following CLOAD
    /// intercept so a failed fast-load is not replayed as BASIC.
    system_active: bool,

    // CLOAD progress tracking
    cload_active: bool,
    cload_realigned: bool,
    cload_byte_count: usize,
    cload_sync_pos: usize,

    /// Path supplied by `--load`; consumed by the next CLOAD intercept.
    cli_autoload_path: Option<PathBuf>,
    /// Queue `RUN` once the autoloaded cassette finishes.
    cli_autorun: bool,
}

impl SoftwareLoader {
    #[must_use]
    pub fn new(software_dir: PathBuf) -> Self {
        Self {
            software_dir,
            system_active: false,
            cload_active: false,
            cload_realigned: false,
            cload_byte_count: 0,
            cload_sync_pos: 0,
            cli_autoload_path: None,
            cli_autorun: false,
        }
    }

    // =========================================================================
    // Host file matching
    // =========================================================================

    fn file_ext(path: &Path) -> String {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Case-insensitive prefix match of `filename` against the stems of
    /// `.cas`/`.bas` files in the software directory; ties resolve to the
    /// lexicographically first path. An empty name matches everything.
    #[must_use]
    pub fn find_software(&self, filename: &str, tag: &str) -> Option<PathBuf> {
        eprintln!("[{tag}] searching for: '{filename}'");
        let entries = std::fs::read_dir(&self.software_dir).ok()?;
        let wanted = filename.to_lowercase();

        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| matches!(Self::file_ext(p).as_str(), "cas" | "bas"))
            .filter(|p| {
                let stem = p
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                wanted.is_empty() || stem.starts_with(&wanted)
            })
            .collect();

        if matches.is_empty() {
            eprintln!("[{tag}] no match found for: '{filename}'");
            return None;
        }
        matches.sort();
        eprintln!("[{tag}] picking: '{}'", matches[0].display());
        Some(matches.remove(0))
    }

    /// Read the filename out of RAM: follow the 2-byte pointer, skip a
    /// leading quote, take up to six printable characters, trim trailing
    /// spaces.
    #[must_use]
    pub fn extract_filename(bus: &Trs80Bus) -> String {
        let mut ptr = u16::from(bus.peek(ROM_FILENAME_PTR))
            | (u16::from(bus.peek(ROM_FILENAME_PTR + 1)) << 8);
        if bus.peek(ptr) == b'"' {
            ptr = ptr.wrapping_add(1);
        }
        let mut result = String::new();
        for i in 0..6 {
            let ch = bus.peek(ptr.wrapping_add(i));
            if ch == 0x00 || ch == b'"' || !(0x20..=0x7E).contains(&ch) {
                break;
            }
            result.push(ch as char);
        }
        while result.ends_with(' ') {
            result.pop();
        }
        result
    }

    // =========================================================================
    // SYSTEM-format images
    // =========================================================================

    /// True if the image is a SYSTEM (machine-language) file: optional
    /// 0x00 leader, then the 0xA5 sync byte and the 0x55 type byte.
    #[must_use]
    pub fn is_system_image(data: &[u8]) -> bool {
        let mut i = 0;
        while i < data.len() && data[i] == 0x00 {
            i += 1;
        }
        data.get(i) == Some(&0xA5) && data.get(i + 1) == Some(&0x55)
    }

    /// Parse a SYSTEM-format image and write its blocks into memory.
    ///
    /// Format: `[0x00 leader] [0xA5 sync] [0x55 type] [6-char name]`,
    /// then repeated `[0x3C] [count, 0 = 256] [load_lo] [load_hi]
    /// [data...] [checksum]` where the checksum is the load address
    /// bytes plus the data, mod 256; terminated by `[0x78] [exec_lo]
    /// [exec_hi]`. Checksum mismatches are logged but not fatal, the
    /// same as the ROM loader's behaviour.
    ///
    /// Returns the execution address.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated or malformed images.
    pub fn load_system_image(data: &[u8], bus: &mut Trs80Bus) -> Result<u16, String> {
        let mut i = 0;
        while i < data.len() && data[i] == 0x00 {
            i += 1;
        }

        if data.get(i) != Some(&0xA5) {
            return Err("no sync byte (0xA5)".to_string());
        }
        i += 1;
        if data.get(i) != Some(&0x55) {
            return Err("not a SYSTEM file (type byte != 0x55)".to_string());
        }
        i += 1;

        if i + 6 > data.len() {
            return Err("truncated filename".to_string());
        }
        let name: String = data[i..i + 6].iter().map(|&b| b as char).collect();
        i += 6;

        let mut blocks = 0;
        loop {
            let Some(&marker) = data.get(i) else {
                return Err("no EOF block (0x78)".to_string());
            };
            i += 1;

            match marker {
                0x3C => {
                    if i + 3 > data.len() {
                        return Err("truncated block header".to_string());
                    }
                    let count = data[i];
                    let load_lo = data[i + 1];
                    let load_hi = data[i + 2];
                    i += 3;
                    let load_addr = u16::from(load_lo) | (u16::from(load_hi) << 8);
                    let n = if count == 0 { 256 } else { usize::from(count) };

                    if i + n + 1 > data.len() {
                        return Err("truncated block data".to_string());
                    }
                    let mut checksum = load_hi.wrapping_add(load_lo);
                    for j in 0..n {
                        checksum = checksum.wrapping_add(data[i + j]);
                    }
                    if checksum != data[i + n] {
                        eprintln!(
                            "[SYSTEM] checksum error in block at 0x{load_addr:04X}: \
                             computed 0x{checksum:02X} stored 0x{:02X}",
                            data[i + n]
                        );
                    }

                    for j in 0..n {
                        bus.poke(load_addr.wrapping_add(j as u16), data[i + j]);
                    }
                    i += n + 1;
                    blocks += 1;
                }
                0x78 => {
                    if i + 2 > data.len() {
                        return Err("truncated EOF block".to_string());
                    }
                    let exec = u16::from(data[i]) | (u16::from(data[i + 1]) << 8);
                    eprintln!(
                        "[SYSTEM] loaded '{}' ({blocks} blocks), exec 0x{exec:04X}",
                        name.trim_end()
                    );
                    return Ok(exec);
                }
                other => {
                    return Err(format!("unknown block marker 0x{other:02X}"));
                }
            }
        }
    }

    // =========================================================================
    // CLI autoload
    // =========================================================================

    /// Translate a `--load <name>` argument into queued keystrokes and
    /// autoload state.
    pub fn setup_from_cli(&mut self, name: &str, injector: &mut KeyInjector) {
        let Some(path) = self.find_software(name, "LOAD") else {
            eprintln!("[LOAD] no file found matching: {name}");
            return;
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match Self::file_ext(&path).as_str() {
            "cas" => {
                let is_system = std::fs::read(&path)
                    .map(|d| Self::is_system_image(&d))
                    .unwrap_or(false);
                if is_system {
                    // The SYSTEM command is interactive: it prints "*?"
                    // and reads the filename through $KEY. The leading
                    // newline answers the cold-boot MEMORY SIZE? prompt.
                    injector.enqueue(&format!("\nSYSTEM\n{stem}\n"));
                } else {
                    // BASIC cassette: CLOAD plays it back, then autorun
                    self.cli_autoload_path = Some(path);
                    injector.enqueue("CLOAD\n");
                    self.cli_autorun = true;
                }
            }
            "bas" => {
                if let Err(e) = injector.load_source_file(&path) {
                    eprintln!("[BAS] {e}");
                }
                injector.enqueue("RUN\n");
            }
            _ => {}
        }
    }

    // =========================================================================
    // Per-step trap probes
    // =========================================================================

    /// SYSTEM loader preamble (0x02CE): fast-load a matching image and
    /// jump straight to its execution address.
    pub fn on_system_entry(&mut self, pc: u16, cpu: &mut Z80, bus: &mut Trs80Bus) {
        if pc != ROM_SYSTEM_ENTRY {
            return;
        }

        self.system_active = true;
        let filename = Self::extract_filename(bus);
        let Some(path) = self.find_software(&filename, "SYSTEM") else {
            return; // CLOAD intercept stays suppressed
        };
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("[SYSTEM] failed to open {}: {e}", path.display());
                return;
            }
        };
        match Self::load_system_image(&data, bus) {
            Ok(exec) => {
                cpu.set_pc(exec);
                self.system_active = false; // success: CLOAD won't fire
            }
            Err(e) => eprintln!("[SYSTEM] {}: {e}", path.display()),
        }
    }

    /// CLOAD sync search (0x0293): resolve a file and start playback, or
    /// inject a `.bas` source directly.
    pub fn on_cload_entry(
        &mut self,
        pc: u16,
        cpu: &mut Z80,
        bus: &mut Trs80Bus,
        injector: &mut KeyInjector,
    ) {
        if pc != ROM_SYNC_SEARCH || bus.cassette.state() != CassetteState::Idle {
            return;
        }

        if self.system_active {
            // Reached from a failed SYSTEM fast-load; skip this one
            self.system_active = false;
            return;
        }

        let (path, filename) = if let Some(path) = self.cli_autoload_path.take() {
            eprintln!("[CLOAD] using CLI autoload: {}", path.display());
            (Some(path), String::new())
        } else {
            let filename = Self::extract_filename(bus);
            (self.find_software(&filename, "CLOAD"), filename)
        };

        let Some(path) = path else {
            eprintln!("[CLOAD] no file found");
            return;
        };

        if Self::file_ext(&path) == "bas" {
            // Source file: inject keystrokes and warp back to READY
            if let Err(e) = injector.load_source_file(&path) {
                eprintln!("[BAS] {e}");
                return;
            }
            cpu.set_pc(ROM_BASIC_READY);
            return;
        }

        if let Err(e) = bus.cassette.load_file(&path) {
            eprintln!("[CLOAD] {e}");
            return;
        }
        bus.cassette
            .set_filename(if filename.is_empty() { "(auto)" } else { &filename });
        let now = bus.global_t_states();
        bus.cassette.start_playback(now);

        let image = bus.cassette.data();
        self.cload_active = true;
        self.cload_realigned = false;
        self.cload_byte_count = 0;
        self.cload_sync_pos = image.iter().position(|&b| b == 0xA5).unwrap_or(0);
        let data_bytes = image.len().saturating_sub(self.cload_sync_pos + 1);
        eprintln!("[CLOAD] {} ({data_bytes} bytes)", path.display());
    }

    /// Track an in-progress CLOAD: realign the cassette clock on the
    /// first per-byte read, count bytes, diagnose mismatches, and queue
    /// the autorun once playback stops.
    pub fn on_cload_tracking(
        &mut self,
        pc: u16,
        cpu: &Z80,
        bus: &mut Trs80Bus,
        injector: &mut KeyInjector,
    ) {
        if !self.cload_active {
            return;
        }

        if bus.cassette.state() == CassetteState::Playing {
            if pc == ROM_CASIN_FIRST && !self.cload_realigned {
                let now = bus.global_t_states();
                bus.cassette.realign(now);
                self.cload_realigned = true;
            }
            if pc == ROM_CASIN_RET {
                let actual = cpu.a();
                let image = bus.cassette.data();
                let expected_idx = self.cload_sync_pos + 1 + self.cload_byte_count;
                let expected = image.get(expected_idx).copied().unwrap_or(0xFF);
                let total = image.len().saturating_sub(self.cload_sync_pos + 1);

                if actual != expected {
                    eprintln!(
                        "[CLOAD] mismatch byte {}/{total}: got 0x{actual:02X} expected 0x{expected:02X}",
                        self.cload_byte_count
                    );
                }
                if self.cload_byte_count % 512 == 0 {
                    eprintln!("[CLOAD] progress: {} / {total} bytes", self.cload_byte_count);
                }
                self.cload_byte_count += 1;
            }
        }

        if bus.cassette.state() == CassetteState::Idle {
            eprintln!("[CLOAD] complete: {} bytes read", self.cload_byte_count);
            self.cload_active = false;
            if self.cli_autorun {
                injector.enqueue("RUN\n");
                self.cli_autorun = false;
            }
        }
    }

    /// CSAVE write-leader entry (0x0284): start recording under the
    /// filename extracted from RAM.
    pub fn on_csave_entry(&mut self, pc: u16, bus: &mut Trs80Bus) {
        if pc != ROM_WRITE_LEADER || bus.cassette.state() != CassetteState::Idle {
            return;
        }

        let filename = Self::extract_filename(bus);
        bus.cassette.set_filename(&filename);
        let now = bus.global_t_states();
        bus.cassette.start_recording(now);
        eprintln!(
            "[CSAVE] recording{}",
            if filename.is_empty() {
                String::new()
            } else {
                format!(" \"{filename}\"")
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::Cassette;

    fn make_bus() -> Trs80Bus {
        Trs80Bus::new(Cassette::new(std::env::temp_dir()))
    }

    /// Build a SYSTEM-format image with one block and an exec address.
    fn make_system_image(load: u16, payload: &[u8], exec: u16) -> Vec<u8> {
        let mut data = vec![0u8; 16]; // leader
        data.push(0xA5);
        data.push(0x55);
        data.extend_from_slice(b"TEST  ");

        data.push(0x3C);
        data.push(payload.len() as u8);
        let lo = (load & 0xFF) as u8;
        let hi = (load >> 8) as u8;
        data.push(lo);
        data.push(hi);
        data.extend_from_slice(payload);
        let checksum = payload
            .iter()
            .fold(lo.wrapping_add(hi), |acc, &b| acc.wrapping_add(b));
        data.push(checksum);

        data.push(0x78);
        data.push((exec & 0xFF) as u8);
        data.push((exec >> 8) as u8);
        data
    }

    #[test]
    fn system_image_detection() {
        let image = make_system_image(0x4000, &[1, 2, 3], 0x4000);
        assert!(SoftwareLoader::is_system_image(&image));
        assert!(!SoftwareLoader::is_system_image(&[0x00, 0x00, 0xA5, 0x00]));
        assert!(!SoftwareLoader::is_system_image(&[0x12, 0x34]));
    }

    #[test]
    fn system_image_loads_blocks_and_returns_exec() {
        let mut bus = make_bus();
        let image = make_system_image(0x4000, &[0x01, 0x02, 0x03], 0x4000);

        let exec = SoftwareLoader::load_system_image(&image, &mut bus).expect("valid image");
        assert_eq!(exec, 0x4000);
        assert_eq!(bus.peek(0x4000), 0x01);
        assert_eq!(bus.peek(0x4001), 0x02);
        assert_eq!(bus.peek(0x4002), 0x03);
    }

    #[test]
    fn system_image_count_zero_means_256() {
        let mut bus = make_bus();
        let payload = [0x5A; 256];
        // count byte 0 encodes a 256-byte block
        let mut image = vec![0xA5, 0x55];
        image.extend_from_slice(b"BIG   ");
        image.push(0x3C);
        image.push(0);
        image.push(0x00);
        image.push(0x50); // load 0x5000
        image.extend_from_slice(&payload);
        let checksum = payload
            .iter()
            .fold(0x50u8, |acc, &b| acc.wrapping_add(b));
        image.push(checksum);
        image.push(0x78);
        image.push(0x00);
        image.push(0x50);

        let exec = SoftwareLoader::load_system_image(&image, &mut bus).expect("valid image");
        assert_eq!(exec, 0x5000);
        assert_eq!(bus.peek(0x5000), 0x5A);
        assert_eq!(bus.peek(0x50FF), 0x5A);
    }

    #[test]
    fn system_image_checksum_mismatch_is_not_fatal() {
        let mut bus = make_bus();
        let mut image = make_system_image(0x4000, &[0x11], 0x4000);
        // Corrupt the checksum (last byte before the EOF block)
        let len = image.len();
        image[len - 4] ^= 0xFF;
        let exec = SoftwareLoader::load_system_image(&image, &mut bus);
        assert!(exec.is_ok(), "mismatch logs but loads");
        assert_eq!(bus.peek(0x4000), 0x11);
    }

    #[test]
    fn system_image_truncation_errors() {
        let mut bus = make_bus();
        assert!(SoftwareLoader::load_system_image(&[0x00, 0xA5], &mut bus).is_err());
        assert!(SoftwareLoader::load_system_image(&[0xA5, 0x55, b'A'], &mut bus).is_err());
    }

    #[test]
    fn filename_extraction_skips_quote_and_trims() {
        let mut bus = make_bus();
        // Pointer at 0x40A7 -> 0x5000
        bus.poke(ROM_FILENAME_PTR, 0x00);
        bus.poke(ROM_FILENAME_PTR + 1, 0x50);
        for (i, &b) in b"\"GAME  ".iter().enumerate() {
            bus.poke(0x5000 + i as u16, b);
        }
        assert_eq!(SoftwareLoader::extract_filename(&bus), "GAME");
    }

    #[test]
    fn filename_stops_at_terminator() {
        let mut bus = make_bus();
        bus.poke(ROM_FILENAME_PTR, 0x00);
        bus.poke(ROM_FILENAME_PTR + 1, 0x50);
        for (i, &b) in b"AB\x00XY".iter().enumerate() {
            bus.poke(0x5000 + i as u16, b);
        }
        assert_eq!(SoftwareLoader::extract_filename(&bus), "AB");
    }

    #[test]
    fn find_software_prefix_matches_case_insensitively() {
        let dir = std::env::temp_dir().join("trs80_loader_test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        std::fs::write(dir.join("Invaders.cas"), [0u8]).expect("write");
        std::fs::write(dir.join("invent.bas"), [0u8]).expect("write");
        std::fs::write(dir.join("other.txt"), [0u8]).expect("write");

        let loader = SoftwareLoader::new(dir.clone());
        let found = loader.find_software("INV", "TEST").expect("match");
        // Lexicographic first among the two matches
        assert_eq!(found.file_name().unwrap(), "Invaders.cas");

        assert!(loader.find_software("zzz", "TEST").is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn system_trap_loads_and_sets_pc() {
        let dir = std::env::temp_dir().join("trs80_system_trap_test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let image = make_system_image(0x4000, &[0xC3, 0x00, 0x40], 0x4000);
        std::fs::write(dir.join("prog.cas"), &image).expect("write");

        let mut bus = make_bus();
        // Filename "PROG" at 0x5000
        bus.poke(ROM_FILENAME_PTR, 0x00);
        bus.poke(ROM_FILENAME_PTR + 1, 0x50);
        for (i, &b) in b"PROG".iter().enumerate() {
            bus.poke(0x5000 + i as u16, b);
        }

        let mut cpu = Z80::new();
        let mut loader = SoftwareLoader::new(dir.clone());
        loader.on_system_entry(ROM_SYSTEM_ENTRY, &mut cpu, &mut bus);

        assert_eq!(cpu.pc(), 0x4000);
        assert_eq!(bus.peek(0x4000), 0xC3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn csave_trap_starts_recording() {
        let mut bus = make_bus();
        bus.poke(ROM_FILENAME_PTR, 0x00);
        bus.poke(ROM_FILENAME_PTR + 1, 0x50);
        for (i, &b) in b"SAVED".iter().enumerate() {
            bus.poke(0x5000 + i as u16, b);
        }

        let mut loader = SoftwareLoader::new(std::env::temp_dir());
        loader.on_csave_entry(ROM_WRITE_LEADER, &mut bus);
        assert_eq!(bus.cassette.state(), CassetteState::Recording);
        assert_eq!(bus.cassette.filename(), "SAVED");
    }
}
