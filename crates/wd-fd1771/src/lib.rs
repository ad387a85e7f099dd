//! Western Digital FD1771 floppy disk controller.
//!
//! Registers are memory-mapped by the host machine:
//!
//! | Offset | Read                              | Write                     |
//! |--------|-----------------------------------|---------------------------|
//! | 0      | Status (clears INTRQ)             | Command                   |
//! | 1      | Track register                    | Track register            |
//! | 2      | Sector register                   | Sector register           |
//! | 3      | Data register (advances transfer) | Data register (transfer)  |
//!
//! Disk images are flat arrays of 256-byte sectors in track-major order:
//! `offset = (track * SECTORS_PER_TRACK + sector) * BYTES_PER_SECTOR`.
//! Single-sided, single-density, up to 35 tracks. DRQ is polled by
//! software; there is no /WAIT hardware, so transfers complete as fast as
//! the host reads or writes the data register.

pub const DRIVES: usize = 4;
pub const SECTORS_PER_TRACK: u8 = 10;
pub const BYTES_PER_SECTOR: usize = 256;
pub const MAX_TRACKS: u8 = 35;

// Status register bits
pub const ST_BUSY: u8 = 0x01; // Command in progress
pub const ST_DRQ: u8 = 0x02; // Data request (type II/III)
pub const ST_TRACK0: u8 = 0x04; // Head on track 0 (type I)
pub const ST_RNF: u8 = 0x10; // Record not found (type II/III)
pub const ST_RECTYPE: u8 = 0x20; // Deleted data address mark (type II/III)
pub const ST_NOTREADY: u8 = 0x80; // No disk in drive

/// TRSDOS keeps its directory on track 17, written with deleted data marks.
const DIRECTORY_TRACK: u8 = 17;

/// One drive slot.
#[derive(Default)]
struct Drive {
    image: Vec<u8>,
    head_track: u8,
    loaded: bool,
}

impl Drive {
    fn sector_offset(track: u8, sector: u8) -> usize {
        (usize::from(track) * usize::from(SECTORS_PER_TRACK) + usize::from(sector))
            * BYTES_PER_SECTOR
    }

    fn read_sector(&self, track: u8, sector: u8) -> [u8; BYTES_PER_SECTOR] {
        let mut out = [0u8; BYTES_PER_SECTOR];
        let offset = Self::sector_offset(track, sector);
        if offset + BYTES_PER_SECTOR <= self.image.len() {
            out.copy_from_slice(&self.image[offset..offset + BYTES_PER_SECTOR]);
        }
        out
    }

    fn write_sector(&mut self, track: u8, sector: u8, data: &[u8; BYTES_PER_SECTOR]) {
        let offset = Self::sector_offset(track, sector);
        if offset + BYTES_PER_SECTOR > self.image.len() {
            // Extend the image (e.g. formatting a larger disk)
            self.image.resize(offset + BYTES_PER_SECTOR, 0x00);
        }
        self.image[offset..offset + BYTES_PER_SECTOR].copy_from_slice(data);
    }
}

/// FD1771 controller with four drive slots.
pub struct Fd1771 {
    drives: [Drive; DRIVES],

    status: u8,
    track: u8,
    sector: u8,
    data: u8,

    /// Drive select latch (bits 0-2 = drives, bit 3 = side select).
    drive_sel: u8,
    /// Last explicitly-selected drive, sticky across motor-off deselect.
    last_drive: usize,

    // Transfer buffer shared by Read Sector, Write Sector, Read Address
    buf: [u8; BYTES_PER_SECTOR],
    buf_pos: usize,
    buf_len: usize,

    // Write Sector commit target
    write_pending: bool,
    write_track: u8,
    write_sector: u8,

    intrq: bool,

    /// Last step direction (+1 = in, -1 = out).
    last_dir: i8,
}

impl Fd1771 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            drives: Default::default(),
            status: 0,
            track: 0,
            sector: 0,
            data: 0,
            drive_sel: 0,
            last_drive: 0,
            buf: [0; BYTES_PER_SECTOR],
            buf_pos: 0,
            buf_len: 0,
            write_pending: false,
            write_track: 0,
            write_sector: 0,
            intrq: false,
            last_dir: 1,
        }
    }

    /// Load a flat disk image into a drive slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the drive index is out of range or the file
    /// cannot be read.
    pub fn load_disk(&mut self, drive: usize, path: &str) -> Result<(), String> {
        if drive >= DRIVES {
            return Err(format!("invalid drive index {drive}"));
        }
        let image =
            std::fs::read(path).map_err(|e| format!("cannot open disk image {path}: {e}"))?;
        let tracks = image.len() / (usize::from(SECTORS_PER_TRACK) * BYTES_PER_SECTOR);
        eprintln!("[FDC] drive {drive}: loaded {path} ({} bytes, {tracks} tracks)", image.len());
        self.insert_image(drive, image);
        Ok(())
    }

    /// Insert an in-memory image into a drive slot.
    pub fn insert_image(&mut self, drive: usize, image: Vec<u8>) {
        self.drives[drive].image = image;
        self.drives[drive].loaded = true;
        self.drives[drive].head_track = 0;
        // Power-on state: head on track 0, drive ready. The Level II ROM
        // treats status 0x00 the same as 0xFF (no controller), so TRACK0
        // must be visible immediately.
        self.status = ST_TRACK0;
    }

    /// True if any drive has a disk loaded.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.drives.iter().any(|d| d.loaded)
    }

    /// INTRQ flag; combined into the host's interrupt line.
    /// Set when a command completes, cleared when the status register is read.
    #[must_use]
    pub fn intrq_pending(&self) -> bool {
        self.intrq
    }

    /// Drive select latch write (host 0x37E0-0x37E3).
    ///
    /// Bits 0-2 select drives 0-2; bit 3 is side select (ignored for
    /// single-sided images). A write with no drive bits set is a motor-off
    /// deselect: the selected drive is retained so a command arriving
    /// before the next select still addresses the intended drive.
    pub fn select_drive(&mut self, value: u8) {
        self.drive_sel = value;
        for i in 0..3 {
            if value & (1 << i) != 0 {
                self.last_drive = i;
                break;
            }
        }
    }

    fn current_drive(&self) -> usize {
        for i in 0..3 {
            if self.drive_sel & (1 << i) != 0 {
                return i;
            }
        }
        self.last_drive
    }

    fn active_drive(&mut self) -> Option<&mut Drive> {
        let idx = self.current_drive();
        if self.drives[idx].loaded {
            Some(&mut self.drives[idx])
        } else {
            None
        }
    }

    /// Peek a byte of a drive's backing image (diagnostics and tests).
    #[must_use]
    pub fn image_byte(&self, drive: usize, offset: usize) -> u8 {
        self.drives[drive].image.get(offset).copied().unwrap_or(0)
    }

    // =========================================================================
    // Register access (offset 0-3 from the host's register window)
    // =========================================================================

    pub fn read(&mut self, offset: u16) -> u8 {
        match offset {
            0 => {
                // Status — reading clears INTRQ
                self.intrq = false;
                if self.is_present() { self.status } else { 0xFF }
            }
            1 => self.track,
            2 => self.sector,
            3 => {
                // Data register — drives the byte-by-byte transfer
                if self.buf_len > 0 && self.buf_pos < self.buf_len && !self.write_pending {
                    self.data = self.buf[self.buf_pos];
                    self.buf_pos += 1;
                    if self.buf_pos >= self.buf_len {
                        // All bytes delivered — command complete
                        self.buf_len = 0;
                        self.status &= !(ST_BUSY | ST_DRQ);
                        self.intrq = true;
                    }
                }
                self.data
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, offset: u16, value: u8) {
        match offset {
            0 => self.execute_command(value),
            1 => self.track = value,
            2 => self.sector = value,
            3 => {
                self.data = value;
                if self.write_pending && self.buf_pos < self.buf_len {
                    self.buf[self.buf_pos] = value;
                    self.buf_pos += 1;
                    if self.buf_pos >= self.buf_len {
                        // All bytes received — commit to the backing image
                        let track = self.write_track;
                        let sector = self.write_sector;
                        let buf = self.buf;
                        if let Some(drive) = self.active_drive() {
                            drive.write_sector(track, sector, &buf);
                        }
                        self.buf_len = 0;
                        self.write_pending = false;
                        self.status &= !(ST_BUSY | ST_DRQ);
                        self.intrq = true;
                    }
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Command dispatch (high nibble selects the command group)
    // =========================================================================

    fn execute_command(&mut self, cmd: u8) {
        // A new command cancels any in-progress transfer
        self.buf_len = 0;
        self.buf_pos = 0;
        self.write_pending = false;
        self.intrq = false;

        match cmd >> 4 {
            0x0 => self.cmd_restore(),
            0x1 => self.cmd_seek(),
            0x2 => self.cmd_step(self.last_dir, false),
            0x3 => self.cmd_step(self.last_dir, true),
            0x4 => self.cmd_step(1, false),
            0x5 => self.cmd_step(1, true),
            0x6 => self.cmd_step(-1, false),
            0x7 => self.cmd_step(-1, true),
            0x8 | 0x9 => self.cmd_read_sector(),
            0xA | 0xB => self.cmd_write_sector(),
            0xC => self.cmd_read_address(),
            0xD => self.cmd_force_interrupt(cmd),
            // 0xE = Read Track, 0xF = Write Track — not needed to boot or run
            _ => {
                eprintln!("[FDC] unsupported command 0x{cmd:02X}");
                self.cmd_force_interrupt(0xD0);
            }
        }
    }

    fn not_ready(&mut self) {
        self.status = ST_NOTREADY;
        self.intrq = true;
    }

    // ---- Type I: head positioning ----

    fn cmd_restore(&mut self) {
        if self.active_drive().is_none() {
            return self.not_ready();
        }
        if let Some(drive) = self.active_drive() {
            drive.head_track = 0;
        }
        self.track = 0;
        self.status = ST_TRACK0;
        self.intrq = true;
    }

    fn cmd_seek(&mut self) {
        let target = self.data.min(MAX_TRACKS - 1);
        let Some(drive) = self.active_drive() else {
            return self.not_ready();
        };
        let dir = if target > drive.head_track { 1 } else { -1 };
        drive.head_track = target;
        self.last_dir = dir;
        self.track = target;
        self.status = if target == 0 { ST_TRACK0 } else { 0x00 };
        self.intrq = true;
    }

    fn cmd_step(&mut self, dir: i8, update_track: bool) {
        let Some(drive) = self.active_drive() else {
            return self.not_ready();
        };
        let next = drive
            .head_track
            .saturating_add_signed(dir)
            .min(MAX_TRACKS - 1);
        drive.head_track = next;
        self.last_dir = dir;
        if update_track {
            self.track = next;
        }
        self.status = if next == 0 { ST_TRACK0 } else { 0x00 };
        self.intrq = true;
    }

    // ---- Type II: sector read / write ----

    fn cmd_read_sector(&mut self) {
        let sector = self.sector;
        let Some(drive) = self.active_drive() else {
            return self.not_ready();
        };
        let track = drive.head_track;

        if sector >= SECTORS_PER_TRACK || track >= MAX_TRACKS {
            self.status = ST_RNF;
            self.intrq = true;
            return;
        }

        let payload = drive.read_sector(track, sector);
        self.buf = payload;
        self.buf_pos = 0;
        self.buf_len = BYTES_PER_SECTOR;

        let deleted = track == DIRECTORY_TRACK;
        self.status = ST_BUSY | ST_DRQ | if deleted { ST_RECTYPE } else { 0x00 };
    }

    fn cmd_write_sector(&mut self) {
        let sector = self.sector;
        let Some(drive) = self.active_drive() else {
            return self.not_ready();
        };
        let track = drive.head_track;

        if sector >= SECTORS_PER_TRACK || track >= MAX_TRACKS {
            self.status = ST_RNF;
            self.intrq = true;
            return;
        }

        self.write_pending = true;
        self.write_track = track;
        self.write_sector = sector;
        self.buf_pos = 0;
        self.buf_len = BYTES_PER_SECTOR;
        self.status = ST_BUSY | ST_DRQ;
    }

    // ---- Type III: read address ----

    /// Deliver a synthetic 6-byte ID field for the current head position.
    /// The track register is loaded from the ID's track field.
    fn cmd_read_address(&mut self) {
        let sector = self.sector;
        let Some(drive) = self.active_drive() else {
            return self.not_ready();
        };
        let track = drive.head_track;

        self.buf[0] = track;
        self.buf[1] = 0x00; // side 0
        self.buf[2] = sector;
        self.buf[3] = 0x01; // length code 1 = 256 bytes
        self.buf[4] = 0x00; // CRC (synthetic)
        self.buf[5] = 0x00;
        self.buf_pos = 0;
        self.buf_len = 6;

        self.track = track;
        self.status = ST_BUSY | ST_DRQ;
    }

    // ---- Type IV: force interrupt ----

    fn cmd_force_interrupt(&mut self, cmd: u8) {
        self.status &= !(ST_BUSY | ST_DRQ);
        // Bit 3: generate INTRQ immediately
        if cmd & 0x08 != 0 {
            self.intrq = true;
        }
    }
}

impl Default for Fd1771 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fdc_with_disk(tracks: usize) -> Fd1771 {
        let mut fdc = Fd1771::new();
        let image =
            vec![0u8; tracks * usize::from(SECTORS_PER_TRACK) * BYTES_PER_SECTOR];
        fdc.insert_image(0, image);
        fdc.select_drive(0x01);
        fdc
    }

    #[test]
    fn no_disk_reads_ff_status() {
        let mut fdc = Fd1771::new();
        assert_eq!(fdc.read(0), 0xFF);
    }

    #[test]
    fn restore_homes_head() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.data = 10;
        fdc.write(0, 0x10); // SEEK to 10
        assert_eq!(fdc.read(1), 10);

        fdc.write(0, 0x00); // RESTORE
        assert_eq!(fdc.read(1), 0);
        assert_eq!(fdc.read(0) & ST_TRACK0, ST_TRACK0);
    }

    #[test]
    fn seek_clamps_to_track_range() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(3, 200); // data = 200
        fdc.write(0, 0x10); // SEEK
        assert_eq!(fdc.read(1), MAX_TRACKS - 1);
    }

    #[test]
    fn step_uses_last_direction() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(0, 0x50); // STEP-IN with track update
        fdc.write(0, 0x50);
        assert_eq!(fdc.read(1), 2);

        fdc.write(0, 0x30); // STEP (last direction = in)
        assert_eq!(fdc.read(1), 3);

        fdc.write(0, 0x70); // STEP-OUT
        fdc.write(0, 0x30); // STEP repeats out
        assert_eq!(fdc.read(1), 1);
    }

    #[test]
    fn sector_round_trip() {
        let mut fdc = make_fdc_with_disk(35);

        // Seek to track 3
        fdc.write(3, 3);
        fdc.write(0, 0x10);
        fdc.write(2, 5); // sector 5

        // WRITE-SECTOR: feed 256 distinct bytes
        fdc.write(0, 0xA0);
        assert_eq!(fdc.read(0) & (ST_BUSY | ST_DRQ), ST_BUSY | ST_DRQ);
        for i in 0..=255u8 {
            fdc.write(3, i);
        }
        assert_eq!(fdc.read(0) & (ST_BUSY | ST_DRQ), 0, "transfer complete");

        // Backing image updated at the track-major offset
        let offset = (3 * 10 + 5) * 256;
        assert_eq!(fdc.image_byte(0, offset), 0);
        assert_eq!(fdc.image_byte(0, offset + 255), 255);

        // READ-SECTOR returns the same payload
        fdc.write(0, 0x80);
        let mut intrq_seen = false;
        for i in 0..=255u8 {
            assert_eq!(fdc.read(3), i);
            intrq_seen = fdc.intrq_pending();
        }
        assert!(intrq_seen, "INTRQ raised on final byte");
        assert_eq!(fdc.read(0) & (ST_BUSY | ST_DRQ), 0);
    }

    #[test]
    fn write_extends_short_image() {
        let mut fdc = Fd1771::new();
        fdc.insert_image(0, vec![0u8; 256]); // single-sector image
        fdc.select_drive(0x01);

        fdc.write(3, 2);
        fdc.write(0, 0x10); // SEEK track 2
        fdc.write(2, 0);
        fdc.write(0, 0xA0); // WRITE-SECTOR
        for _ in 0..256 {
            fdc.write(3, 0xEE);
        }
        let offset = 2 * 10 * 256;
        assert_eq!(fdc.image_byte(0, offset), 0xEE);
    }

    #[test]
    fn out_of_range_sector_sets_rnf() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(2, 12); // only 10 sectors per track
        fdc.write(0, 0x80);
        assert_eq!(fdc.read(0) & ST_RNF, ST_RNF);
    }

    #[test]
    fn command_on_empty_drive_sets_not_ready() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.select_drive(0x02); // drive 1 has no disk
        fdc.write(0, 0x00);
        assert_eq!(fdc.read(0) & ST_NOTREADY, ST_NOTREADY);
        assert!(!fdc.intrq_pending(), "status read cleared INTRQ");
    }

    #[test]
    fn deselect_keeps_sticky_drive() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.select_drive(0x01);
        fdc.select_drive(0x00); // motor-off deselect
        fdc.write(0, 0x00); // RESTORE still addresses drive 0
        assert_eq!(fdc.read(0) & ST_NOTREADY, 0);
    }

    #[test]
    fn read_address_synthesises_id_field() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(3, 7);
        fdc.write(0, 0x10); // SEEK track 7
        fdc.write(2, 4);
        fdc.write(0, 0xC0); // READ-ADDRESS

        let id: Vec<u8> = (0..6).map(|_| fdc.read(3)).collect();
        assert_eq!(id, vec![7, 0, 4, 0x01, 0, 0]);
        assert_eq!(fdc.read(1), 7, "track register loaded from the ID");
    }

    #[test]
    fn track_17_reports_deleted_data_mark() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(3, 17);
        fdc.write(0, 0x10);
        fdc.write(2, 0);
        fdc.write(0, 0x80);
        assert_eq!(fdc.read(0) & ST_RECTYPE, ST_RECTYPE);
    }

    #[test]
    fn force_interrupt_aborts_transfer() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(2, 0);
        fdc.write(0, 0x80); // READ-SECTOR
        assert_ne!(fdc.read(0) & ST_BUSY, 0);

        fdc.write(0, 0xD8); // FORCE-INTERRUPT with immediate INTRQ
        assert!(fdc.intrq_pending());
        assert_eq!(fdc.read(0) & (ST_BUSY | ST_DRQ), 0);
    }

    #[test]
    fn status_read_clears_intrq() {
        let mut fdc = make_fdc_with_disk(35);
        fdc.write(0, 0x00); // RESTORE raises INTRQ
        assert!(fdc.intrq_pending());
        fdc.read(0);
        assert!(!fdc.intrq_pending());
    }
}
