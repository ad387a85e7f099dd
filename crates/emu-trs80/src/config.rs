//! Machine configuration.

/// Configuration for creating a TRS-80 instance.
pub struct Trs80Config {
    /// Level II BASIC ROM image, up to 12,288 bytes, loaded at 0x0000.
    pub rom: Vec<u8>,
    /// Directory searched for `.cas`/`.bas` software and used for saves.
    pub software_dir: std::path::PathBuf,
    /// Path the freeze detector dumps to.
    pub trace_path: std::path::PathBuf,
}

impl Default for Trs80Config {
    fn default() -> Self {
        Self {
            rom: Vec::new(),
            software_dir: "software".into(),
            trace_path: "trace.log".into(),
        }
    }
}
