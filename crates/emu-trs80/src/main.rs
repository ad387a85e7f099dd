//! TRS-80 Model I emulator binary.
//!
//! Runs the machine in a winit window with a pixels framebuffer, or in
//! headless mode for scripted runs. Audio goes out through cpal, fed by
//! a lock-free ring buffer.

#![allow(clippy::cast_possible_truncation)]

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use pixels::{Pixels, SurfaceTexture};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use emu_trs80::dac::SAMPLE_RATE;
use emu_trs80::video::{FB_HEIGHT, FB_WIDTH};
use emu_trs80::{SpeedMode, Trs80, Trs80Config, Video, keyboard_map};

/// Window scale factor.
const SCALE: u32 = 3;

/// Frame duration for 60 Hz NTSC.
const FRAME_DURATION: Duration = Duration::from_micros(16_667);

/// In turbo mode only every Nth frame is rendered.
const TURBO_RENDER_EVERY: u32 = 10;

/// Ring capacity: ~4 frames of audio bounds the output latency.
const AUDIO_RING_FRAMES: usize = 4;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    load_name: Option<String>,
    disk_path: Option<String>,
    rom_path: PathBuf,
    headless: bool,
    frames: u32,
    turbo: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        load_name: None,
        disk_path: None,
        rom_path: PathBuf::from("roms/level2.rom"),
        headless: false,
        frames: 300,
        turbo: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--load" => {
                i += 1;
                cli.load_name = args.get(i).cloned();
            }
            "--disk" => {
                i += 1;
                cli.disk_path = args.get(i).cloned();
            }
            "--rom" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.rom_path = PathBuf::from(s);
                }
            }
            "--headless" => {
                cli.headless = true;
            }
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(300);
                }
            }
            "--turbo" => {
                cli.turbo = true;
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-trs80 [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --load <name>    Autoload the first matching file from software/");
                eprintln!("  --disk <path>    Mount a floppy image into drive 0");
                eprintln!("  --rom <path>     ROM image [default: roms/level2.rom]");
                eprintln!("  --headless       Run without a window, print the screen on exit");
                eprintln!("  --frames <n>     Frames to run in headless mode [default: 300]");
                eprintln!("  --turbo          Start at turbo speed");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Machine construction
// ---------------------------------------------------------------------------

fn make_machine(cli: &CliArgs) -> Result<Trs80, String> {
    let rom = std::fs::read(&cli.rom_path).map_err(|e| {
        format!(
            "ROM load failed: {}: {e}\nPlace your ROM in roms/level2.rom",
            cli.rom_path.display()
        )
    })?;

    let mut machine = Trs80::new(Trs80Config {
        rom,
        ..Trs80Config::default()
    })?;

    if let Some(ref path) = cli.disk_path {
        // Missing disk is recoverable: warn and run without it
        if let Err(e) = machine.bus.load_disk(0, path) {
            eprintln!("[FDC] {e}");
        }
    }

    if let Some(ref name) = cli.load_name {
        machine.loader.setup_from_cli(name, &mut machine.injector);
    }

    Ok(machine)
}

// ---------------------------------------------------------------------------
// Audio output (cpal + ring buffer)
// ---------------------------------------------------------------------------

type RingProducer = ringbuf::HeapProd<f32>;

struct AudioOutput {
    _stream: Stream,
    producer: RingProducer,
}

/// Open the default output device at the DAC's sample rate. Failure is
/// non-fatal: the emulator runs silent.
fn open_audio() -> Option<AudioOutput> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;

    let ring = HeapRb::<f32>::new(SAMPLE_RATE as usize / 60 * AUDIO_RING_FRAMES);
    let (producer, mut consumer) = ring.split();

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                for sample in data.iter_mut() {
                    *sample = consumer.try_pop().unwrap_or(0.0);
                }
            },
            |e| eprintln!("[SOUND] stream error: {e}"),
            None,
        )
        .map_err(|e| eprintln!("[SOUND] output unavailable: {e}"))
        .ok()?;

    if let Err(e) = stream.play() {
        eprintln!("[SOUND] could not start stream: {e}");
        return None;
    }

    eprintln!("[SOUND] audio opened: {SAMPLE_RATE} Hz mono");
    Some(AudioOutput {
        _stream: stream,
        producer,
    })
}

// ---------------------------------------------------------------------------
// Headless mode
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs) {
    let mut machine = match make_machine(cli) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    for _ in 0..cli.frames {
        let speed = if machine.injector.is_active() || cli.turbo {
            SpeedMode::Turbo
        } else {
            SpeedMode::Normal
        };
        machine.step_frame(Trs80::frame_budget(speed), true);
        machine.dac.take_buffer();
    }

    print!("{}", Video::screen_text(&machine.bus));
    machine.dump_trace();
}

// ---------------------------------------------------------------------------
// Windowed mode (winit + pixels)
// ---------------------------------------------------------------------------

struct App {
    machine: Trs80,
    video: Video,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    audio: Option<AudioOutput>,
    last_frame_time: Instant,

    user_speed: SpeedMode,
    cur_speed: SpeedMode,
    turbo_render_count: u32,
    title_status: String,
}

impl App {
    fn new(machine: Trs80, user_speed: SpeedMode) -> Self {
        Self {
            machine,
            video: Video::new(),
            window: None,
            pixels: None,
            audio: open_audio(),
            last_frame_time: Instant::now(),
            user_speed,
            cur_speed: SpeedMode::Normal,
            turbo_render_count: 0,
            title_status: String::new(),
        }
    }

    fn handle_key(&mut self, keycode: KeyCode, pressed: bool) {
        if let Some((row, bit)) = keyboard_map::map_keycode(keycode) {
            self.machine.bus.keyboard.set_key(row, bit, pressed);
        }
    }

    /// One emulation frame: speed select, step, audio, render decision.
    fn run_frame(&mut self) -> bool {
        // Auto-select speed: turbo while keyboard injection is active
        let desired = if self.machine.injector.is_active() {
            SpeedMode::Turbo
        } else {
            self.user_speed
        };
        if desired != self.cur_speed {
            if desired == SpeedMode::Normal {
                // Leaving turbo: drop stale buffered silence
                self.machine.dac.clear();
            }
            self.cur_speed = desired;
            self.turbo_render_count = 0;
        }

        let turbo = self.cur_speed == SpeedMode::Turbo;
        self.machine
            .step_frame(Trs80::frame_budget(self.cur_speed), turbo);

        // Push this frame's audio into the output ring
        let samples = self.machine.dac.take_buffer();
        if let Some(audio) = self.audio.as_mut() {
            for sample in samples {
                // A full ring means the output is ahead; drop the tail
                if audio.producer.try_push(sample).is_err() {
                    break;
                }
            }
        }

        self.update_title();

        // Render: always at normal speed, every Nth frame in turbo
        if turbo {
            self.turbo_render_count += 1;
            self.turbo_render_count % TURBO_RENDER_EVERY == 0
        } else {
            true
        }
    }

    fn update_title(&mut self) {
        let now = self.machine.bus.global_t_states();
        let status = self.machine.bus.cassette.status_line(now).unwrap_or_default();
        let tag = if self.cur_speed == SpeedMode::Turbo {
            " [TURBO]"
        } else {
            ""
        };
        let title = if status.is_empty() {
            format!("TRS-80 Model I{tag}")
        } else {
            format!("TRS-80 Model I - {status}{tag}")
        };
        if title != self.title_status {
            if let Some(window) = self.window {
                window.set_title(&title);
            }
            self.title_status = title;
        }
    }

    fn update_pixels(&mut self) {
        self.video.render(&self.machine.bus);
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };

        let frame = pixels.frame_mut();
        for (i, &argb) in self.video.framebuffer().iter().enumerate() {
            let offset = i * 4;
            frame[offset] = ((argb >> 16) & 0xFF) as u8; // R
            frame[offset + 1] = ((argb >> 8) & 0xFF) as u8; // G
            frame[offset + 2] = (argb & 0xFF) as u8; // B
            frame[offset + 3] = 0xFF; // A
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size =
            winit::dpi::LogicalSize::new(FB_WIDTH as u32 * SCALE, FB_HEIGHT as u32 * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("TRS-80 Model I")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // Leak the window for a 'static borrow: it lives for the
                // whole process and the OS reclaims it on exit.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH as u32, FB_HEIGHT as u32, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels surface: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.machine.dump_trace();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    if keycode == KeyCode::Escape && event.state == ElementState::Pressed {
                        self.machine.dump_trace();
                        event_loop.exit();
                        return;
                    }
                    if keycode == KeyCode::F1 && event.state == ElementState::Pressed {
                        self.user_speed = match self.user_speed {
                            SpeedMode::Normal => SpeedMode::Turbo,
                            SpeedMode::Turbo => SpeedMode::Normal,
                        };
                        return;
                    }
                    self.handle_key(keycode, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                // Pace to 60 Hz at normal speed; turbo runs free
                let now = Instant::now();
                let due = now.duration_since(self.last_frame_time) >= FRAME_DURATION;
                if due || self.cur_speed == SpeedMode::Turbo {
                    let should_render = self.run_frame();
                    if should_render {
                        self.update_pixels();
                    }
                    self.last_frame_time = now;
                }

                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = parse_args();

    if cli.headless {
        run_headless(&cli);
        return;
    }

    let machine = match make_machine(&cli) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let user_speed = if cli.turbo {
        SpeedMode::Turbo
    } else {
        SpeedMode::Normal
    };
    let mut app = App::new(machine, user_speed);

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }
}
