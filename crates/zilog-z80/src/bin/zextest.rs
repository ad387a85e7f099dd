//! CP/M harness for running ZEXDOC/ZEXALL Z80 instruction exercisers.
//!
//! Usage:
//!   cargo run -p zilog-z80 --bin zextest --release -- path/to/zexall.com
//!
//! The exerciser prints its per-group CRC results through BDOS console
//! calls; output is shown in real time so progress is visible.

use std::env;
use std::io::{self, Write};
use std::process;
use std::time::Instant;

use zilog_z80::{Bus, FlatBus, Z80};

/// Handle a CP/M BDOS call (entry 0x0005). Returns true on system reset.
fn handle_bdos(cpu: &Z80, bus: &mut FlatBus, output: &mut String) -> bool {
    match cpu.regs.c {
        0 => return true,
        2 => {
            // Console output - character in E
            let ch = cpu.regs.e as char;
            print!("{ch}");
            output.push(ch);
            io::stdout().flush().ok();
        }
        9 => {
            // Print string - DE points to $-terminated string
            let mut addr = cpu.regs.de();
            loop {
                let ch = bus.read(addr, false);
                if ch == b'$' {
                    break;
                }
                print!("{}", ch as char);
                output.push(ch as char);
                addr = addr.wrapping_add(1);
            }
            io::stdout().flush().ok();
        }
        other => eprintln!("[ZEX] unhandled BDOS function {other}"),
    }
    false
}

fn run_test(binary: &[u8]) -> bool {
    let mut cpu = Z80::new();
    let mut bus = FlatBus::new();

    // COM files load at 0x0100
    bus.load(0x0100, binary);

    // Warm boot at 0x0000 - detected as the exit condition
    bus.load(0x0000, &[0xC3, 0x00, 0x00]);
    // BDOS entry at 0x0005 - RET after the intercept fires
    bus.load(0x0005, &[0xC9]);
    // Top of TPA at 0x0006-0x0007 (programs read this for stack init)
    bus.load(0x0006, &[0x00, 0xFE]);

    cpu.reset();
    cpu.set_pc(0x0100);
    cpu.set_sp(0xFFFE);

    let start = Instant::now();
    let mut instructions: u64 = 0;
    let mut cycles: u64 = 0;
    let mut output = String::new();

    loop {
        let pc = cpu.pc();

        if pc == 0x0005 {
            if handle_bdos(&cpu, &mut bus, &mut output) {
                break;
            }
        } else if pc == 0x0000 && instructions > 0 {
            break;
        } else if cpu.halted() {
            eprintln!("[ZEX] unexpected HALT");
            break;
        }

        cycles += u64::from(cpu.step(&mut bus));
        instructions += 1;
    }

    let elapsed = start.elapsed().as_secs_f64();
    eprintln!("\nInstructions: {instructions}");
    eprintln!("Cycles: {cycles}");
    eprintln!(
        "Speed: {:.1} MIPS",
        instructions as f64 / elapsed / 1_000_000.0
    );

    !output.contains("ERROR")
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: zextest <zexdoc.com|zexall.com>");
        process::exit(1);
    };

    let binary = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {path}: {e}");
            process::exit(1);
        }
    };

    if run_test(&binary) {
        eprintln!("\nPASS");
    } else {
        eprintln!("\nFAIL");
        process::exit(1);
    }
}
