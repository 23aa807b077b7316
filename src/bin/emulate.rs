//! CLI entry point: load an ELF image and run it to completion (or until
//! interrupted), printing UART output to stdout and forwarding stdin to the
//! guest's UART input.
//!
//! Grounded in this file's own thread-per-concern structure before this
//! rework (an emulator thread driving the tick loop, a UART host thread
//! draining output over an `mpsc` channel); extended with a wall-clock
//! CLINT ticker thread and a stdin-reading UART thread, since this crate's
//! `Platform` has real timer/serial devices the M-mode-only machine it
//! used to drive never needed. `SIGINT` handling (single press forwards
//! `ETX` to the guest, a second press within a second exits) follows the
//! same signal-hook based shape that file's interactive debug mode used
//! for single-step prompts, repurposed here for a non-interactive run loop.

use std::io::{Read, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;

use rv64emu::platform::Platform;

const CLINT_TICK_PERIOD: Duration = Duration::from_millis(1);
const SIGINT_DOUBLE_PRESS_WINDOW: Duration = Duration::from_secs(1);
const ASCII_ETX: u8 = 0x03;

/// Run a bare RV64 ELF image on the reference machine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a bare RV64 ELF image.
    input: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut platform = Platform::new();
    if let Err(err) = platform.load_elf(&args.input) {
        eprintln!("error loading {}: {err}", args.input);
        return ExitCode::FAILURE;
    }

    let clint = platform.clint();
    let uart = platform.uart();
    let running = Arc::new(AtomicBool::new(true));

    let clint_ticker = {
        let clint = clint.clone();
        let running = running.clone();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(CLINT_TICK_PERIOD);
                clint.tick();
            }
        })
    };

    let uart_reader = {
        let uart = uart.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut byte = [0u8; 1];
            while running.load(Ordering::Relaxed) {
                match stdin.read(&mut byte) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        uart.putc(byte[0]);
                    }
                }
            }
        })
    };

    let sigint_handler = {
        let uart = uart.clone();
        let running = running.clone();
        let mut signals = Signals::new([SIGINT]).expect("failed to register SIGINT handler");
        thread::spawn(move || {
            let mut last_press: Option<Instant> = None;
            for _ in signals.forever() {
                let now = Instant::now();
                let double_press = last_press
                    .map(|prev| now.duration_since(prev) < SIGINT_DOUBLE_PRESS_WINDOW)
                    .unwrap_or(false);
                last_press = Some(now);

                if double_press {
                    running.store(false, Ordering::Relaxed);
                    break;
                }
                uart.putc(ASCII_ETX);
            }
        })
    };

    let (tx_out, rx_out) = mpsc::channel();
    let uart_writer = {
        let uart = uart.clone();
        let running = running.clone();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Some(byte) = uart.getc() {
                    if tx_out.send(byte).is_err() {
                        break;
                    }
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    thread::spawn(move || {
        let mut stdout = std::io::stdout();
        while let Ok(byte) = rx_out.recv() {
            stdout.write_all(&[byte]).ok();
            stdout.flush().ok();
        }
    });

    while running.load(Ordering::Relaxed) {
        platform.step();
    }

    running.store(false, Ordering::Relaxed);
    clint_ticker.join().ok();
    uart_writer.join().ok();
    // The stdin reader and SIGINT handler threads are blocked in a syscall
    // with no clean way to wake them; they are left running and die with
    // the process on return.
    drop(uart_reader);
    drop(sigint_handler);

    ExitCode::SUCCESS
}
