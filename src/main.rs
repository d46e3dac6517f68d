//! Runs a raw RV64 machine-code routine from a file, seeding up to four
//! numeric guest arguments, and prints the analysis report and return value.

use std::{env::args, fs, process::exit};

use log::debug;
use rv64_emulator::{FlatMemory, RV64};

/// Guest address the image is loaded at; execution starts at its first word.
const IMAGE_BASE: u64 = 0x1000;

fn main() {
    env_logger::init();

    let mut argv = args().skip(1);
    let path = argv.next().expect("no file input");
    let image = fs::read(path).unwrap();
    let guest_args: [u64; 4] = std::array::from_fn(|_| {
        argv.next()
            .map(|arg| arg.parse().expect("guest arguments must be numeric"))
            .unwrap_or(0)
    });

    let mut memory = FlatMemory::new(image, IMAGE_BASE);
    let mut machine = RV64::init(IMAGE_BASE, guest_args, memory.stack_top());
    match machine.emulate(&mut memory) {
        Ok(value) => {
            debug!(
                "i-cache: {} hits, {} misses",
                machine.icache().hits(),
                machine.icache().misses()
            );
            println!("{}", machine.analysis);
            println!("Return value           = {value}");
        }
        Err(err) => {
            eprintln!(
                "emulation failed at 0x{:016x}: {err}",
                machine.pc.get()
            );
            exit(1);
        }
    }
}
