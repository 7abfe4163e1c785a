//! # A dynamic translator for the M68k line-E family, written in Rust.
//!
//! Translates the shift, rotate and bitfield instructions of the 68020 (opcode line `1110`)
//! into AArch64 code, one block of guest instructions at a time, and runs the result on a
//! built-in reference executor.
//!
//! ## Getting Started
//! To translate and run a program:
//! ```text
//! cargo run -- -r /path/to/program.s68
//! ```
//! ...or to see the host code for a few opcode words:
//! ```text
//! m68k-jit --list --encode --words e748 e058 4840 e058
//! ```
//! ## Options
//! Help for command line options is available using -h or --help.
#[macro_use]
mod macros;
mod a64;
mod backend;
mod bitfield;
mod block;
mod ccr;
mod config;
mod core;
mod ea;
mod error;
mod exec;
mod hex;
mod insn;
mod instructions;
mod jit;
mod liveness;
mod memory;
mod model;
mod program;
mod regalloc;
mod registers;
mod runtime;
mod shift;
#[cfg(test)]
mod properties;
use hex::HexRecordCollection;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::result::Result;
use std::time::Instant;
pub(crate) use {crate::core::Core, crate::error::*, program::*};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let result = match config::ARGS.file.as_deref() {
        Some(filename) => process_file(filename),
        None if !config::ARGS.words.is_empty() => process_words(&config::ARGS.words),
        None => Err(general_err!("nothing to translate: give a file or --words")),
    };
    if let Err(e) = result {
        println!("{}", e);
        return Err(Box::new(e));
    }
    Ok(())
}

/// What was placed in guest memory.
struct Image {
    bytes: Vec<u8>,
    ranges: Vec<Range<u32>>,
    entry: u32,
    program: Option<Program>,
}

/// process_file drives the top level functionality (load, list, run) of the app
fn process_file(filename: &str) -> Result<(), Error> {
    let mut core = Core::new(config::ARGS.mem_size, jit::Options::from_args());
    let path = Path::new(filename);
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or("");
    let org = config::ARGS.org;
    let image = match ext.to_ascii_lowercase().as_str() {
        "s68" => {
            let program = Program::from_file(path, org)?;
            core.load_program(&program)?;
            info!("Successfully loaded program {}", filename);
            Image {
                bytes: program.image(),
                ranges: program
                    .segments
                    .iter()
                    .map(|s| s.addr..s.addr + 2 * s.words.len() as u32)
                    .collect(),
                entry: program.entry,
                program: Some(program),
            }
        }
        "hex" => {
            let hex = HexRecordCollection::read_from_file(path)?;
            core.load_hex(&hex)?;
            info!("Successfully loaded hex file {}", filename);
            let segments = hex.segments()?;
            Image {
                bytes: segments.iter().flat_map(|(_, d)| d.iter().copied()).collect(),
                ranges: segments.iter().map(|(a, d)| *a..*a + d.len() as u32).collect(),
                entry: org,
                program: None,
            }
        }
        "bin" => {
            let n = core.load_bin(path, org)?;
            Image {
                bytes: core.mem.slice(org, n)?.to_vec(),
                ranges: vec![org..org + n as u32],
                entry: org,
                program: None,
            }
        }
        _ => return Err(general_err!("unrecognized file type")),
    };
    drive(&mut core, image, filename)
}

/// translates (and optionally runs) opcode words given on the command line
fn process_words(words: &[String]) -> Result<(), Error> {
    let mut text = format!("org ${:x}\n", config::ARGS.org);
    for w in words {
        text.push_str(w.trim_start_matches("0x"));
        text.push('\n');
    }
    let program = Program::parse(&text, config::ARGS.org)?;
    let mut core = Core::new(config::ARGS.mem_size, jit::Options::from_args());
    core.load_program(&program)?;
    let image = Image {
        bytes: program.image(),
        ranges: program
            .segments
            .iter()
            .map(|s| s.addr..s.addr + 2 * s.words.len() as u32)
            .collect(),
        entry: program.entry,
        program: Some(program),
    };
    drive(&mut core, image, "command line words")
}

fn drive(core: &mut Core, image: Image, name: &str) -> Result<(), Error> {
    if config::ARGS.md5 {
        info!("MD5 of {}: {:x}", name, md5::compute(&image.bytes));
    }
    if config::ARGS.list || !config::run() {
        for r in &image.ranges {
            core.list(r.clone())?;
        }
    }
    if config::run() {
        core.reset(image.entry);
        if let Some(program) = image.program.as_ref() {
            core.apply_setup(&program.setup)?;
        }
        info!("Executing {}", name);
        core.exec()?;
        if let Some(program) = image.program.as_ref() {
            // if there are any test criteria then check them now
            core.check_criteria(&program.results)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io};

    fn programs_in(dir: &str) -> Result<Vec<std::path::PathBuf>, Error> {
        let mut entries = fs::read_dir(dir)?
            .map(|res| res.map(|e| e.path()))
            .collect::<Result<Vec<_>, io::Error>>()?;
        entries.retain(|e| e.is_file() && e.extension().map_or(false, |x| x.eq_ignore_ascii_case("s68")));
        entries.sort();
        Ok(entries)
    }
    #[test]
    fn various_programs() -> Result<(), Error> {
        // every .s68 file in ./test should run and pass all of its criteria
        const TEST_PATH: &str = "test";
        println!("Attempting to run all .s68 files in {}", TEST_PATH);
        let entries = programs_in(TEST_PATH)?;
        assert!(!entries.is_empty());
        for e in entries {
            process_file(&e.to_string_lossy())?
        }
        Ok(())
    }
    #[test]
    fn runtime_errors() -> Result<(), Error> {
        // every .s68 file in ./test/errors should cleanly return an ErrorKind::Runtime error
        const TEST_PATH: &str = "test/errors";
        println!("Attempting to run all .s68 files in {}", TEST_PATH);
        for pb in programs_in(TEST_PATH)? {
            if let Some(msg) = match process_file(&pb.to_string_lossy()) {
                Err(e) if e.kind == ErrorKind::Runtime => None,
                Err(e) => Some(e.to_string()),
                Ok(()) => Some("Ok()".to_string()),
            } {
                panic!("Expected ErrorKind::Runtime when running {} but got {}", pb.display(), msg)
            }
        }
        Ok(())
    }
    #[test]
    fn image_digest() -> Result<(), Error> {
        let program = Program::parse("e748 e058", 0x1000)?;
        let digest = format!("{:x}", md5::compute(program.image()));
        assert_eq!(digest.len(), 32);
        assert_ne!(digest, format!("{:x}", md5::compute(Program::parse("e748 e059", 0x1000)?.image())));
        Ok(())
    }
}
