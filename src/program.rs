//! Text programs (`.s68`): guest opcode words written out in hex.
//!
//! ```text
//! ; lsl.w #3,d0 then an illegal opcode
//!         org $1000
//!         e748            ; lsl.w #3,d0
//!         e0c0
//! ;< d0 = #$12345678
//! ;! d0 = #$1234b3c0
//! ```
//! Words are four hex digits, several per line if wanted. `org` starts a new segment.
//! `;<` and `;!` lines are described in test.rs; any other `;` starts a comment.
use super::test::TestCriterion;
use super::*;
use crate::memory::Memory;

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::Path;
lazy_static! {
    static ref RE_ORG: Regex = Regex::new(r"(?i)^org\s+\$?([0-9a-f]{1,8})$").unwrap();
    static ref RE_WORD: Regex = Regex::new(r"(?i)^(?:0x|\$)?([0-9a-f]{4})$").unwrap();
}

/// Words placed contiguously from `addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub addr: u32,
    pub words: Vec<u16>,
}

#[derive(Debug, Default)]
pub struct Program {
    pub segments: Vec<Segment>,
    /// where execution begins: the address of the first word
    pub entry: u32,
    pub setup: Vec<TestCriterion>,
    pub results: Vec<TestCriterion>,
}

impl Program {
    pub fn from_file(path: &Path, org: u32) -> Result<Program, Error> {
        let text = fs::read_to_string(path)?;
        Program::parse(&text, org)
    }
    pub fn parse(text: &str, org: u32) -> Result<Program, Error> {
        let mut program = Program {
            entry: org,
            ..Default::default()
        };
        let mut current = Segment {
            addr: org,
            words: Vec::new(),
        };
        for (i, raw) in text.lines().enumerate() {
            let line_num = i + 1;
            if let Some(rest) = raw.trim_start().strip_prefix(";<") {
                program.setup.push(TestCriterion::new(line_num, rest)?);
                continue;
            }
            if let Some(rest) = raw.trim_start().strip_prefix(";!") {
                program.results.push(TestCriterion::new(line_num, rest)?);
                continue;
            }
            let code = raw.split(';').next().unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }
            if let Some(c) = RE_ORG.captures(code) {
                let addr = u32::from_str_radix(&c[1], 16).map_err(|e| format_err!(line_num, "{}", e))?;
                if addr & 1 != 0 {
                    return Err(format_err!(line_num, "odd origin ${:x}", addr));
                }
                let next = Segment {
                    addr,
                    words: Vec::new(),
                };
                let done = std::mem::replace(&mut current, next);
                if !done.words.is_empty() {
                    program.segments.push(done);
                }
                continue;
            }
            for token in code.split_whitespace() {
                let c = RE_WORD
                    .captures(token)
                    .ok_or_else(|| format_err!(line_num, "expected a 4-digit hex word, found '{}'", token))?;
                let word = u16::from_str_radix(&c[1], 16).map_err(|e| format_err!(line_num, "{}", e))?;
                if program.segments.is_empty() && current.words.is_empty() {
                    program.entry = current.addr;
                }
                current.words.push(word);
            }
        }
        if !current.words.is_empty() {
            program.segments.push(current);
        }
        verbose_println!(
            "parsed {} segment(s), {} setup line(s), {} criteria",
            program.segments.len(),
            program.setup.len(),
            program.results.len()
        );
        Ok(program)
    }
    /// big-endian bytes of every segment, in source order
    pub fn image(&self) -> Vec<u8> {
        self.segments
            .iter()
            .flat_map(|s| s.words.iter().flat_map(|w| w.to_be_bytes()))
            .collect()
    }
    /// copies the segments into memory and returns the byte count
    pub fn load(&self, mem: &mut Memory) -> Result<usize, Error> {
        let mut extent = 0;
        for s in &self.segments {
            let bytes: Vec<u8> = s.words.iter().flat_map(|w| w.to_be_bytes()).collect();
            mem.load(s.addr, &bytes)?;
            extent += bytes.len();
        }
        Ok(extent)
    }
}
