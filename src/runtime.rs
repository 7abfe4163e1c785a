//! Implements the runtime engine: block translation, the translation cache, execution on the
//! reference executor and cross-checking against the reference model.
use super::*;
use crate::backend::{self, Listing};
use crate::core::{load_context, store_context, Line, Translated};
use crate::exec::{Exit, HostCpu};
use crate::insn::Reg;
use crate::instructions::{is_byte_reverse, length_for, translate_one, TABLE};
use crate::jit::{Jit, Stream};
use crate::memory::{AccessType, Memory};
use crate::model::{self, Step};
use std::rc::Rc;

/// longest instruction in words: opcode, bitfield extension, full-format EA with two longs
const MAX_INSN_WORDS: usize = 8;

fn is_line_e(op: u16) -> bool { op & 0xf000 == 0xe000 }

impl Core {
    /// Translates the block starting at `pc`. Fails only if no instruction there can start a block.
    pub fn translate(&self, pc: u32) -> Result<Translated, Error> {
        let max_block = self.opts.max_block;
        let words = self
            .mem
            .words(pc, (max_block + 2) * MAX_INSN_WORDS + liveness::LOOKAHEAD * MAX_INSN_WORDS);
        let mut stream = Stream::new(&words, pc);
        let mut jit = Jit::new(pc, self.opts);
        let mut insns = 0usize;
        let mut lines = Vec::new();
        while insns < max_block && !stream.at_end() {
            let op = stream.peek(0);
            if !is_line_e(op) {
                break;
            }
            // a fused byte reverse counts as three and only goes over the limit when it opens the block
            if insns > 0 && insns + 3 > max_block && is_byte_reverse(&stream) {
                break;
            }
            let need = length_for(stream.rest()) as usize;
            if need > stream.rest().len() {
                verbose_println!("instruction at {:08x} is cut off by the end of memory", stream.address());
                break;
            }
            let address = stream.address();
            let at = stream.pos();
            let first = jit.block().len();
            let (_, consumed) = translate_one(&mut jit, &mut stream);
            insns += consumed as usize;
            let name = match (consumed, TABLE[(op & 0xfff) as usize].handler) {
                (3, _) => "REV",
                (_, Some(h)) => h.name(),
                (_, None) => "ILLEGAL",
            };
            lines.push(Line {
                address,
                words: words[at..stream.pos()].to_vec(),
                name,
                host: first..jit.block().len(),
            });
            if jit.trapped() {
                warn!("illegal instruction {:04x} at {:08x}", op, address);
                break;
            }
        }
        if insns == 0 {
            return Err(runtime_err!(
                Some(self.reg),
                "no translatable instruction at {:08x} ({:04x})",
                pc,
                words.first().copied().unwrap_or(0)
            ));
        }
        let bytes = 2 * stream.pos() as u32;
        let block = jit.finish();
        verbose_println!(
            "translated {} guest instruction(s) at {:08x} into {} host instruction(s)",
            insns,
            pc,
            block.len()
        );
        Ok(Translated {
            block,
            insns,
            bytes,
            lines,
        })
    }

    /// cached translation of the block at pc
    fn lookup(&mut self, pc: u32) -> Result<Rc<Translated>, Error> {
        if let Some(t) = self.cache.get(&pc) {
            return Ok(t.clone());
        }
        let start = Instant::now();
        let t = Rc::new(self.translate(pc)?);
        self.translate_time += start.elapsed();
        self.blocks_translated += 1;
        self.cache.insert(pc, t.clone());
        Ok(t)
    }

    /// Runs one translated block against the current state.
    pub fn exec_block(&mut self, t: &Translated) -> Result<Exit, Error> {
        store_context(&mut self.mem, self.ctx_base, &self.reg)?;
        let mut cpu = HostCpu::new();
        cpu.x[Reg::CTX.0 as usize] = self.ctx_base as u64;
        let start = Instant::now();
        let exit = cpu.run(t.block.code(), &mut self.mem)?;
        self.exec_time += start.elapsed();
        self.host_count += cpu.executed;
        self.reg = load_context(&self.mem, self.ctx_base)?;
        Ok(exit)
    }

    /// Starts executing at the current program counter and stops at the first instruction
    /// outside the translated family. A guest trap or a verification mismatch is an error.
    pub fn exec(&mut self) -> Result<(), Error> {
        self.start_time = Instant::now();
        let mut steps = 0u64;
        loop {
            let pc = self.reg.pc;
            let op = self.mem.read_u16(AccessType::Program, pc)?;
            if !is_line_e(op) {
                info!("Reached {:04X} at {:08X}. Program execution terminated.", op, pc);
                self.report_perf();
                return Ok(());
            }
            steps += 1;
            if steps > config::ARGS.max_steps {
                return Err(runtime_err!(Some(self.reg), "block budget of {} exhausted", config::ARGS.max_steps));
            }
            let t = self.lookup(pc)?;
            let before = if config::ARGS.verify {
                // the context block is part of the compared memory, so it must be current
                store_context(&mut self.mem, self.ctx_base, &self.reg)?;
                Some((self.reg, self.mem.clone()))
            } else {
                None
            };
            let exit = self.exec_block(&t)?;
            self.blocks_executed += 1;
            self.instruction_count += t.insns as u64;
            if self.trace {
                println!("{:08x}: {:3} insn(s) -> {} ({})", pc, t.insns, self.reg, self.reg.ccr());
            }
            if let Some((reg, mem)) = before {
                self.verify(&t, reg, mem, exit)?;
            }
            if let Exit::Break(vector) = exit {
                self.report_perf();
                let note = t.block.notes().last().cloned().unwrap_or_default();
                return Err(runtime_err!(Some(self.reg), "guest exception, vector {}: {}", vector, note));
            }
        }
    }

    /// Replays the block on the reference model from the state before it ran and compares.
    fn verify(&self, t: &Translated, mut reg: registers::Set, mut mem: Memory, exit: Exit) -> Result<(), Error> {
        let mut trap = None;
        for _ in 0..t.insns {
            match model::step(&mut reg, &mut mem)? {
                Step::Done => {}
                Step::Trap(vector) => {
                    trap = Some(vector);
                    break;
                }
            }
        }
        let expected = match trap {
            Some(vector) => Exit::Break(vector),
            None => Exit::Return,
        };
        if expected != exit {
            return Err(verify_err!(Some(self.reg), "block at {:08x} exited {:?}, model {:?}", t.block.guest_pc, exit, expected));
        }
        store_context(&mut mem, self.ctx_base, &reg)?;
        let (mut actual, mut oracle) = (self.reg, reg);
        actual.sr.reg &= 0x1f;
        oracle.sr.reg &= 0x1f;
        if actual != oracle {
            return Err(verify_err!(
                Some(self.reg),
                "block at {:08x} disagrees with the model\n  model:      {} ({})",
                t.block.guest_pc,
                reg,
                reg.ccr()
            ));
        }
        if let Some(addr) = self.mem.first_difference(&mem) {
            return Err(verify_err!(
                Some(self.reg),
                "block at {:08x} disagrees with the model at address {:08x}: {:02x} != {:02x}",
                t.block.guest_pc,
                addr,
                self.mem.slice(addr, 1)?[0],
                mem.slice(addr, 1)?[0]
            ));
        }
        Ok(())
    }

    /// Prints the translation of every block in `range`.
    pub fn list(&self, range: std::ops::Range<u32>) -> Result<(), Error> {
        let mut pc = range.start;
        while pc < range.end {
            let t = match self.translate(pc) {
                Ok(t) => t,
                Err(_) => {
                    let op = self.mem.read_u16(AccessType::Program, pc)?;
                    println!(concat!(yellow!("{:08x}"), "  {:04x}                     (not translated)"), pc, op);
                    pc = pc.wrapping_add(2);
                    continue;
                }
            };
            self.print_block(&t);
            pc = pc.wrapping_add(t.bytes);
        }
        Ok(())
    }

    fn print_block(&self, t: &Translated) {
        let text = backend::assemble(Listing::default(), t.block.code());
        let words = if config::ARGS.encode {
            Some(backend::assemble(a64::A64::default(), t.block.code()))
        } else {
            None
        };
        let print_host = |range: std::ops::Range<usize>| {
            for i in range {
                match &words {
                    Some(w) => println!("        {:3}: {:08x}  {}", i, w[i], text[i]),
                    None => println!("        {:3}: {}", i, text[i]),
                }
            }
        };
        println!(blue!("block {:08x}: {} guest, {} host"), t.block.guest_pc, t.insns, t.block.len());
        let mut next = 0;
        for line in &t.lines {
            // host code before the first instruction is the prologue
            print_host(next..line.host.start);
            let hex: Vec<String> = line.words.iter().map(|w| format!("{:04x}", w)).collect();
            println!(concat!(yellow!("{:08x}"), "  {:24} {}"), line.address, hex.join(" "), line.name);
            print_host(line.host.clone());
            next = line.host.end;
        }
        print_host(next..t.block.len());
        for note in t.block.notes() {
            verbose_println!("        note: {}", note);
        }
    }

    /// Displays current perf information to stdout
    fn report_perf(&self) {
        if !config::ARGS.perf {
            return;
        }
        let delta = self.start_time.elapsed().as_secs_f64();
        info!(
            "Executed {} guest instructions in {} blocks ({} host instructions) in {:.3} sec",
            self.instruction_count,
            self.blocks_executed,
            self.host_count,
            delta
        );
        info!(
            "{} blocks translated; translate_time = {:.3} sec; exec_time = {:.3} sec",
            self.blocks_translated,
            self.translate_time.as_secs_f64(),
            self.exec_time.as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::Options;

    fn core_with(words: &[u16]) -> Result<Core, Error> {
        let mut core = Core::new(0x4000, Options::default());
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        core.mem.load(0x1000, &bytes)?;
        core.reset(0x1000);
        Ok(core)
    }

    #[test]
    fn blocks_stop_at_other_families() -> Result<(), Error> {
        let core = core_with(&[0xe748, 0xe349, 0x4e75])?;
        let t = core.translate(0x1000)?;
        assert_eq!((t.insns, t.bytes), (2, 4));
        assert_eq!(t.lines[1].name, "LSd");
        assert_eq!(t.block.code().last(), Some(&insn::Insn::Ret));
        assert!(core.translate(0x1004).is_err());
        Ok(())
    }
    #[test]
    fn fused_and_trapping_blocks() -> Result<(), Error> {
        let core = core_with(&[0xe058, 0x4840, 0xe058, 0xe0c0, 0xe748])?;
        let t = core.translate(0x1000)?;
        assert_eq!(t.insns, 4);
        assert_eq!(t.lines.len(), 2);
        assert_eq!(t.lines[0].name, "REV");
        assert_eq!(t.lines[0].words, vec![0xe058, 0x4840, 0xe058]);
        assert_eq!(t.lines[1].name, "ILLEGAL");
        assert_eq!(t.block.code().last(), Some(&insn::Insn::Sentinel));
        Ok(())
    }
    #[test]
    fn block_size_limit() -> Result<(), Error> {
        let mut core = core_with(&[0xe348; 10])?;
        core.opts.max_block = 4;
        let t = core.translate(0x1000)?;
        assert_eq!(t.insns, 4);
        Ok(())
    }
    #[test]
    fn byte_reverse_respects_block_limit() -> Result<(), Error> {
        // lsl.w #1,d0 twice, then ror.w #8,d0 / swap d0 / ror.w #8,d0, then lsl.w #1,d0
        let mut core = core_with(&[0xe348, 0xe348, 0xe058, 0x4840, 0xe058, 0xe348])?;
        core.opts.max_block = 4;
        let t = core.translate(0x1000)?;
        assert_eq!((t.insns, t.bytes), (2, 4));
        let t = core.translate(0x1004)?;
        assert_eq!(t.insns, 4);
        assert_eq!(t.lines[0].name, "REV");
        core.opts.max_block = 5;
        let t = core.translate(0x1000)?;
        assert_eq!((t.insns, t.lines.len()), (5, 3));
        // a block that starts with the sequence still takes it whole
        core.opts.max_block = 2;
        assert_eq!(core.translate(0x1004)?.insns, 3);
        Ok(())
    }
    #[test]
    fn run_until_other_family() -> Result<(), Error> {
        // lsl.w #3,d0 / ror.w #8,d0 / swap d0 / ror.w #8,d0 / rts
        let mut core = core_with(&[0xe748, 0xe058, 0x4840, 0xe058, 0x4e75])?;
        core.reg.d[0] = 0x1234_5678;
        core.exec()?;
        assert_eq!(core.reg.d[0], 0xc0b3_3412);
        assert_eq!(core.reg.pc, 0x1008);
        assert_eq!(core.blocks_executed, 1);
        // the second run reuses the cached block
        core.reg.pc = 0x1000;
        core.exec()?;
        assert_eq!(core.blocks_translated, 1);
        Ok(())
    }
    #[test]
    fn traps_are_runtime_errors() -> Result<(), Error> {
        let mut core = core_with(&[0xe348, 0xe0c0])?;
        core.reg.d[0] = 1;
        let e = core.exec().err().map(|e| e.kind);
        assert_eq!(e, Some(ErrorKind::Runtime));
        assert_eq!(core.reg.d[0], 2);
        assert_eq!(core.reg.pc, 0x1002);
        Ok(())
    }
    #[test]
    fn verify_against_model() -> Result<(), Error> {
        let mut core = core_with(&[0xe748, 0xefd0, 0x190c, 0xe2d8, 0x4e75])?;
        core.opts.liveness = false;
        core.reg.d[0] = 0x8000_0001;
        core.reg.a[0] = 0x2000;
        core.reg.d[1] = 0xabc;
        store_context(&mut core.mem, core.ctx_base, &core.reg)?;
        let before = (core.reg, core.mem.clone());
        let t = core.translate(0x1000)?;
        let exit = core.exec_block(&t)?;
        core.verify(&t, before.0, before.1, exit)?;
        assert_eq!(core.reg.pc, 0x1008);
        assert_eq!(core.reg.a[0], 0x2002);
        Ok(())
    }
}
