use super::{test::TestCriterion, *};
use crate::block::Block;
use crate::hex::HexRecordCollection;
use crate::jit::{Options, CTX_SIZE};
use crate::memory::{AccessType, Memory};
use std::{fs, ops::Range, rc::Rc, time::Duration};

/// One guest instruction of a translated block, for listings and traces.
#[derive(Debug, Clone)]
pub struct Line {
    pub address: u32,
    pub words: Vec<u16>,
    pub name: &'static str,
    /// host instructions emitted for it
    pub host: Range<usize>,
}

/// A translated block with what it covers.
pub struct Translated {
    pub block: Block,
    /// guest instructions covered; a fused sequence counts each instruction
    pub insns: usize,
    /// guest bytes covered
    pub bytes: u32,
    pub lines: Vec<Line>,
}

/// The Core struct owns guest memory and registers, the translation cache and run statistics.
/// Its implementation spans core.rs (loading, criteria) and runtime.rs (translate, execute, verify).
pub struct Core {
    pub reg: registers::Set,
    pub mem: Memory,
    /// guest address of the context block the translated code works on
    pub ctx_base: u32,
    pub opts: Options,
    pub(crate) cache: HashMap<u32, Rc<Translated>>,
    /* perf measurement */
    pub start_time: Instant,
    pub blocks_translated: u64,
    pub blocks_executed: u64,
    pub instruction_count: u64,
    pub host_count: u64,
    pub translate_time: Duration,
    pub exec_time: Duration,
    pub trace: bool,
}
impl Core {
    /// The top 0x100 bytes of guest memory hold the context block.
    pub fn new(mem_size: u32, opts: Options) -> Core {
        let mem_size = mem_size.max(0x1000);
        Core {
            reg: Default::default(),
            mem: Memory::new(mem_size),
            ctx_base: mem_size - 0x100,
            opts,
            cache: HashMap::new(),
            start_time: Instant::now(),
            blocks_translated: 0,
            blocks_executed: 0,
            instruction_count: 0,
            host_count: 0,
            translate_time: Duration::ZERO,
            exec_time: Duration::ZERO,
            trace: config::ARGS.trace,
        }
    }

    /// Clears registers and starts execution at `entry`. Translations are dropped since the
    /// image may have changed.
    pub fn reset(&mut self, entry: u32) {
        self.reg.reset();
        self.reg.pc = entry;
        self.cache.clear();
    }

    fn check_extent(&self, addr: u32, len: usize) -> Result<(), Error> {
        if addr as u64 + len as u64 > self.ctx_base as u64 {
            return Err(memory_err!(
                "image overlaps the context block ({} bytes at {:08X}, context at {:08X})",
                len,
                addr,
                self.ctx_base
            ));
        }
        Ok(())
    }

    /// load_bin copies a raw big-endian image into memory at addr
    pub fn load_bin(&mut self, bin_path: &Path, addr: u32) -> Result<usize, Error> {
        let bytes = fs::read(bin_path)?;
        self.check_extent(addr, bytes.len())?;
        self.mem.load(addr, &bytes)?;
        verbose_println!(
            "loaded {} bytes at 0x{:08x} from binary file \"{}\"",
            bytes.len(),
            addr,
            bin_path.display()
        );
        Ok(bytes.len())
    }
    /// load_hex copies the data records of a HexRecordCollection into memory
    pub fn load_hex(&mut self, hex: &HexRecordCollection) -> Result<usize, Error> {
        let mut extent = 0;
        for (addr, data) in hex.segments()? {
            self.check_extent(addr, data.len())?;
            self.mem.load(addr, data)?;
            extent += data.len();
        }
        verbose_println!("loaded {} bytes from {} hex records", extent, hex.len());
        Ok(extent)
    }
    /// load_program copies a Program into memory and applies its setup lines
    pub fn load_program(&mut self, program: &Program) -> Result<usize, Error> {
        for s in &program.segments {
            self.check_extent(s.addr, 2 * s.words.len())?;
        }
        let extent = program.load(&mut self.mem)?;
        verbose_println!("loaded {} bytes", extent);
        Ok(extent)
    }
    /// applies the setup lines of a program to the current state
    pub fn apply_setup(&mut self, setup: &[TestCriterion]) -> Result<(), Error> {
        for tc in setup {
            verbose_println!("setup: {}", tc);
            tc.apply(&mut self.reg, &mut self.mem)?;
        }
        Ok(())
    }

    /// check_criteria evaluates each TestCriterion provided and returns Err(Error) if any fail
    pub fn check_criteria(&self, criteria: &[TestCriterion]) -> Result<(), Error> {
        if criteria.is_empty() {
            return Ok(());
        }
        info!(
            "Validating {} test criteri{}",
            criteria.len(),
            if criteria.len() == 1 { "on" } else { "a" }
        );
        let mut error_count = 0;
        for tc in criteria {
            print!("\t{} --> ", tc);
            match tc.eval(self) {
                Ok(_) => println!(green!("PASS")),
                Err(e) => {
                    error_count += 1;
                    println!(red!("FAIL {}"), e.msg)
                }
            }
        }
        if error_count == 0 {
            Ok(())
        } else {
            Err(Error {
                kind: ErrorKind::Test,
                ctx: Some(self.reg),
                msg: format!("Failed {error_count} test(s)"),
            })
        }
    }
}

/// Writes a register set into the context block at `base`.
pub fn store_context(mem: &mut Memory, base: u32, reg: &registers::Set) -> Result<(), Error> {
    for (i, d) in reg.d.iter().enumerate() {
        mem.write_u32(AccessType::Context, base + 4 * i as u32, *d)?;
    }
    for (i, a) in reg.a.iter().enumerate() {
        mem.write_u32(AccessType::Context, base + 32 + 4 * i as u32, *a)?;
    }
    mem.write_u32(AccessType::Context, base + jit::CTX_PC as u32, reg.pc)?;
    mem.write_u32(AccessType::Context, base + ccr::CTX_SR as u32, reg.sr.reg as u32)?;
    debug_assert!(ccr::CTX_SR as u32 + 4 == CTX_SIZE);
    Ok(())
}
/// Reads a register set back from the context block at `base`.
pub fn load_context(mem: &Memory, base: u32) -> Result<registers::Set, Error> {
    let mut reg = registers::Set::default();
    for i in 0..8 {
        reg.d[i] = mem.read_u32(AccessType::Context, base + 4 * i as u32)?;
        reg.a[i] = mem.read_u32(AccessType::Context, base + 32 + 4 * i as u32)?;
    }
    reg.pc = mem.read_u32(AccessType::Context, base + jit::CTX_PC as u32)?;
    reg.sr.reg = mem.read_u32(AccessType::Context, base + ccr::CTX_SR as u32)? as u16;
    Ok(reg)
}
