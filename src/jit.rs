//! Translation context for one block of guest code.
use crate::block::{Block, Cursor, Fixup};
use crate::ccr::Ccr;
use crate::insn::*;
use crate::liveness;
use crate::regalloc::{RegAlloc, Scratch};
use crate::registers::Flags;

/// byte offset of the guest PC in the context block
pub const CTX_PC: i16 = 64;
/// size of the context block in bytes
pub const CTX_SIZE: u32 = 72;
pub const VECTOR_ILLEGAL: u16 = 4;

#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// restrict flag computation to flags a later instruction may read
    pub liveness: bool,
    /// most guest instructions per block
    pub max_block: usize,
}
impl Default for Options {
    fn default() -> Self {
        Options {
            liveness: true,
            max_block: 64,
        }
    }
}
impl Options {
    pub fn from_args() -> Options {
        Options {
            liveness: crate::config::liveness(),
            max_block: crate::config::ARGS.max_block.max(1),
        }
    }
}

/// Guest code being translated, as big-endian words starting at guest address `base`.
pub struct Stream<'a> {
    words: &'a [u16],
    pos: usize,
    start: usize,
    base: u32,
}

impl<'a> Stream<'a> {
    pub fn new(words: &'a [u16], base: u32) -> Stream<'a> {
        Stream {
            words,
            pos: 0,
            start: 0,
            base,
        }
    }
    /// next word; past the end of the stream reads as zero
    pub fn read(&mut self) -> u16 {
        let w = self.peek(0);
        self.pos += 1;
        w
    }
    pub fn peek(&self, n: usize) -> u16 { self.words.get(self.pos + n).copied().unwrap_or(0) }
    pub fn skip(&mut self, n: usize) { self.pos += n; }
    pub fn pos(&self) -> usize { self.pos }
    pub fn words(&self) -> &'a [u16] { self.words }
    pub fn rest(&self) -> &'a [u16] { &self.words[self.pos.min(self.words.len())..] }
    pub fn at_end(&self) -> bool { self.pos >= self.words.len() }
    /// guest address of the word at the current position
    pub fn address(&self) -> u32 { self.base.wrapping_add(2 * self.pos as u32) }
    /// marks the current position as the start of an instruction
    pub fn mark(&mut self) { self.start = self.pos; }
    /// word index of the instruction being translated
    pub fn start(&self) -> usize { self.start }
}

/// A shift amount: an immediate or a register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Amount {
    Imm(u8),
    Reg(Reg),
}

pub struct Jit {
    block: Block,
    ra: RegAlloc,
    cc: Ccr,
    pending_pc: u32,
    opts: Options,
}

impl Jit {
    pub fn new(guest_pc: u32, opts: Options) -> Jit {
        let mut block = Block::new(guest_pc);
        block.emit(ldr(MemSize::W, Reg::PC, Reg::CTX, CTX_PC, Index::Offset));
        Jit {
            block,
            ra: RegAlloc::new(),
            cc: Ccr::default(),
            pending_pc: 0,
            opts,
        }
    }
    pub fn options(&self) -> &Options { &self.opts }
    pub fn block(&self) -> &Block { &self.block }
    pub fn emit(&mut self, insn: Insn) -> Cursor { self.block.emit(insn) }
    pub fn cursor(&self) -> Cursor { self.block.cursor() }
    pub fn forward(&mut self, branch: Insn) -> Fixup { self.block.forward(branch) }
    pub fn bind(&mut self, fixup: Fixup) { self.block.bind(fixup) }
    pub fn trapped(&self) -> bool { self.block.trapped }
    pub fn begin_insn(&mut self) { self.ra.begin_insn() }

    // Loads emitted under a forward branch would be skipped at run time while the
    // allocator believes them done, so everything is bound before the first branch opens.
    fn check_unconditional(&self, what: &str) {
        debug_assert!(self.block.open_branches() == 0, "{} loaded inside a conditional region", what);
    }
    pub fn map(&mut self, guest: u8) -> Reg {
        if !self.ra.is_bound(guest) {
            self.check_unconditional("guest register");
        }
        self.ra.map(&mut self.block, guest)
    }
    pub fn map_for_write(&mut self, guest: u8) -> Reg {
        if !self.ra.is_bound(guest) {
            self.check_unconditional("guest register");
        }
        self.ra.map_for_write(&mut self.block, guest)
    }
    pub fn mark_dirty(&mut self, guest: u8) { self.ra.mark_dirty(guest) }
    pub fn scratch(&self) -> Scratch { self.ra.scratch() }
    pub fn scratch_in_use(&self) -> u32 { self.ra.scratch_in_use() }
    /// a scratch register holding a copy of a guest register
    pub fn copy_of(&mut self, guest: u8) -> Scratch {
        let src = self.map(guest);
        let s = self.scratch();
        self.emit(mov(W32, *s, src));
        s
    }
    pub fn modify_cc(&mut self) -> Reg {
        if !self.cc.is_live() {
            self.check_unconditional("SR");
        }
        self.cc.get(&mut self.block, true)
    }
    pub fn read_cc(&mut self) -> Reg {
        if !self.cc.is_live() {
            self.check_unconditional("SR");
        }
        self.cc.get(&mut self.block, false)
    }

    /// flags the instruction at the stream mark has to compute
    pub fn update_mask(&self, stream: &Stream) -> Flags { self.mask_at(stream.words(), stream.start()) }
    pub fn mask_at(&self, words: &[u16], at: usize) -> Flags {
        if self.opts.liveness {
            liveness::update_mask(words, at)
        } else {
            let op = words.get(at).copied().unwrap_or(0);
            crate::instructions::flags_for(op).1
        }
    }

    pub fn advance_pc(&mut self, bytes: u32) { self.pending_pc += bytes; }
    pub fn pending_pc(&self) -> u32 { self.pending_pc }
    pub fn flush_pc(&mut self) {
        while self.pending_pc > 0 {
            let chunk = self.pending_pc.min(0xfff);
            self.block.emit(add_imm(W32, Reg::PC, Reg::PC, chunk as u16));
            self.pending_pc -= chunk;
        }
    }
    /// writes the guest PC, dirty registers and SR back to the context block
    fn spill(&mut self) {
        self.flush_pc();
        self.block.emit(store(MemSize::W, Reg::PC, Reg::CTX, CTX_PC, Index::Offset));
        self.ra.flush(&mut self.block);
        self.cc.flush(&mut self.block);
    }
    /// Ends the block with a guest exception. `flags` is passed to the runtime in w0.
    pub fn emit_exception(&mut self, vector: u16, flags: u16) {
        self.spill();
        if flags != 0 {
            self.block.emit(movz(W32, Reg(0), flags, 0));
        }
        self.block.emit(Insn::Brk { imm: vector });
        self.block.trapped = true;
    }
    /// Records a diagnostic in the block; the marker in the code stream refers to it.
    pub fn emit_debug_string(&mut self, msg: String) {
        verbose_println!("{}", msg);
        let index = self.block.note(msg);
        self.block.emit(Insn::Hint { imm: index.min(0x7f) as u8 });
    }

    pub fn load_const(&mut self, rd: Reg, val: u32) {
        let (lo, hi) = (val as u16, (val >> 16) as u16);
        match (lo, hi) {
            (_, 0) => {
                self.emit(movz(W32, rd, lo, 0));
            }
            (_, 0xffff) => {
                self.emit(movn(W32, rd, !lo, 0));
            }
            (0, _) => {
                self.emit(movz(W32, rd, hi, 1));
            }
            _ => {
                self.emit(movz(W32, rd, lo, 0));
                self.emit(movk(W32, rd, hi, 1));
            }
        }
    }
    /// rd = rn + c, 32-bit wrapping
    pub fn add_const(&mut self, rd: Reg, rn: Reg, c: i32) {
        match c {
            0 if rd == rn => {}
            0 => {
                self.emit(mov(W32, rd, rn));
            }
            1..=0xfff => {
                self.emit(add_imm(W32, rd, rn, c as u16));
            }
            -0xfff..=-1 => {
                self.emit(sub_imm(W32, rd, rn, (-c) as u16));
            }
            _ => {
                let t = self.scratch();
                self.load_const(*t, c as u32);
                self.emit(add(W32, rd, rn, *t, Shift::Lsl, 0));
            }
        }
    }
    /// rd = rn shifted by an immediate or register amount
    pub fn shift(&mut self, sf: Width, op: Shift, rd: Reg, rn: Reg, amount: Amount) {
        match amount {
            Amount::Imm(0) if rd == rn => {}
            Amount::Imm(0) => {
                self.emit(mov(sf, rd, rn));
            }
            Amount::Imm(n) => {
                self.emit(shift_imm(sf, op, rd, rn, n));
            }
            Amount::Reg(r) => {
                self.emit(shift_reg(sf, op, rd, rn, r));
            }
        }
    }

    /// Closes the block: flushes all state and returns to the runtime.
    pub fn finish(mut self) -> Block {
        if !self.block.trapped {
            self.spill();
            self.block.emit(Insn::Ret);
        }
        self.block
    }
}
