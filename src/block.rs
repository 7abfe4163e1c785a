//! Host code buffer of one translation unit.
use crate::insn::Insn;

/// Position in the host code buffer. Only ever moves forward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Cursor(pub usize);

/// A forward branch waiting for its target.
#[must_use = "a forward branch must be bound to its target"]
#[derive(Debug)]
pub struct Fixup(usize);

pub struct Block {
    /// guest address of the first translated instruction
    pub guest_pc: u32,
    code: Vec<Insn>,
    notes: Vec<String>,
    open: usize,
    /// set once the block ends in a guest exception
    pub trapped: bool,
}

impl Block {
    pub fn new(guest_pc: u32) -> Block {
        Block {
            guest_pc,
            code: Vec::new(),
            notes: Vec::new(),
            open: 0,
            trapped: false,
        }
    }
    pub fn emit(&mut self, insn: Insn) -> Cursor {
        self.code.push(insn);
        self.cursor()
    }
    pub fn cursor(&self) -> Cursor { Cursor(self.code.len()) }
    /// emits a branch whose target is the cursor at the matching `bind`
    pub fn forward(&mut self, branch: Insn) -> Fixup {
        debug_assert!(branch.is_branch());
        self.code.push(branch);
        self.open += 1;
        Fixup(self.code.len() - 1)
    }
    pub fn bind(&mut self, fixup: Fixup) {
        let offset = (self.code.len() - fixup.0) as i32;
        self.code[fixup.0] = self.code[fixup.0].with_offset(offset);
        self.open -= 1;
    }
    /// number of forward branches not yet bound
    pub fn open_branches(&self) -> usize { self.open }
    pub fn note(&mut self, msg: String) -> usize {
        self.notes.push(msg);
        self.notes.len() - 1
    }
    pub fn notes(&self) -> &[String] { &self.notes }
    pub fn code(&self) -> &[Insn] { &self.code }
    pub fn len(&self) -> usize { self.code.len() }
}
