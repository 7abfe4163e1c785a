//! Lowering of symbolic host code.
use crate::insn::Insn;

/// A consumer of symbolic host instructions.
pub trait Backend {
    type Output;
    fn lower(&mut self, insn: &Insn);
    fn finish(self) -> Self::Output;
}

pub fn assemble<B: Backend>(mut backend: B, code: &[Insn]) -> B::Output {
    for insn in code {
        backend.lower(insn);
    }
    backend.finish()
}

/// Textual assembly, one line per instruction.
#[derive(Default)]
pub struct Listing {
    lines: Vec<String>,
}
impl Backend for Listing {
    type Output = Vec<String>;
    fn lower(&mut self, insn: &Insn) { self.lines.push(insn.to_string()) }
    fn finish(self) -> Vec<String> { self.lines }
}
