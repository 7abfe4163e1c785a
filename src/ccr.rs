//! Guest condition codes in the translated block.
//!
//! The status register lives in x26 while the block runs. It is loaded from the context
//! block on first use and written back when the block exits.
use crate::block::Block;
use crate::insn::*;
use crate::jit::Jit;
use crate::registers::{CCBit, Flags};

/// byte offset of SR in the context block
pub const CTX_SR: i16 = 68;

#[derive(Default)]
pub struct Ccr {
    live: bool,
    dirty: bool,
}

impl Ccr {
    pub fn is_live(&self) -> bool { self.live }
    pub fn get(&mut self, block: &mut Block, modify: bool) -> Reg {
        if !self.live {
            block.emit(ldr(MemSize::W, Reg::CC, Reg::CTX, CTX_SR, Index::Offset));
            self.live = true;
        }
        self.dirty |= modify;
        Reg::CC
    }
    pub fn flush(&mut self, block: &mut Block) {
        if self.dirty {
            block.emit(store(MemSize::W, Reg::CC, Reg::CTX, CTX_SR, Index::Offset));
            self.dirty = false;
        }
    }
}

/// Flag updates. Each helper only writes the bits named in the mask it is given.
impl Jit {
    /// copies N and Z from the host flags
    pub fn cc_nz_from_host(&mut self, mask: Flags) {
        if mask.contains(Flags::N) {
            self.cc_from_cond(CCBit::N, Cond::Mi);
        }
        if mask.contains(Flags::Z) {
            self.cc_from_cond(CCBit::Z, Cond::Eq);
        }
    }
    pub fn cc_from_cond(&mut self, bit: CCBit, cond: Cond) {
        let cc = self.modify_cc();
        let t = self.scratch();
        self.emit(cset(*t, cond));
        self.emit(bfi(W32, cc, *t, bit as u8, 1));
    }
    /// sets `bit` from bit `pos` of `src`
    pub fn cc_from_bit(&mut self, bit: CCBit, src: Reg, pos: u8) {
        let cc = self.modify_cc();
        if pos == 0 {
            self.emit(bfi(W32, cc, src, bit as u8, 1));
        } else {
            let t = self.scratch();
            self.emit(lsr(X64, *t, src, pos));
            self.emit(bfi(W32, cc, *t, bit as u8, 1));
        }
    }
    /// clears the masked bits, one insert per contiguous run
    pub fn cc_clear(&mut self, flags: Flags) {
        if flags.is_empty() {
            return;
        }
        let cc = self.modify_cc();
        let bits = flags.bits();
        let mut pos = 0;
        while pos < 5 {
            if bits & (1 << pos) == 0 {
                pos += 1;
                continue;
            }
            let start = pos;
            while pos < 5 && bits & (1 << pos) != 0 {
                pos += 1;
            }
            self.emit(bfi(W32, cc, Reg::ZR, start, pos - start));
        }
    }
    /// C (and X when `with_x`) from bit `pos` of `src`, as far as the mask asks for them
    pub fn cc_carry(&mut self, mask: Flags, src: Reg, pos: u8, with_x: bool) {
        let want_x = with_x && mask.contains(Flags::X);
        if !mask.contains(Flags::C) && !want_x {
            return;
        }
        let cc = self.modify_cc();
        self.emit(bfxil(X64, cc, src, pos, 1));
        if want_x {
            self.emit(bfi(W32, cc, cc, CCBit::X as u8, 1));
        }
    }
    /// N and Z from the host flags, V and C cleared
    pub fn cc_logic(&mut self, mask: Flags) {
        self.cc_nz_from_host(mask);
        self.cc_clear(mask & (Flags::V | Flags::C));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::Options;

    #[test]
    fn loaded_once_stored_when_dirty() {
        let mut block = Block::new(0);
        let mut cc = Ccr::default();
        cc.get(&mut block, false);
        cc.get(&mut block, false);
        cc.flush(&mut block);
        assert_eq!(block.len(), 1);
        cc.get(&mut block, true);
        cc.flush(&mut block);
        assert_eq!(block.code()[1], store(MemSize::W, Reg::CC, Reg::CTX, CTX_SR, Index::Offset));
    }
    #[test]
    fn clear_runs() {
        let mut jit = Jit::new(0, Options::default());
        let start = jit.cursor().0;
        jit.cc_clear(Flags::V | Flags::C | Flags::X);
        let code = &jit.block().code()[start..];
        assert_eq!(code[0], ldr(MemSize::W, Reg::CC, Reg::CTX, CTX_SR, Index::Offset));
        assert_eq!(code[1], bfi(W32, Reg::CC, Reg::ZR, 0, 2));
        assert_eq!(code[2], bfi(W32, Reg::CC, Reg::ZR, 4, 1));
        assert_eq!(code.len(), 3);
    }
    #[test]
    fn carry_without_extend() {
        let mut jit = Jit::new(0, Options::default());
        jit.modify_cc();
        let start = jit.cursor().0;
        jit.cc_carry(Flags::X, Reg(3), 7, false);
        assert_eq!(jit.cursor().0, start);
        jit.cc_carry(Flags::C | Flags::X, Reg(3), 7, true);
        let code = &jit.block().code()[start..];
        assert_eq!(code, &[bfxil(X64, Reg::CC, Reg(3), 7, 1), bfi(W32, Reg::CC, Reg::CC, 4, 1)]);
    }
}
