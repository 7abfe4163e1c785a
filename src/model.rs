//! Reference model: executes line-E instructions (and SWAP) directly on a register set.
//!
//! This is the oracle the translated code is checked against, so it is written for
//! clarity, one guest instruction at a time, with no shared code on the translation path
//! apart from the opcode table.
use super::*;
use crate::ea;
use crate::instructions::{length_for, Handler, TABLE};
use crate::jit::VECTOR_ILLEGAL;
use crate::memory::{AccessType, Memory};
use crate::registers::{CCBits, Set};

/// What one step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Done,
    /// the instruction raised the exception with this vector; PC still points at it
    Trap(u16),
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Executes the instruction at `regs.pc`.
pub fn step(regs: &mut Set, mem: &mut Memory) -> Result<Step, Error> {
    let pc = regs.pc;
    let words = mem.words(pc, 8);
    let op = *words
        .first()
        .ok_or_else(|| memory_err!("instruction fetch at {:08x} is outside memory", pc))?;
    if op & 0xfff8 == 0x4840 {
        let r = (op & 7) as usize;
        regs.d[r] = regs.sr.swap(regs.d[r]);
        regs.pc = pc.wrapping_add(2);
        return Ok(Step::Done);
    }
    if op & 0xf000 != 0xe000 {
        return Err(runtime_err!(Some(*regs), "opcode {:04x} at {:08x} is not modelled", op, pc));
    }
    let handler = match TABLE[(op & 0xfff) as usize].handler {
        Some(h) => h,
        None => return Ok(Step::Trap(VECTOR_ILLEGAL)),
    };
    let len = length_for(&words);
    if len as usize > words.len() {
        return Err(memory_err!("instruction at {:08x} runs past the end of memory", pc));
    }
    // extension words start right after the opcode
    let ext_addr = pc.wrapping_add(2);
    match handler {
        Handler::Asx | Handler::Lsx | Handler::Roxx | Handler::Rox => register_shift(regs, op, handler),
        Handler::AsxMem | Handler::LsxMem | Handler::RoxxMem | Handler::RoxMem => {
            memory_shift(regs, mem, op, handler, &words[1..], ext_addr)?
        }
        _ => bitfield(regs, mem, op, handler, &words[1..], ext_addr)?,
    }
    regs.pc = pc.wrapping_add(2 * len as u32);
    Ok(Step::Done)
}

fn shift(cc: &mut CCBits, handler: Handler, left: bool, bits: u32, val: u32, n: u32) -> u32 {
    match (handler, left) {
        (Handler::Asx | Handler::AsxMem, true) => cc.asl(bits, val, n),
        (Handler::Asx | Handler::AsxMem, false) => cc.asr(bits, val, n),
        (Handler::Lsx | Handler::LsxMem, true) => cc.lsl(bits, val, n),
        (Handler::Lsx | Handler::LsxMem, false) => cc.lsr(bits, val, n),
        (Handler::Roxx | Handler::RoxxMem, true) => cc.roxl(bits, val, n),
        (Handler::Roxx | Handler::RoxxMem, false) => cc.roxr(bits, val, n),
        (_, true) => cc.rol(bits, val, n),
        (_, false) => cc.ror(bits, val, n),
    }
}

fn register_shift(regs: &mut Set, op: u16, handler: Handler) {
    let bits = 8u32 << ((op >> 6) & 3);
    let field = ((op >> 9) & 7) as usize;
    let n = if op & 0x20 != 0 {
        regs.d[field] & 63
    } else if field == 0 {
        8
    } else {
        field as u32
    };
    if n == 0 {
        return;
    }
    let r = (op & 7) as usize;
    let res = shift(&mut regs.sr, handler, op & 0x100 != 0, bits, regs.d[r], n);
    let keep = !(mask(bits) as u32);
    regs.d[r] = regs.d[r] & keep | res;
}

/// Operand address of a memory EA, applying (An)+ and -(An) by `size` bytes.
fn address(regs: &mut Set, mem: &Memory, mode_reg: u8, size: u32, ext: &[u16], ext_addr: u32) -> Result<u32, Error> {
    let (mode, reg) = ea::split(mode_reg);
    let an = reg as usize;
    let word = |i: usize| ext.get(i).copied().unwrap_or(0);
    let addr = match (mode, reg) {
        (2, _) => regs.a[an],
        (3, _) => {
            let a = regs.a[an];
            regs.a[an] = a.wrapping_add(size);
            a
        }
        (4, _) => {
            regs.a[an] = regs.a[an].wrapping_sub(size);
            regs.a[an]
        }
        (5, _) => regs.a[an].wrapping_add(word(0) as i16 as u32),
        (6, _) => indexed(regs, mem, regs.a[an], ext)?,
        (7, 0) => word(0) as i16 as u32,
        (7, 1) => (word(0) as u32) << 16 | word(1) as u32,
        (7, 2) => ext_addr.wrapping_add(word(0) as i16 as u32),
        (7, 3) => indexed(regs, mem, ext_addr, ext)?,
        _ => return Err(general_err!("addressing mode {}/{} has no memory operand", mode, reg)),
    };
    Ok(addr)
}

fn indexed(regs: &Set, mem: &Memory, base: u32, ext: &[u16]) -> Result<u32, Error> {
    let e = ext.first().copied().unwrap_or(0);
    let xn = regs.get(((e >> 12) & 0xf) as u8);
    let xn = if e & 0x800 != 0 { xn } else { xn as u16 as i16 as u32 };
    let index = xn.wrapping_shl(((e >> 9) & 3) as u32);
    if e & 0x100 == 0 {
        return Ok(base.wrapping_add(e as u8 as i8 as u32).wrapping_add(index));
    }
    let mut at = 1;
    let mut displacement = |size: u16| {
        let word = |i: usize| ext.get(i).copied().unwrap_or(0) as u32;
        let (d, n) = match size {
            2 => (word(at) as u16 as i16 as u32, 1),
            3 => (word(at) << 16 | word(at + 1), 2),
            _ => (0, 0),
        };
        at += n;
        d
    };
    let bd = displacement((e >> 4) & 3);
    let od = displacement(e & 3);
    let base = if e & 0x80 != 0 { 0 } else { base };
    let index = if e & 0x40 != 0 { 0 } else { index };
    let indirect = |addr: u32| mem.read_u32(AccessType::Data, addr);
    Ok(match e & 7 {
        0 => base.wrapping_add(bd).wrapping_add(index),
        1..=3 => indirect(base.wrapping_add(bd).wrapping_add(index))?.wrapping_add(od),
        // reserved 4 included
        _ => indirect(base.wrapping_add(bd))?.wrapping_add(index).wrapping_add(od),
    })
}

fn memory_shift(regs: &mut Set, mem: &mut Memory, op: u16, handler: Handler, ext: &[u16], ext_addr: u32) -> Result<(), Error> {
    let addr = address(regs, mem, (op & 0x3f) as u8, 2, ext, ext_addr)?;
    let val = mem.read_u16(AccessType::Data, addr)?;
    let res = shift(&mut regs.sr, handler, op & 0x100 != 0, 16, val as u32, 1);
    mem.write(AccessType::Data, addr, 2, res as u64)
}

fn bitfield(regs: &mut Set, mem: &mut Memory, op: u16, handler: Handler, ext: &[u16], ext_addr: u32) -> Result<(), Error> {
    let e = ext.first().copied().unwrap_or(0);
    let offset: i32 = if e & 0x800 != 0 {
        regs.d[((e >> 6) & 7) as usize] as i32
    } else {
        ((e >> 6) & 31) as i32
    };
    let width = match if e & 0x20 != 0 { regs.d[(e & 7) as usize] & 31 } else { (e & 31) as u32 } {
        0 => 32,
        w => w,
    };
    let dn = ((e >> 12) & 7) as usize;
    let field_mask = mask(width);

    // the container as a big-endian bit string, with the field's position in it
    let mode_reg = (op & 0x3f) as u8;
    let in_register = ea::split(mode_reg).0 == 0;
    let (container, shift_down, addr) = if in_register {
        let r = (op & 7) as usize;
        let off = (offset as u32) & 31;
        // 64 bits holding the ring twice let the field wrap around
        let ring = regs.d[r] as u64;
        let doubled = ring << 32 | ring;
        (doubled, 64 - off - width, 0)
    } else {
        let base = address(regs, mem, mode_reg, 0, &ext[1..], ext_addr.wrapping_add(2))?;
        let addr = base.wrapping_add((offset >> 3) as u32);
        let bit = (offset & 7) as u32;
        (mem.read(AccessType::Data, addr, 5)?, 40 - bit - width, addr)
    };
    let field = ((container >> shift_down) & field_mask) as u32;

    let new_field = match handler {
        Handler::Bftst => None,
        Handler::Bfextu => {
            regs.d[dn] = field;
            None
        }
        Handler::Bfexts => {
            regs.d[dn] = (((field as u64) << (64 - width)) as i64 >> (64 - width)) as u32;
            None
        }
        Handler::Bfffo => {
            let lead = (0..width).find(|i| field & (1 << (width - 1 - i)) != 0).unwrap_or(width);
            regs.d[dn] = (offset as u32).wrapping_add(lead);
            None
        }
        Handler::Bfchg => Some(!field),
        Handler::Bfclr => Some(0),
        Handler::Bfset => Some(u32::MAX),
        _ => Some(regs.d[dn]),
    };
    if handler == Handler::Bfins {
        regs.sr.field(width, regs.d[dn] & field_mask as u32);
    } else {
        regs.sr.field(width, field);
    }

    if let Some(new) = new_field {
        let placed = field_mask << shift_down;
        let updated = container & !placed | ((new as u64 & field_mask) << shift_down);
        if in_register {
            // fold both copies of the ring back into one word
            let copies = [updated as u32, (updated >> 32) as u32];
            let fresh = [(placed as u32), ((placed >> 32) as u32)];
            let old = regs.d[(op & 7) as usize];
            regs.d[(op & 7) as usize] = old & !(fresh[0] | fresh[1]) | copies[0] & fresh[0] | copies[1] & fresh[1];
        } else {
            mem.write(AccessType::Data, addr, 5, updated)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AccessType;

    fn exec(words: &[u16], regs: &mut Set, mem: &mut Memory) -> Result<Step, Error> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        mem.load(0x1000, &bytes)?;
        regs.pc = 0x1000;
        step(regs, mem)
    }

    #[test]
    fn shifts() -> Result<(), Error> {
        let mut mem = Memory::new(0x4000);
        let mut regs = Set::default();
        regs.d[0] = 0x1234_5678;
        exec(&[0xe748], &mut regs, &mut mem)?;
        assert_eq!(regs.d[0], 0x1234_b3c0);
        assert_eq!(regs.pc, 0x1002);
        assert_eq!(regs.sr.reg, 0x08);
        // a zero register count leaves everything alone
        regs.d[2] = 64;
        regs.sr.reg = 0x1f;
        exec(&[0xe4a8], &mut regs, &mut mem)?;
        assert_eq!((regs.d[0], regs.sr.reg), (0x1234_b3c0, 0x1f));
        Ok(())
    }
    #[test]
    fn memory_shift_postincrement() -> Result<(), Error> {
        let mut mem = Memory::new(0x4000);
        let mut regs = Set::default();
        regs.a[1] = 0x2000;
        mem.write(AccessType::System, 0x2000, 2, 0x4001)?;
        // lsl.w (a1)+
        exec(&[0xe3d9], &mut regs, &mut mem)?;
        assert_eq!(mem.read_u16(AccessType::System, 0x2000)?, 0x8002);
        assert_eq!(regs.a[1], 0x2002);
        assert_eq!(regs.sr.reg, 0x08);
        Ok(())
    }
    #[test]
    fn bitfields() -> Result<(), Error> {
        let mut mem = Memory::new(0x4000);
        let mut regs = Set::default();
        regs.d[0] = 0xf000_0001;
        exec(&[0xe9c0, 0x1708], &mut regs, &mut mem)?;
        assert_eq!(regs.d[1], 0x1f);
        // bfset d0{30:4} sets bits 1, 0, 31 and 30
        regs.d[0] = 0;
        exec(&[0xeec0, 0x0784], &mut regs, &mut mem)?;
        assert_eq!(regs.d[0], 0xc000_0003);
        assert_eq!(regs.sr.reg, 0x04);
        // bfins d1,(a0){d4:12} with d4 = -4
        regs.a[0] = 0x2001;
        regs.d[1] = 0xabc;
        regs.d[4] = -4i32 as u32;
        exec(&[0xefd0, 0x190c], &mut regs, &mut mem)?;
        assert_eq!(mem.slice(0x2000, 3)?, &[0x0a, 0xbc, 0x00]);
        // bfffo d0{d1:8},d3 reports the register offset unreduced
        regs.d[0] = 0x0080_0000;
        regs.d[1] = 40;
        exec(&[0xedc0, 0x3848], &mut regs, &mut mem)?;
        assert_eq!(regs.d[3], 40);
        regs.d[0] = 2;
        regs.d[1] = -4i32 as u32;
        exec(&[0xedc0, 0x3848], &mut regs, &mut mem)?;
        assert_eq!(regs.d[3], 0xffff_fffe);
        Ok(())
    }
    #[test]
    fn swap_and_traps() -> Result<(), Error> {
        let mut mem = Memory::new(0x4000);
        let mut regs = Set::default();
        regs.d[3] = 0x1234_8765;
        exec(&[0x4843], &mut regs, &mut mem)?;
        assert_eq!(regs.d[3], 0x8765_1234);
        assert_eq!(regs.sr.reg, 0x08);
        assert_eq!(exec(&[0xe0c0], &mut regs, &mut mem)?, Step::Trap(4));
        assert_eq!(regs.pc, 0x1000);
        assert!(exec(&[0x4e75], &mut regs, &mut mem).is_err());
        Ok(())
    }
}
