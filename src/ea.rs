//! Effective addresses of memory operands.
//!
//! `resolve` leaves the address of the operand in a host register and reports how many
//! extension words it consumed. (An)+ and -(An) return the bound address register itself
//! so the caller's load or store can do the post-increment or pre-decrement.
use crate::insn::*;
use crate::jit::{Jit, Stream};
use crate::regalloc::Scratch;

pub enum Ea {
    /// a bound guest address register
    Guest(Reg),
    Temp(Scratch),
}
impl Ea {
    pub fn reg(&self) -> Reg {
        match self {
            Ea::Guest(r) => *r,
            Ea::Temp(s) => s.reg(),
        }
    }
}

/// mode and register fields of a 6-bit EA field
pub fn split(mode_reg: u8) -> (u8, u8) { ((mode_reg >> 3) & 7, mode_reg & 7) }

/// Extension words taken by an EA, `ext` starting at its first extension word.
pub fn ea_length(ext: &[u16], mode_reg: u8, size: u8) -> u16 {
    let first = ext.first().copied().unwrap_or(0);
    match split(mode_reg) {
        (0..=4, _) => 0,
        (5, _) => 1,
        (6, _) => index_length(first),
        (7, 0) => 1,
        (7, 1) => 2,
        (7, 2) => 1,
        (7, 3) => index_length(first),
        (7, 4) => {
            if size == 4 {
                2
            } else {
                1
            }
        }
        _ => 0,
    }
}

fn displacement_words(size: u16) -> u16 {
    match size {
        2 => 1,
        3 => 2,
        _ => 0,
    }
}

fn index_length(ext: u16) -> u16 {
    if ext & 0x100 == 0 {
        return 1;
    }
    1 + displacement_words((ext >> 4) & 3) + displacement_words(ext & 3)
}

enum Base {
    Reg(Reg),
    /// PC relative: the guest address of the extension word
    Pc(u32),
}

/// Computes the operand address into a host register.
pub fn resolve(jit: &mut Jit, mode_reg: u8, stream: &Stream, size: u8) -> (Ea, u8) {
    let (mode, reg) = split(mode_reg);
    let an = 8 + reg;
    match (mode, reg) {
        (2, _) => (Ea::Guest(jit.map(an)), 0),
        (3, _) | (4, _) => {
            let r = jit.map(an);
            jit.mark_dirty(an);
            (Ea::Guest(r), 0)
        }
        (5, _) => {
            let base = jit.map(an);
            let t = jit.scratch();
            jit.add_const(*t, base, stream.peek(0) as i16 as i32);
            (Ea::Temp(t), 1)
        }
        (6, _) => {
            let base = jit.map(an);
            indexed(jit, Base::Reg(base), stream)
        }
        (7, 0) => {
            let t = jit.scratch();
            jit.load_const(*t, stream.peek(0) as i16 as u32);
            (Ea::Temp(t), 1)
        }
        (7, 1) => {
            let t = jit.scratch();
            jit.load_const(*t, (stream.peek(0) as u32) << 16 | stream.peek(1) as u32);
            (Ea::Temp(t), 2)
        }
        (7, 2) => {
            let t = jit.scratch();
            let addr = stream.address().wrapping_add(stream.peek(0) as i16 as u32);
            jit.load_const(*t, addr);
            (Ea::Temp(t), 1)
        }
        (7, 3) => indexed(jit, Base::Pc(stream.address()), stream),
        (7, 4) => {
            // the operand is the immediate data itself, right-aligned in its extension words
            let t = jit.scratch();
            let addr = stream.address().wrapping_add(if size == 1 { 1 } else { 0 });
            jit.load_const(*t, addr);
            (Ea::Temp(t), if size == 4 { 2 } else { 1 })
        }
        _ => panic!("addressing mode {}/{} has no memory operand", mode, reg),
    }
}

/// d8(An,Xn) and d8(PC,Xn), brief and full extension formats
fn indexed(jit: &mut Jit, base: Base, stream: &Stream) -> (Ea, u8) {
    let ext = stream.peek(0);
    // D/A bit and register number line up with guest register numbering
    let xn = ((ext >> 12) & 0xf) as u8;
    let scale = ((ext >> 9) & 3) as u8;
    let index = if ext & 0x100 != 0 && ext & 0x40 != 0 {
        None
    } else {
        Some(index_value(jit, xn, ext & 0x800 != 0))
    };
    let t = jit.scratch();

    if ext & 0x100 == 0 {
        let d8 = ext as u8 as i8 as i32;
        match base {
            Base::Reg(b) => jit.add_const(*t, b, d8),
            Base::Pc(pc) => jit.load_const(*t, pc.wrapping_add(d8 as u32)),
        }
        if let Some(x) = &index {
            jit.emit(add(W32, *t, *t, **x, Shift::Lsl, scale));
        }
        return (Ea::Temp(t), 1);
    }

    let mut used = 1usize;
    let mut displacement = |size: u16| -> i32 {
        let d = match size {
            2 => stream.peek(used) as i16 as i32,
            3 => ((stream.peek(used) as u32) << 16 | stream.peek(used + 1) as u32) as i32,
            _ => 0,
        };
        used += displacement_words(size) as usize;
        d
    };
    let bd = displacement((ext >> 4) & 3);
    let od = displacement(ext & 3);

    let suppress_base = ext & 0x80 != 0;
    match (suppress_base, base) {
        (true, _) => jit.load_const(*t, bd as u32),
        (false, Base::Reg(b)) => jit.add_const(*t, b, bd),
        (false, Base::Pc(pc)) => jit.load_const(*t, pc.wrapping_add(bd as u32)),
    }
    let iis = ext & 7;
    let add_index = |jit: &mut Jit| {
        if let Some(x) = &index {
            jit.emit(add(W32, *t, *t, **x, Shift::Lsl, scale));
        }
    };
    match iis {
        0 => add_index(jit),
        1..=3 => {
            add_index(jit);
            jit.emit(ldr(MemSize::W, *t, *t, 0, Index::Offset));
            jit.add_const(*t, *t, od);
        }
        // 4 is reserved; it reads as post-indexed with a null outer displacement, the way a
        // reserved displacement size reads as null
        _ => {
            jit.emit(ldr(MemSize::W, *t, *t, 0, Index::Offset));
            add_index(jit);
            jit.add_const(*t, *t, od);
        }
    }
    (Ea::Temp(t), used as u8)
}

/// index register value, sign-extended from its low word unless `long`
fn index_value(jit: &mut Jit, xn: u8, long: bool) -> Scratch {
    let src = jit.map(xn);
    let x = jit.scratch();
    if long {
        jit.emit(mov(W32, *x, src));
    } else {
        jit.emit(Insn::Bitfield {
            sf: W32,
            op: BitfieldOp::Sbfx,
            rd: *x,
            rn: src,
            lsb: 0,
            width: 16,
        });
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::HostCpu;
    use crate::jit::Options;
    use crate::memory::{AccessType, Memory};
    use crate::Error;

    #[test]
    fn lengths() {
        assert_eq!(ea_length(&[], 0o20, 2), 0);
        assert_eq!(ea_length(&[0x10], 0o50, 2), 1);
        assert_eq!(ea_length(&[0x1004], 0o60, 2), 1);
        // full format, word base displacement, long outer displacement
        assert_eq!(ea_length(&[0x0123], 0o73, 2), 4);
        assert_eq!(ea_length(&[0x0170], 0o60, 2), 3);
        assert_eq!(ea_length(&[], 0o71, 2), 2);
        assert_eq!(ea_length(&[], 0o74, 4), 2);
        assert_eq!(ea_length(&[], 0o74, 2), 1);
        assert_eq!(ea_length(&[], 0o77, 2), 0);
    }

    /// runs the address computation with A0 = 0x2000, D1 = 0xfffe (-2 as a word)
    fn address_of(mode_reg: u8, ext: &[u16]) -> Result<(u32, u8), Error> {
        let mut mem = Memory::new(0x4000);
        mem.write_u32(AccessType::System, 0x3000 + 32, 0x2000)?;
        mem.write_u32(AccessType::System, 0x3000 + 4, 0xfffe)?;
        mem.write_u32(AccessType::System, 0x2010, 0x0000_2400)?;
        let mut words = vec![0xe0d0];
        words.extend_from_slice(ext);
        let mut stream = Stream::new(&words, 0x1000);
        stream.skip(1);
        let mut jit = Jit::new(0x1000, Options::default());
        let (ea, used) = resolve(&mut jit, mode_reg, &stream, 2);
        jit.emit(mov(W32, Reg(13), ea.reg()));
        drop(ea);
        let block = jit.finish();
        let mut cpu = HostCpu::new();
        cpu.x[Reg::CTX.0 as usize] = 0x3000;
        cpu.run(block.code(), &mut mem)?;
        Ok((cpu.x[13] as u32, used))
    }

    #[test]
    fn addresses() -> Result<(), Error> {
        assert_eq!(address_of(0o20, &[])?, (0x2000, 0));
        assert_eq!(address_of(0o50, &[0xfff0])?, (0x1ff0, 1));
        // d8(A0,D1.W*4): 0x2000 + 6 - 8
        assert_eq!(address_of(0o60, &[0x1406])?, (0x1ffe, 1));
        // d8(A0,D1.L): 0x2000 + 0xfffe
        assert_eq!(address_of(0o60, &[0x1800])?, (0x11ffe, 1));
        assert_eq!(address_of(0o70, &[0x8000])?, (0xffff_8000, 1));
        assert_eq!(address_of(0o71, &[0x0001, 0x2345])?, (0x0001_2345, 2));
        // d16(PC): the extension word is at 0x1002
        assert_eq!(address_of(0o72, &[0x0010])?, (0x1012, 1));
        // d8(PC,D1.W)
        assert_eq!(address_of(0o73, &[0x1004])?, (0x1004, 1));
        Ok(())
    }

    #[test]
    fn full_format() -> Result<(), Error> {
        // ([0x10,A0],D1.W,2): index suppressed no, word bd, post-indexed word od
        assert_eq!(address_of(0o60, &[0x1126, 0x0010, 0x0002])?, (0x2400 - 2 + 2, 3));
        // ([0x10,A0]): index suppressed, memory indirect with null outer displacement
        assert_eq!(address_of(0o60, &[0x0161, 0x0010])?, (0x2400, 2));
        // (0x10,A0,D1.W): no memory indirection
        assert_eq!(address_of(0o60, &[0x1120, 0x0010])?, (0x200e, 2));
        // base suppressed: (0x3000,D1.W)
        assert_eq!(address_of(0o60, &[0x11a0, 0x3000])?, (0x2ffe, 2));
        // reserved I/IS 4 resolves like post-indexed with a null outer displacement
        assert_eq!(address_of(0o60, &[0x1124, 0x0010])?, (0x23fe, 2));
        assert_eq!(address_of(0o60, &[0x1125, 0x0010])?, (0x23fe, 2));
        assert_eq!(ea_length(&[0x1124], 0o60, 2), 2);
        Ok(())
    }
}
