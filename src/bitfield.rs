//! Bitfield handlers: BFTST, BFEXTU, BFCHG, BFEXTS, BFCLR, BFFFO, BFSET, BFINS.
//!
//! A field is `width` bits starting `offset` bits from the most significant end of its
//! container. In a data register the container is a 32-bit ring. In memory the offset is a
//! signed bit offset from the operand address; the byte holding the first bit and the seven
//! bytes after it are loaded as one big-endian 64-bit word, which covers any field.
use crate::block::Cursor;
use crate::ea::{self, Ea};
use crate::insn::*;
use crate::jit::{Amount, Jit, Stream};
use crate::regalloc::Scratch;
use crate::registers::Flags;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Op {
    Tst,
    Extu,
    Exts,
    Ffo,
    Chg,
    Clr,
    Set,
    Ins,
}
impl Op {
    fn writes_dn(self) -> bool { matches!(self, Op::Extu | Op::Exts | Op::Ffo) }
    fn modifies_field(self) -> bool { matches!(self, Op::Chg | Op::Clr | Op::Set | Op::Ins) }
}

/// Offset or width: an immediate or a data register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Field {
    Imm(u8),
    Reg(u8),
}

#[derive(Clone, Copy, Debug)]
struct Extension {
    dn: u8,
    offset: Field,
    width: Field,
}

fn decode(ext: u16) -> Extension {
    let offset = if ext & 0x800 != 0 {
        Field::Reg(((ext >> 6) & 7) as u8)
    } else {
        Field::Imm(((ext >> 6) & 31) as u8)
    };
    let width = if ext & 0x20 != 0 {
        Field::Reg((ext & 7) as u8)
    } else {
        match (ext & 31) as u8 {
            0 => Field::Imm(32),
            w => Field::Imm(w),
        }
    };
    Extension {
        dn: ((ext >> 12) & 7) as u8,
        offset,
        width,
    }
}

/// An immediate, or a register that may be a scratch owned by this value.
struct Value {
    amount: Amount,
    _held: Option<Scratch>,
}
impl Value {
    fn imm(n: u8) -> Value {
        Value {
            amount: Amount::Imm(n),
            _held: None,
        }
    }
    fn scratch(s: Scratch) -> Value {
        Value {
            amount: Amount::Reg(*s),
            _held: Some(s),
        }
    }
}

fn bind_field(jit: &mut Jit, field: Field) -> Amount {
    match field {
        Field::Imm(n) => Amount::Imm(n),
        Field::Reg(r) => Amount::Reg(jit.map(r)),
    }
}

enum Container {
    Register(Reg),
    Memory(Ea),
}

pub fn emit_bftst(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Tst) }
pub fn emit_bfextu(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Extu) }
pub fn emit_bfexts(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Exts) }
pub fn emit_bfffo(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Ffo) }
pub fn emit_bfchg(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Chg) }
pub fn emit_bfclr(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Clr) }
pub fn emit_bfset(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Set) }
pub fn emit_bfins(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor { emit(jit, opcode, stream, Op::Ins) }

fn emit(jit: &mut Jit, opcode: u16, stream: &mut Stream, op: Op) -> Cursor {
    let mask = jit.update_mask(stream);
    let ext = decode(stream.read());
    let mode_reg = (opcode & 0x3f) as u8;

    // bind every guest register and SR before the width branch below
    let src = if op == Op::Ins { Some(jit.map(ext.dn)) } else { None };
    let offset = bind_field(jit, ext.offset);
    let width_src = bind_field(jit, ext.width);
    let (container, ea_words) = if ea::split(mode_reg).0 == 0 {
        let r = mode_reg & 7;
        let reg = jit.map(r);
        if op.modifies_field() {
            jit.mark_dirty(r);
        }
        (Container::Register(reg), 0)
    } else {
        let (ea, used) = ea::resolve(jit, mode_reg, stream, 0);
        stream.skip(used as usize);
        (Container::Memory(ea), used)
    };
    if !mask.is_empty() {
        jit.modify_cc();
    }
    let dest = if op.writes_dn() { Some(jit.map_for_write(ext.dn)) } else { None };

    // register widths are taken modulo 32, with 0 meaning 32
    let width = match width_src {
        Amount::Imm(w) => Value::imm(w),
        Amount::Reg(r) => {
            let w = jit.scratch();
            jit.emit(and_mask(W32, *w, r, 5));
            let nonzero = jit.forward(cbnz(W32, *w));
            jit.emit(movz(W32, *w, 32, 0));
            jit.bind(nonzero);
            Value::scratch(w)
        }
    };
    let inv = match width.amount {
        Amount::Imm(w) => Value::imm(32 - w),
        Amount::Reg(w) => {
            let s = jit.scratch();
            jit.emit(neg(W32, *s, w));
            jit.emit(add_imm(W32, *s, *s, 32));
            Value::scratch(s)
        }
    };

    match container {
        Container::Register(reg) => register_field(jit, op, mask, reg, offset, &width, &inv, src, dest),
        Container::Memory(ea) => memory_field(jit, op, mask, &ea, offset, &width, &inv, src, dest),
    }

    jit.advance_pc(2 * (2 + ea_words as u32));
    jit.cursor()
}

/// N and Z from the low `32 - inv` bits of `f`, V and C cleared
fn field_flags(jit: &mut Jit, mask: Flags, f: Reg, inv: Amount) {
    if mask.is_empty() {
        return;
    }
    match inv {
        Amount::Imm(i) => {
            jit.emit(cmn_lsl(f, i));
        }
        Amount::Reg(i) => {
            let t = jit.scratch();
            jit.emit(shift_reg(W32, Shift::Lsl, *t, f, i));
            jit.emit(cmn_lsl(*t, 0));
        }
    }
    jit.cc_logic(mask);
}

/// writes the result of BFEXTU, BFEXTS or BFFFO
fn write_dn(jit: &mut Jit, op: Op, dest: Reg, f: Reg, width: Amount, inv: Amount, ffo_offset: Amount) {
    match op {
        Op::Extu => {
            jit.emit(mov(W32, dest, f));
        }
        Op::Exts => {
            let t = jit.scratch();
            jit.shift(W32, Shift::Lsl, *t, f, inv);
            jit.shift(W32, Shift::Asr, dest, *t, inv);
        }
        Op::Ffo => {
            // a pad bit just below the field stops the count at offset + width
            let pad = jit.scratch();
            jit.emit(movz(W32, *pad, 0x8000, 1));
            jit.shift(X64, Shift::Lsr, *pad, *pad, width);
            let t = jit.scratch();
            jit.shift(W32, Shift::Lsl, *t, f, inv);
            jit.emit(orr(W32, *t, *t, *pad, Shift::Lsl, 0));
            jit.emit(clz(*t, *t));
            match ffo_offset {
                Amount::Imm(o) => jit.add_const(dest, *t, o as i32),
                Amount::Reg(o) => {
                    jit.emit(add(W32, dest, *t, o, Shift::Lsl, 0));
                }
            }
        }
        _ => unreachable!("{:?} does not write a data register", op),
    }
}

#[allow(clippy::too_many_arguments)]
fn register_field(
    jit: &mut Jit,
    op: Op,
    mask: Flags,
    reg: Reg,
    offset: Amount,
    width: &Value,
    inv: &Value,
    src: Option<Reg>,
    dest: Option<Reg>,
) {
    let off = match offset {
        Amount::Imm(o) => Value::imm(o),
        Amount::Reg(r) => {
            let s = jit.scratch();
            jit.emit(and_mask(W32, *s, r, 5));
            Value::scratch(s)
        }
    };

    if let (Op::Ins, Some(s)) = (op, src) {
        field_flags(jit, mask, s, inv.amount);
        if width.amount == Amount::Imm(32) {
            jit.shift(W32, Shift::Ror, reg, s, off.amount);
            return;
        }
        let v = jit.scratch();
        jit.shift(W32, Shift::Lsl, *v, s, inv.amount);
        jit.shift(W32, Shift::Ror, *v, *v, off.amount);
        let m = field_mask(jit, off.amount, inv.amount);
        jit.emit(bic(W32, reg, reg, *m));
        jit.emit(orr(W32, reg, reg, *v, Shift::Lsl, 0));
        return;
    }

    // the field rotated to the top of the word, then right-aligned
    let fl = jit.scratch();
    let fl_reg = match off.amount {
        Amount::Imm(0) => reg,
        Amount::Imm(o) => {
            jit.emit(ror(W32, *fl, reg, 32 - o));
            *fl
        }
        Amount::Reg(o) => {
            jit.emit(neg(W32, *fl, o));
            jit.emit(shift_reg(W32, Shift::Ror, *fl, reg, *fl));
            *fl
        }
    };
    let f = jit.scratch();
    jit.shift(W32, Shift::Lsr, *f, fl_reg, inv.amount);
    drop(fl);
    field_flags(jit, mask, *f, inv.amount);

    match op {
        Op::Tst => {}
        Op::Chg | Op::Clr | Op::Set => {
            let m = field_mask(jit, off.amount, inv.amount);
            let logic = match op {
                Op::Chg => Logic::Eor,
                Op::Clr => Logic::Bic,
                _ => Logic::Orr,
            };
            jit.emit(Insn::LogicReg {
                sf: W32,
                op: logic,
                rd: reg,
                rn: reg,
                rm: *m,
                shift: Shift::Lsl,
                amount: 0,
            });
        }
        _ => {
            if let Some(dest) = dest {
                // BFFFO adds the offset as given; only the rotate uses it modulo 32
                write_dn(jit, op, dest, *f, width.amount, inv.amount, offset);
            }
        }
    }
}

/// ones over the field of a register container
fn field_mask(jit: &mut Jit, off: Amount, inv: Amount) -> Scratch {
    let m = jit.scratch();
    if let (Amount::Imm(o), Amount::Imm(i)) = (off, inv) {
        jit.load_const(*m, (u32::MAX << i).rotate_right(o as u32));
        return m;
    }
    jit.emit(movn(W32, *m, 0, 0));
    jit.shift(W32, Shift::Lsl, *m, *m, inv);
    jit.shift(W32, Shift::Ror, *m, *m, off);
    m
}

#[allow(clippy::too_many_arguments)]
fn memory_field(
    jit: &mut Jit,
    op: Op,
    mask: Flags,
    ea: &Ea,
    offset: Amount,
    width: &Value,
    inv: &Value,
    src: Option<Reg>,
    dest: Option<Reg>,
) {
    // byte holding the first bit of the field, and the bit within it
    let (base, disp, bit, _addr) = match offset {
        Amount::Imm(o) => (ea.reg(), (o >> 3) as i16, Value::imm(o & 7), None),
        Amount::Reg(r) => {
            let a = jit.scratch();
            jit.emit(add(W32, *a, ea.reg(), r, Shift::Asr, 3));
            let b = jit.scratch();
            jit.emit(and_mask(W32, *b, r, 3));
            (*a, 0, Value::scratch(b), Some(a))
        }
    };
    let inv64 = match inv.amount {
        Amount::Imm(i) => Value::imm(32 + i),
        Amount::Reg(i) => {
            let s = jit.scratch();
            jit.emit(add_imm(W32, *s, i, 32));
            Value::scratch(s)
        }
    };
    let d = jit.scratch();
    jit.emit(ldr(MemSize::X, *d, base, disp, Index::Offset));

    if let (Op::Ins, Some(s)) = (op, src) {
        field_flags(jit, mask, s, inv.amount);
        let v = jit.scratch();
        jit.shift(X64, Shift::Lsl, *v, s, inv64.amount);
        jit.shift(X64, Shift::Lsr, *v, *v, bit.amount);
        let m = memory_mask(jit, &bit, &inv64);
        jit.emit(Insn::LogicReg {
            sf: X64,
            op: Logic::Bic,
            rd: *d,
            rn: *d,
            rm: *m,
            shift: Shift::Lsl,
            amount: 0,
        });
        jit.emit(orr(X64, *d, *d, *v, Shift::Lsl, 0));
        jit.emit(store(MemSize::X, *d, base, disp, Index::Offset));
        return;
    }

    let f = jit.scratch();
    {
        let fl = jit.scratch();
        jit.shift(X64, Shift::Lsl, *fl, *d, bit.amount);
        jit.shift(X64, Shift::Lsr, *f, *fl, inv64.amount);
    }
    field_flags(jit, mask, *f, inv.amount);

    match op {
        Op::Tst => {}
        Op::Chg | Op::Clr | Op::Set => {
            let m = memory_mask(jit, &bit, &inv64);
            let logic = match op {
                Op::Chg => Logic::Eor,
                Op::Clr => Logic::Bic,
                _ => Logic::Orr,
            };
            jit.emit(Insn::LogicReg {
                sf: X64,
                op: logic,
                rd: *d,
                rn: *d,
                rm: *m,
                shift: Shift::Lsl,
                amount: 0,
            });
            jit.emit(store(MemSize::X, *d, base, disp, Index::Offset));
        }
        _ => {
            if let Some(dest) = dest {
                // BFFFO adds the offset as given, not reduced
                write_dn(jit, op, dest, *f, width.amount, inv.amount, offset);
            }
        }
    }
}

/// ones over the field within the loaded 64-bit word
fn memory_mask(jit: &mut Jit, bit: &Value, inv64: &Value) -> Scratch {
    let m = jit.scratch();
    jit.emit(movn(X64, *m, 0, 0));
    jit.shift(X64, Shift::Lsl, *m, *m, inv64.amount);
    jit.shift(X64, Shift::Lsr, *m, *m, bit.amount);
    m
}
