//! Line E of the 68k opcode map: shifts, rotates and bitfields.
//!
//! The low twelve bits of an opcode index a table built once at first use. Each entry names
//! its handler together with the metadata the flag-liveness scan and the block driver need.
use crate::bitfield::*;
use crate::block::Cursor;
use crate::ea;
use crate::insn::*;
use crate::jit::{Jit, Stream, VECTOR_ILLEGAL};
use crate::registers::Flags;
use crate::shift::*;
use lazy_static::lazy_static;
use std::fmt;

/// Guest instruction translators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Handler {
    Asx,
    Lsx,
    Roxx,
    Rox,
    AsxMem,
    LsxMem,
    RoxxMem,
    RoxMem,
    Bftst,
    Bfextu,
    Bfchg,
    Bfexts,
    Bfclr,
    Bfffo,
    Bfset,
    Bfins,
}

impl Handler {
    pub fn emit(self, jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
        let f = match self {
            Handler::Asx => emit_asx,
            Handler::Lsx => emit_lsx,
            Handler::Roxx => emit_roxx,
            Handler::Rox => emit_rox,
            Handler::AsxMem => emit_asx_mem,
            Handler::LsxMem => emit_lsx_mem,
            Handler::RoxxMem => emit_roxx_mem,
            Handler::RoxMem => emit_rox_mem,
            Handler::Bftst => emit_bftst,
            Handler::Bfextu => emit_bfextu,
            Handler::Bfchg => emit_bfchg,
            Handler::Bfexts => emit_bfexts,
            Handler::Bfclr => emit_bfclr,
            Handler::Bfffo => emit_bfffo,
            Handler::Bfset => emit_bfset,
            Handler::Bfins => emit_bfins,
        };
        f(jit, opcode, stream)
    }
    pub fn name(self) -> &'static str {
        match self {
            Handler::Asx => "ASd",
            Handler::Lsx => "LSd",
            Handler::Roxx => "ROXd",
            Handler::Rox => "ROd",
            Handler::AsxMem => "ASd.W <ea>",
            Handler::LsxMem => "LSd.W <ea>",
            Handler::RoxxMem => "ROXd.W <ea>",
            Handler::RoxMem => "ROd.W <ea>",
            Handler::Bftst => "BFTST",
            Handler::Bfextu => "BFEXTU",
            Handler::Bfchg => "BFCHG",
            Handler::Bfexts => "BFEXTS",
            Handler::Bfclr => "BFCLR",
            Handler::Bfffo => "BFFFO",
            Handler::Bfset => "BFSET",
            Handler::Bfins => "BFINS",
        }
    }
}

/// One dispatch table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpcodeDef {
    pub handler: Option<Handler>,
    /// flags read
    pub needs: Flags,
    /// flags written
    pub sets: Flags,
    /// words including the opcode, before any EA extension words
    pub base_len: u8,
    pub has_ea: bool,
    /// operand size in bytes, 0 where it does not apply
    pub size: u8,
}

impl OpcodeDef {
    const ILLEGAL: OpcodeDef = OpcodeDef {
        handler: None,
        needs: Flags::ALL,
        sets: Flags::NONE,
        base_len: 0,
        has_ea: false,
        size: 0,
    };
}

impl fmt::Display for OpcodeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.handler {
            Some(h) => write!(f, "{} (needs {:?}, sets {:?})", h.name(), self.needs, self.sets),
            None => write!(f, "illegal"),
        }
    }
}

lazy_static! {
    pub static ref TABLE: [OpcodeDef; 4096] = build_table();
}

/// EA modes (mode << 3 | reg) a memory operand may use; `control` adds the PC-relative forms
fn memory_modes(control: bool) -> Vec<u16> {
    let mut modes = Vec::new();
    let mode_range: &[u16] = if control { &[2, 5, 6] } else { &[2, 3, 4, 5, 6] };
    for &mode in mode_range {
        for reg in 0..8 {
            modes.push(mode << 3 | reg);
        }
    }
    let absolute: &[u16] = if control { &[0o70, 0o71, 0o72, 0o73] } else { &[0o70, 0o71] };
    modes.extend_from_slice(absolute);
    modes
}

fn build_table() -> [OpcodeDef; 4096] {
    let mut table = [OpcodeDef::ILLEGAL; 4096];
    let xnzvc = Flags::ALL;
    let nzvc = Flags::NZVC;

    // register shifts: ccc d ss i tt rrr
    for count in 0..8u16 {
        for dir in 0..2u16 {
            for size in 0..3u16 {
                for in_reg in 0..2u16 {
                    for kind in 0..4u16 {
                        for reg in 0..8u16 {
                            let op = count << 9 | dir << 8 | size << 6 | in_reg << 5 | kind << 3 | reg;
                            let (handler, sets) = match kind {
                                0 => (Handler::Asx, xnzvc),
                                1 => (Handler::Lsx, xnzvc),
                                2 => (Handler::Roxx, xnzvc),
                                _ => (Handler::Rox, nzvc),
                            };
                            // a register count of zero leaves every flag as it was
                            let needs = match (in_reg, kind) {
                                (0, 2) => Flags::X,
                                (0, _) => Flags::NONE,
                                (_, 2) => sets | Flags::X,
                                _ => sets,
                            };
                            table[op as usize] = OpcodeDef {
                                handler: Some(handler),
                                needs,
                                sets,
                                base_len: 1,
                                has_ea: false,
                                size: 1 << size,
                            };
                        }
                    }
                }
            }
        }
    }

    // memory shifts: 0 tt d 11 <ea>
    for kind in 0..4u16 {
        for dir in 0..2u16 {
            for &mode in &memory_modes(false) {
                let op = kind << 9 | dir << 8 | 0b11 << 6 | mode;
                let (handler, needs, sets) = match kind {
                    0 => (Handler::AsxMem, Flags::NONE, xnzvc),
                    1 => (Handler::LsxMem, Flags::NONE, xnzvc),
                    2 => (Handler::RoxxMem, Flags::X, xnzvc),
                    _ => (Handler::RoxMem, Flags::NONE, nzvc),
                };
                table[op as usize] = OpcodeDef {
                    handler: Some(handler),
                    needs,
                    sets,
                    base_len: 1,
                    has_ea: true,
                    size: 2,
                };
            }
        }
    }

    // bitfields: 1 ooo 11 <ea>
    let bitfield = [
        Handler::Bftst,
        Handler::Bfextu,
        Handler::Bfchg,
        Handler::Bfexts,
        Handler::Bfclr,
        Handler::Bfffo,
        Handler::Bfset,
        Handler::Bfins,
    ];
    for (ooo, &handler) in bitfield.iter().enumerate() {
        let read_only = matches!(handler, Handler::Bftst | Handler::Bfextu | Handler::Bfexts | Handler::Bfffo);
        let base = 0x800 | (ooo as u16) << 8 | 0b11 << 6;
        for reg in 0..8u16 {
            table[(base | reg) as usize] = OpcodeDef {
                handler: Some(handler),
                needs: Flags::NONE,
                sets: nzvc,
                base_len: 2,
                has_ea: false,
                size: 0,
            };
        }
        let mut modes = memory_modes(true);
        if !read_only {
            modes.retain(|&m| m != 0o72 && m != 0o73);
        }
        for mode in modes {
            table[(base | mode) as usize] = OpcodeDef {
                handler: Some(handler),
                needs: Flags::NONE,
                sets: nzvc,
                base_len: 2,
                has_ea: true,
                size: 0,
            };
        }
    }
    table
}

/// Flags an opcode reads and writes. Unknown opcodes read everything and write nothing.
pub fn flags_for(opcode: u16) -> (Flags, Flags) {
    let def = &TABLE[(opcode & 0xfff) as usize];
    (def.needs, def.sets)
}

/// Length in words of the instruction at the start of `words`, 0 if it is not translated.
pub fn length_for(words: &[u16]) -> u16 {
    let opcode = match words.first() {
        Some(&w) => w,
        None => return 0,
    };
    let def = &TABLE[(opcode & 0xfff) as usize];
    if def.handler.is_none() {
        return 0;
    }
    let base = def.base_len as usize;
    let ext = if def.has_ea {
        ea::ea_length(words.get(base..).unwrap_or(&[]), (opcode & 0x3f) as u8, def.size)
    } else {
        0
    };
    base as u16 + ext
}

/// ror.w #8,Dn / swap Dn / ror.w #8,Dn (either rotate direction) is a byte reverse of Dn
pub fn is_byte_reverse(stream: &Stream) -> bool {
    let op = stream.peek(0);
    op & 0xfef8 == 0xe058 && stream.peek(1) == 0x4840 | (op & 7) && stream.peek(2) & 0xfeff == op & 0xfeff
}

fn emit_byte_reverse(jit: &mut Jit, stream: &mut Stream) -> Cursor {
    let start = stream.start();
    let op = stream.read();
    stream.skip(2);
    let third = stream.words()[start + 2];
    let dn = (op & 7) as u8;
    // the flags left behind are those of the final rotate
    let mask = jit.mask_at(stream.words(), start + 2);
    let reg = jit.map(dn);
    jit.mark_dirty(dn);
    jit.emit(rev(reg, reg));
    if mask.intersects(Flags::N | Flags::Z) {
        jit.emit(cmn_lsl(reg, 16));
        jit.cc_nz_from_host(mask);
    }
    jit.cc_clear(mask & Flags::V);
    let carry_bit = if third & 0x100 != 0 { 0 } else { 15 };
    jit.cc_carry(mask, reg, carry_bit, false);
    jit.advance_pc(6);
    jit.cursor()
}

/// Translates the instruction at the stream position. Returns the cursor after the emitted
/// code and the number of guest instructions consumed.
pub fn translate_one(jit: &mut Jit, stream: &mut Stream) -> (Cursor, u16) {
    stream.mark();
    jit.begin_insn();
    if is_byte_reverse(stream) {
        return (emit_byte_reverse(jit, stream), 3);
    }
    let address = stream.address();
    let opcode = stream.read();
    let def = &TABLE[(opcode & 0xfff) as usize];
    match def.handler {
        Some(handler) => (handler.emit(jit, opcode, stream), 1),
        None => {
            jit.flush_pc();
            jit.emit_debug_string(format!("illegal instruction {:04x} at {:08x}", opcode, address));
            jit.emit_exception(VECTOR_ILLEGAL, 0);
            (jit.emit(Insn::Sentinel), 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::Options;

    fn count(f: impl Fn(&OpcodeDef) -> bool) -> usize { TABLE.iter().filter(|d| f(d)).count() }

    #[test]
    fn table_population() {
        assert_eq!(count(|d| matches!(d.handler, Some(Handler::Asx | Handler::Lsx | Handler::Roxx | Handler::Rox))), 3072);
        // 4 kinds, 2 directions, 42 alterable memory modes
        assert_eq!(count(|d| d.size == 2 && d.has_ea), 4 * 2 * 42);
        // four read-only with 8 + 28 modes, four read-write with 8 + 26
        assert_eq!(count(|d| d.base_len == 2), 4 * 36 + 4 * 34);
        assert_eq!(TABLE[0x0c0].handler, None);
        assert_eq!(TABLE[0x9fa].handler, Some(Handler::Bfextu));
        assert_eq!(TABLE[0xefa].handler, None);
        assert_eq!(TABLE[0x0fc].handler, None);
    }
    #[test]
    fn metadata() {
        // lsl.w #1,d0 ; roxl.w #1,d0 ; ror.l d1,d0
        assert_eq!(flags_for(0xe348), (Flags::NONE, Flags::ALL));
        assert_eq!(flags_for(0xe350), (Flags::X, Flags::ALL));
        assert_eq!(flags_for(0xe2b8), (Flags::NZVC, Flags::NZVC));
        // the opcode is reduced to twelve bits
        assert_eq!(flags_for(0x0348), flags_for(0xe348));
        assert_eq!(flags_for(0xe0c0), (Flags::ALL, Flags::NONE));
        assert_eq!(length_for(&[0xe348]), 1);
        // asl.w d16(a0)
        assert_eq!(length_for(&[0xe1e8, 0x0010]), 2);
        // bfextu (abs.l){0:8},d0
        assert_eq!(length_for(&[0xe9f9, 0x0008, 0x0001, 0x0000]), 4);
        assert_eq!(length_for(&[0xe0c0]), 0);
        assert_eq!(length_for(&[]), 0);
    }
    #[test]
    fn byte_reverse_detection() {
        let check = |words: &[u16]| is_byte_reverse(&Stream::new(words, 0));
        assert!(check(&[0xe05b, 0x4843, 0xe05b]));
        assert!(check(&[0xe15b, 0x4843, 0xe05b]));
        assert!(!check(&[0xe05b, 0x4842, 0xe05b]));
        assert!(!check(&[0xe05b, 0x4843, 0xe05a]));
        assert!(!check(&[0xe05b, 0x4843]));
        assert!(!check(&[0xe09b, 0x4843, 0xe09b]));
    }
    #[test]
    fn illegal_opcode_traps() {
        let words = [0xe0c0];
        let mut jit = Jit::new(0x1000, Options::default());
        let mut stream = Stream::new(&words, 0x1000);
        let (cursor, consumed) = translate_one(&mut jit, &mut stream);
        assert_eq!(consumed, 1);
        assert!(jit.trapped());
        assert_eq!(jit.block().code().last(), Some(&Insn::Sentinel));
        assert_eq!(jit.block().code()[cursor.0 - 2], Insn::Brk { imm: VECTOR_ILLEGAL });
        assert_eq!(encode_last(&jit), 0xffff_ffff);
        assert_eq!(jit.block().notes()[0], "illegal instruction e0c0 at 00001000");
    }
    fn encode_last(jit: &Jit) -> u32 {
        let code = jit.block().code();
        crate::a64::encode(&code[code.len() - 1])
    }
    #[test]
    fn every_opcode_translates() {
        for hi in 0..16u16 {
            for lo in 0..0x1000u16 {
                let words = [hi << 12 | lo, 0x1234, 0x0006, 0x0000, 0x0002];
                let mut jit = Jit::new(0x1000, Options::default());
                let mut stream = Stream::new(&words, 0x1000);
                let before = jit.cursor();
                let (cursor, consumed) = translate_one(&mut jit, &mut stream);
                assert!(cursor > before);
                assert!(consumed == 1 || consumed == 3);
                assert_eq!(jit.scratch_in_use(), 0);
                assert_eq!(jit.block().open_branches(), 0);
                let length = length_for(&words) as u32;
                if length > 0 {
                    assert_eq!(jit.pending_pc(), 2 * length, "opcode {:04x}", words[0]);
                    assert_eq!(stream.pos() as u32, length);
                } else {
                    assert!(jit.trapped());
                }
            }
        }
    }
}
