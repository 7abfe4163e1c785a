//! Property tests: translated code against the reference model.
use super::*;
use crate::core::{store_context, Translated};
use crate::exec::Exit;
use crate::instructions::{length_for, translate_one, TABLE};
use crate::jit::{Jit, Options, Stream};
use crate::memory::Memory;
use crate::model::{self, Step};
use crate::registers::Set;
use proptest::prelude::*;

const MEM_SIZE: u32 = 0x4000;
const CODE: u32 = 0x1000;
/// data area for memory operands
const DATA: u32 = 0x2000;

/// memory with a pseudo-random data area
fn memory(seed: u64) -> Memory {
    let mut mem = Memory::new(MEM_SIZE);
    let mut x = seed | 1;
    let bytes: Vec<u8> = (0..0x1100)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x as u8
        })
        .collect();
    mem.load(DATA, &bytes).expect("data area fits in guest memory");
    mem
}

struct Outcome {
    reg: Set,
    mem: Memory,
    exit: Exit,
}

/// Runs the block at CODE translated and on the model from the same state.
fn run_both(words: &[u16], reg: Set, mem: Memory, opts: Options) -> Result<(Outcome, Outcome, Translated), Error> {
    let mut core = Core::new(MEM_SIZE, opts);
    core.mem = mem;
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    core.mem.load(CODE, &bytes)?;
    core.reg = reg;
    core.reg.pc = CODE;
    store_context(&mut core.mem, core.ctx_base, &core.reg)?;
    let (mut model_reg, mut model_mem) = (core.reg, core.mem.clone());

    let t = core.translate(CODE)?;
    let exit = core.exec_block(&t)?;
    let mut model_exit = Exit::Return;
    for _ in 0..t.insns {
        if let Step::Trap(vector) = model::step(&mut model_reg, &mut model_mem)? {
            model_exit = Exit::Break(vector);
            break;
        }
    }
    store_context(&mut model_mem, core.ctx_base, &model_reg)?;
    let translated = Outcome {
        reg: core.reg,
        mem: core.mem.clone(),
        exit,
    };
    let reference = Outcome {
        reg: model_reg,
        mem: model_mem,
        exit: model_exit,
    };
    Ok((translated, reference, t))
}

fn assert_same(a: &Outcome, b: &Outcome) -> Result<(), TestCaseError> {
    prop_assert_eq!(a.exit, b.exit);
    prop_assert_eq!(a.reg, b.reg);
    prop_assert_eq!(a.mem.first_difference(&b.mem), None);
    Ok(())
}

fn state(d: [u32; 8], sr: u16) -> Set {
    let mut reg = Set::default();
    reg.d = d;
    reg.sr.reg = sr;
    reg
}

/// 1110 1ttt 11 mmmrrr followed by its extension word
fn bitfield(kind: u16, mode_reg: u16, dn: u16, offset: Result<u16, u16>, width: Result<u16, u16>) -> [u16; 2] {
    let o = match offset {
        Ok(imm) => (imm & 31) << 6,
        Err(reg) => 0x800 | (reg & 7) << 6,
    };
    let w = match width {
        Ok(imm) => imm & 31,
        Err(reg) => 0x20 | (reg & 7),
    };
    [0xe8c0 | kind << 8 | mode_reg, dn << 12 | o | w]
}

fn either(is_reg: bool, imm: u16, reg: u16) -> Result<u16, u16> {
    if is_reg {
        Err(reg)
    } else {
        Ok(imm)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn register_shifts_match_model(
        field in 0u16..8, dir in 0u16..2, size in 0u16..3, by_reg in any::<bool>(), kind in 0u16..4, dn in 0u16..8,
        d in prop::array::uniform8(any::<u32>()), count in 0u32..64, sr in 0u16..32,
    ) {
        let op = 0xe000 | field << 9 | dir << 8 | size << 6 | (by_reg as u16) << 5 | kind << 3 | dn;
        let mut reg = state(d, sr);
        // counts are taken modulo 64, so the upper bits must not matter
        reg.d[field as usize] = d[field as usize] & !63 | count;
        let (jit, reference, t) = run_both(&[op], reg, Memory::new(MEM_SIZE), Options::default())?;
        prop_assert_eq!(t.insns, 1);
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn memory_shifts_match_model(
        kind in 0u16..4, dir in 0u16..2, mode in prop::sample::select(vec![2u16, 3, 4, 5]), an in 0u16..7,
        disp in -0x100i16..0x100, seed in any::<u64>(), sr in 0u16..32,
    ) {
        let op = 0xe0c0 | kind << 9 | dir << 8 | mode << 3 | an;
        let mut reg = state([0; 8], sr);
        reg.a[an as usize] = DATA + 0x800;
        // only d16(An) takes the extension word; otherwise it would be the next instruction
        let words: &[u16] = if mode == 5 { &[op, disp as u16] } else { &[op] };
        let (jit, reference, _) = run_both(words, reg, memory(seed), Options::default())?;
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn register_bitfields_match_model(
        kind in 0u16..8, container in 0u16..8, dn in 0u16..8, reg_offset in any::<bool>(), reg_width in any::<bool>(),
        imm_offset in 0u16..32, imm_width in 0u16..32, wo in 0u16..8, ww in 0u16..8,
        d in prop::array::uniform8(any::<u32>()), sr in 0u16..32,
    ) {
        let words = bitfield(kind, container, dn, either(reg_offset, imm_offset, wo), either(reg_width, imm_width, ww));
        let (jit, reference, _) = run_both(&words, state(d, sr), Memory::new(MEM_SIZE), Options::default())?;
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn memory_bitfields_match_model(
        kind in 0u16..8, dn in 1u16..8, reg_offset in any::<bool>(), reg_width in any::<bool>(),
        imm_offset in 0u16..32, imm_width in 0u16..32, offset in -0x3000i32..0x3000, width in any::<u32>(),
        d in prop::array::uniform8(any::<u32>()), seed in any::<u64>(), sr in 0u16..32,
    ) {
        // D6 holds the offset and D7 the width when they come from registers
        let words = bitfield(kind, 0o20, dn, either(reg_offset, imm_offset, 6), either(reg_width, imm_width, 7));
        let mut reg = state(d, sr);
        reg.d[6] = offset as u32;
        reg.d[7] = width;
        reg.a[0] = DATA + 0x800;
        let (jit, reference, _) = run_both(&words, reg, memory(seed), Options::default())?;
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn insert_then_extract(
        in_memory in any::<bool>(), reg_offset in any::<bool>(), reg_width in any::<bool>(),
        offset in 0u32..32, width in 1u32..=32, value in any::<u32>(), container in any::<u32>(), seed in any::<u64>(),
    ) {
        // bfins d1,<container>{offset:width} then bfextu <container>{offset:width},d4
        let mode_reg = if in_memory { 0o20 } else { 0o00 };
        let o = either(reg_offset, offset as u16, 2);
        let w = either(reg_width, (width & 31) as u16, 3);
        let ins = bitfield(7, mode_reg, 1, o, w);
        let ext = bitfield(1, mode_reg, 4, o, w);
        let mut reg = state([container, value, offset, width, 0, 0, 0, 0], 0);
        reg.a[0] = DATA + 0x100;
        let (jit, reference, _) = run_both(&[ins[0], ins[1], ext[0], ext[1]], reg, memory(seed), Options::default())?;
        let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
        prop_assert_eq!(jit.reg.d[4], value & mask);
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn byte_reverse_matches_unfused(
        dn in 0u16..8, first in 0u16..2, third in 0u16..2, value in any::<u32>(), sr in 0u16..32,
        next in prop::sample::select(vec![0x4e75u16, 0xe349, 0xe8c1, 0xe351, 0xe5d1]),
    ) {
        // the trailing instruction decides which flags stay live: every flag, none, or only X;
        // 0x0003 is the extension word of bftst d1{0:3} and ends the block otherwise
        let words = [0xe058 | first << 8 | dn, 0x4840 | dn, 0xe058 | third << 8 | dn, next, 0x0003, 0x4e75];
        let mut d = [0u32; 8];
        d[dn as usize] = value;
        d[1] = value.rotate_left(7);
        let mut reg = state(d, sr);
        reg.a[1] = DATA;
        let (jit, reference, t) = run_both(&words, reg, memory(1), Options::default())?;
        prop_assert_eq!(t.lines[0].name, "REV");
        prop_assert_eq!(jit.reg.d[dn as usize], reference.reg.d[dn as usize]);
        assert_same(&jit, &reference)?;
    }

    #[test]
    fn dead_flags_are_left_alone(
        op in 0xe000u16..0xf000, ext in any::<u16>(), d in prop::array::uniform8(any::<u32>()), sr in 0u16..32,
    ) {
        let def = TABLE[(op & 0xfff) as usize];
        // register destinations only: memory forms need a data area
        let register_shift = op & 0xc0 != 0xc0;
        let register_bitfield = op & 0xc0 == 0xc0 && op & 0x800 != 0 && op & 0x38 == 0;
        prop_assume!(def.handler.is_some() && (register_shift || register_bitfield));
        // lsl.w #1,d0 overwrites every flag without reading any
        let words: &[u16] = if register_bitfield { &[op, ext, 0xe348] } else { &[op, 0xe348] };
        let mut jit = Jit::new(CODE, Options::default());
        let mut stream = Stream::new(words, CODE);
        let (_, consumed) = translate_one(&mut jit, &mut stream);
        prop_assume!(consumed == 1);
        let t = Translated { block: jit.finish(), insns: 1, bytes: 2 * stream.pos() as u32, lines: Vec::new() };
        let mut core = Core::new(MEM_SIZE, Options::default());
        core.reg = state(d, sr);
        core.reg.pc = CODE;
        core.exec_block(&t)?;
        prop_assert_eq!(core.reg.sr.reg, sr);
    }

    #[test]
    fn pc_advances_by_length(op in 0xe000u16..0xf000, ext in prop::array::uniform8(any::<u16>())) {
        let mut words = vec![op];
        words.extend_from_slice(&ext);
        let mut jit = Jit::new(CODE, Options::default());
        let mut stream = Stream::new(&words, CODE);
        let (_, consumed) = translate_one(&mut jit, &mut stream);
        let len = length_for(&words) as u32;
        if consumed == 3 {
            prop_assert_eq!(jit.pending_pc(), 6);
        } else if TABLE[(op & 0xfff) as usize].handler.is_some() {
            prop_assert_eq!(jit.pending_pc(), 2 * len);
            prop_assert_eq!(stream.pos() as u32, len);
        } else {
            prop_assert_eq!(len, 0);
            prop_assert!(jit.trapped());
        }
    }
}
