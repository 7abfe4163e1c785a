//! Condition-code liveness.
//!
//! A line-E instruction only computes the flags that a later instruction may read before
//! all of them are overwritten. The scan walks forward through line-E instructions using
//! the dispatch metadata; any instruction it cannot see through reads every flag.
use crate::instructions::{flags_for, length_for};
use crate::registers::Flags;

/// how many instructions are inspected past the current one
pub const LOOKAHEAD: usize = 16;

fn is_line_e(op: u16) -> bool { op & 0xf000 == 0xe000 }

/// Flags the instruction at word index `at` has to produce.
pub fn update_mask(words: &[u16], at: usize) -> Flags {
    let op = match words.get(at) {
        Some(&op) => op,
        None => return Flags::ALL,
    };
    let (_, produced) = flags_for(op);
    let mut remaining = produced;
    let mut live = Flags::NONE;
    let mut pos = at + length_for(&words[at..]) as usize;
    if pos == at {
        return produced;
    }
    for _ in 0..LOOKAHEAD {
        if remaining.is_empty() {
            return live;
        }
        let next = match words.get(pos) {
            Some(&w) if is_line_e(w) => w,
            _ => break,
        };
        let len = length_for(&words[pos..]) as usize;
        if len == 0 {
            break;
        }
        let (needs, sets) = flags_for(next);
        live |= remaining & needs;
        remaining &= !sets;
        pos += len;
    }
    live | remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwritten_flags_are_dead() {
        // lsl.w #1,d0 ; lsl.w #1,d1
        let words = [0xe348, 0xe349];
        assert_eq!(update_mask(&words, 0), Flags::NONE);
        assert_eq!(update_mask(&words, 1), Flags::ALL);
    }
    #[test]
    fn extend_read_keeps_x_alive() {
        // lsl.w #1,d0 ; roxl.w #1,d1
        let words = [0xe348, 0xe351];
        assert_eq!(update_mask(&words, 0), Flags::X);
        // roxl.w d2,d1 reads every flag it could leave unchanged
        let words = [0xe348, 0xe571];
        assert_eq!(update_mask(&words, 0), Flags::ALL);
    }
    #[test]
    fn rotates_leave_x_live() {
        // lsr.l #2,d0 ; ror.l #1,d0 ; other family
        let words = [0xe488, 0xe298, 0x4e75];
        assert_eq!(update_mask(&words, 0), Flags::X);
        assert_eq!(update_mask(&words, 1), Flags::NZVC);
    }
    #[test]
    fn bitfield_lengths_are_followed() {
        // bftst d0{0:8} ; lsl.w #1,d0
        let words = [0xe8c0, 0x0008, 0xe348];
        assert_eq!(update_mask(&words, 0), Flags::NONE);
    }
    #[test]
    fn unmapped_and_end_are_opaque() {
        let words = [0xe348, 0xe0c0];
        assert_eq!(update_mask(&words, 0), Flags::ALL);
        assert_eq!(update_mask(&[0xe348], 0), Flags::ALL);
        assert_eq!(update_mask(&[], 0), Flags::ALL);
    }
}
