//! Host register allocation.
//!
//! Host registers x0-x13 form the scratch pool. Guest registers are bound lazily to x14-x25:
//! the first `map` of a guest register loads it from the context block, later uses reuse the
//! binding, and dirty bindings are written back on eviction and at the end of the block.
//! Guest values held in host registers always have their upper 32 bits clear.
use crate::block::Block;
use crate::insn::*;
use std::cell::RefCell;
use std::ops::Deref;
use std::rc::Rc;

const SCRATCH_COUNT: u8 = 14;
const BIND_FIRST: u8 = 14;
const BIND_LAST: u8 = 25;

/// byte offset of guest register `guest` (D0-D7, A0-A7) in the context block
pub fn ctx_offset(guest: u8) -> i16 { guest as i16 * 4 }

#[derive(Default)]
struct Pool {
    used: u32,
}
impl Pool {
    fn take(&mut self) -> Reg {
        for i in 0..SCRATCH_COUNT {
            if self.used & (1 << i) == 0 {
                self.used |= 1 << i;
                return Reg(i);
            }
        }
        panic!("scratch register pool exhausted");
    }
    fn give(&mut self, reg: Reg) {
        debug_assert!(self.used & (1 << reg.0) != 0, "x{} released twice", reg.0);
        self.used &= !(1 << reg.0);
    }
}

/// A scratch register, returned to the pool when dropped.
pub struct Scratch {
    reg: Reg,
    pool: Rc<RefCell<Pool>>,
}
impl Scratch {
    pub fn reg(&self) -> Reg { self.reg }
}
impl Deref for Scratch {
    type Target = Reg;
    fn deref(&self) -> &Reg { &self.reg }
}
impl Drop for Scratch {
    fn drop(&mut self) { self.pool.borrow_mut().give(self.reg) }
}

#[derive(Clone, Copy)]
struct Binding {
    host: Reg,
    dirty: bool,
    last_use: u32,
}

pub struct RegAlloc {
    pool: Rc<RefCell<Pool>>,
    bound: [Option<Binding>; 16],
    epoch: u32,
}

impl RegAlloc {
    pub fn new() -> RegAlloc {
        RegAlloc {
            pool: Rc::new(RefCell::new(Pool::default())),
            bound: [None; 16],
            epoch: 0,
        }
    }
    pub fn scratch(&self) -> Scratch {
        let reg = self.pool.borrow_mut().take();
        Scratch {
            reg,
            pool: Rc::clone(&self.pool),
        }
    }
    pub fn scratch_in_use(&self) -> u32 { self.pool.borrow().used.count_ones() }
    /// starts a new guest instruction; bindings used from now on are not evicted until the next one
    pub fn begin_insn(&mut self) { self.epoch += 1; }
    pub fn is_bound(&self, guest: u8) -> bool { self.bound[guest as usize].is_some() }
    pub fn map(&mut self, block: &mut Block, guest: u8) -> Reg { self.bind(block, guest, true) }
    /// binds without loading: the caller overwrites the whole register
    pub fn map_for_write(&mut self, block: &mut Block, guest: u8) -> Reg {
        let host = self.bind(block, guest, false);
        self.mark_dirty(guest);
        host
    }
    pub fn mark_dirty(&mut self, guest: u8) {
        if let Some(b) = self.bound[guest as usize].as_mut() {
            b.dirty = true;
        }
    }
    fn bind(&mut self, block: &mut Block, guest: u8, load: bool) -> Reg {
        let epoch = self.epoch;
        if let Some(b) = self.bound[guest as usize].as_mut() {
            b.last_use = epoch;
            return b.host;
        }
        let host = match self.free_host() {
            Some(host) => host,
            None => self.evict(block),
        };
        if load {
            block.emit(ldr(MemSize::W, host, Reg::CTX, ctx_offset(guest), Index::Offset));
        }
        self.bound[guest as usize] = Some(Binding {
            host,
            dirty: false,
            last_use: epoch,
        });
        host
    }
    fn free_host(&self) -> Option<Reg> {
        (BIND_FIRST..=BIND_LAST)
            .map(Reg)
            .find(|&r| !self.bound.iter().flatten().any(|b| b.host == r))
    }
    fn evict(&mut self, block: &mut Block) -> Reg {
        let epoch = self.epoch;
        let victim = self
            .bound
            .iter()
            .enumerate()
            .filter_map(|(g, b)| b.filter(|b| b.last_use != epoch).map(|b| (g, b)))
            .min_by_key(|(_, b)| b.last_use);
        let (guest, b) = match victim {
            Some(v) => v,
            None => panic!("every guest binding is in use by the current instruction"),
        };
        if b.dirty {
            block.emit(store(MemSize::W, b.host, Reg::CTX, ctx_offset(guest as u8), Index::Offset));
        }
        self.bound[guest] = None;
        b.host
    }
    /// writes every dirty binding back to the context block; bindings stay valid
    pub fn flush(&mut self, block: &mut Block) {
        for (guest, b) in self.bound.iter_mut().enumerate() {
            if let Some(b) = b.as_mut().filter(|b| b.dirty) {
                block.emit(store(MemSize::W, b.host, Reg::CTX, ctx_offset(guest as u8), Index::Offset));
                b.dirty = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_released_on_drop() {
        let ra = RegAlloc::new();
        let a = ra.scratch();
        {
            let b = ra.scratch();
            assert_eq!((*a, *b), (Reg(0), Reg(1)));
            assert_eq!(ra.scratch_in_use(), 2);
        }
        assert_eq!(ra.scratch_in_use(), 1);
        let c = ra.scratch();
        assert_eq!(c.reg(), Reg(1));
        drop(a);
        drop(c);
        assert_eq!(ra.scratch_in_use(), 0);
    }
    #[test]
    #[should_panic(expected = "exhausted")]
    fn pool_exhaustion_panics() {
        let ra = RegAlloc::new();
        let _held: Vec<Scratch> = (0..=SCRATCH_COUNT).map(|_| ra.scratch()).collect();
    }
    #[test]
    fn bindings_load_once_and_flush_dirty() {
        let mut ra = RegAlloc::new();
        let mut block = Block::new(0);
        ra.begin_insn();
        let d3 = ra.map(&mut block, 3);
        assert_eq!(ra.map(&mut block, 3), d3);
        let a0 = ra.map_for_write(&mut block, 8);
        assert_eq!(block.code(), &[ldr(MemSize::W, d3, Reg::CTX, 12, Index::Offset)]);
        ra.flush(&mut block);
        assert_eq!(block.code()[1], store(MemSize::W, a0, Reg::CTX, 32, Index::Offset));
        ra.flush(&mut block);
        assert_eq!(block.len(), 2);
    }
    #[test]
    fn eviction_writes_back_least_recent() {
        let mut ra = RegAlloc::new();
        let mut block = Block::new(0);
        for g in 0..12u8 {
            ra.begin_insn();
            ra.map_for_write(&mut block, g);
        }
        ra.begin_insn();
        let host_of_d0 = ra.map(&mut block, 0);
        ra.begin_insn();
        // D1 is now the least recently used binding
        let host = ra.map(&mut block, 12);
        assert!(!ra.is_bound(1));
        assert!(ra.is_bound(0));
        assert_ne!(host, host_of_d0);
        let n = block.len();
        assert_eq!(block.code()[n - 2], store(MemSize::W, host, Reg::CTX, 4, Index::Offset));
        assert_eq!(block.code()[n - 1], ldr(MemSize::W, host, Reg::CTX, 48, Index::Offset));
    }
}
