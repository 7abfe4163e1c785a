use super::*;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessType {
    /// instruction fetch by the translator
    Program,
    /// guest data access from translated code or the model
    Data,
    /// the guest context block
    Context,
    /// loaders and test setup
    System,
}

/// Flat big-endian memory shared by the guest image, its data and the guest context block.
/// Addresses are 32-bit guest addresses; accesses of 1, 2, 4 or 8 bytes are supported
/// at any alignment.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(size: u32) -> Memory { Memory { bytes: vec![0; size as usize] } }
    pub fn len(&self) -> usize { self.bytes.len() }
    fn range(&self, atype: AccessType, addr: u32, size: usize) -> Result<std::ops::Range<usize>, Error> {
        let start = addr as usize;
        match start.checked_add(size) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(memory_err!(
                "Out of bounds access. AccessType={:?}, Address={:08x}, Size={}, RAM={:08x} bytes",
                atype,
                addr,
                size,
                self.bytes.len()
            )),
        }
    }
    /// reads `size` bytes (high order byte first)
    pub fn read(&self, atype: AccessType, addr: u32, size: usize) -> Result<u64, Error> {
        let r = self.range(atype, addr, size)?;
        Ok(self.bytes[r].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }
    /// writes the low `size` bytes of val (high order byte first)
    pub fn write(&mut self, atype: AccessType, addr: u32, size: usize, val: u64) -> Result<(), Error> {
        let r = self.range(atype, addr, size)?;
        for (i, b) in self.bytes[r].iter_mut().enumerate() {
            *b = (val >> (8 * (size - 1 - i))) as u8;
        }
        Ok(())
    }
    pub fn read_u16(&self, atype: AccessType, addr: u32) -> Result<u16, Error> {
        Ok(self.read(atype, addr, 2)? as u16)
    }
    pub fn read_u32(&self, atype: AccessType, addr: u32) -> Result<u32, Error> {
        Ok(self.read(atype, addr, 4)? as u32)
    }
    pub fn write_u32(&mut self, atype: AccessType, addr: u32, val: u32) -> Result<(), Error> {
        self.write(atype, addr, 4, val as u64)
    }
    /// copies bytes into memory at addr
    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error> {
        let r = self.range(AccessType::System, addr, bytes.len())?;
        self.bytes[r].copy_from_slice(bytes);
        Ok(())
    }
    pub fn slice(&self, addr: u32, len: usize) -> Result<&[u8], Error> {
        let r = self.range(AccessType::System, addr, len)?;
        Ok(&self.bytes[r])
    }
    /// decodes up to `max` opcode words starting at addr, stopping at the end of memory
    pub fn words(&self, addr: u32, max: usize) -> Vec<u16> {
        let start = (addr as usize).min(self.bytes.len());
        self.bytes[start..]
            .chunks_exact(2)
            .take(max)
            .map(|c| (c[0] as u16) << 8 | c[1] as u16)
            .collect()
    }
    /// index of the first byte that differs from other, if any
    pub fn first_difference(&self, other: &Memory) -> Option<u32> {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .position(|(a, b)| a != b)
            .map(|p| p as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_access() -> Result<(), Error> {
        let mut mem = Memory::new(0x100);
        mem.write(AccessType::System, 0x11, 4, 0x1234_5678)?;
        assert_eq!(mem.read(AccessType::System, 0x11, 1)?, 0x12);
        assert_eq!(mem.read_u16(AccessType::System, 0x13)?, 0x5678);
        assert_eq!(mem.read(AccessType::System, 0x10, 8)?, 0x0012_3456_7800_0000);
        assert_eq!(mem.words(0x12, 2), vec![0x3456, 0x7800]);
        Ok(())
    }
    #[test]
    fn out_of_bounds() {
        let mut mem = Memory::new(0x10);
        let e = mem.read(AccessType::Data, 0xe, 4).err().map(|e| e.kind);
        assert_eq!(e, Some(ErrorKind::Memory));
        assert!(mem.write(AccessType::Data, 0xffff_ffff, 2, 0).is_err());
        assert!(mem.load(0xc, &[1, 2, 3, 4]).is_ok());
        assert_eq!(mem.words(0xe, 8), vec![0x0304]);
    }
}
