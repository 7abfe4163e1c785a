#![allow(non_snake_case, non_upper_case_globals)]

//! Intel HEX reader for guest images.
//!
//! Supports the I32HEX subset described in
//! [this wikipedia article](https://en.wikipedia.org/wiki/Intel_HEX): data records, end of
//! file, and the extended segment/linear address records that move data above 64K.
//! Start address records are accepted and ignored since execution starts at `--org`.

use regex::Regex;
use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::io::{BufRead, BufReader};
use std::path::Path;

use lazy_static::lazy_static;
lazy_static! {
    static ref RE_RECORD: Regex =
        Regex::new(r"(?i)^\s*:([0-9a-f]{2})([0-9a-f]{4})([0-9a-f]{2})((?:[0-9a-f]{2})*)([0-9a-f]{2})\s*$").unwrap();
}

pub mod HexRecordType {
    pub const Data: u8 = 0;
    pub const EndOfFile: u8 = 1;
    pub const ExSegAddr: u8 = 2;
    pub const StartSegAddr: u8 = 3;
    pub const ExLinAddr: u8 = 4;
    pub const StartLinAddr: u8 = 5;
}
pub struct HexRecord {
    pub data_size: u8,
    pub address: u16,
    pub record_type: u8,
    pub data: Option<Vec<u8>>,
    pub checksum: u8,
}
impl Display for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dstr = String::new();
        if let Some(data) = &self.data {
            use fmt::Write;
            data.iter().for_each(|&b| _ = write!(dstr, "{:02x}", b));
        }
        write!(
            f,
            ":{:02x}{:04x}{:02x}{dstr}{:02x}",
            self.data_size, self.address, self.record_type, self.checksum
        )
    }
}
use super::Error;
impl HexRecord {
    /// Parses one line. Blank lines give None; anything else that is not a valid record is an error.
    pub fn from_str<S: AsRef<str>>(s: S, line: usize) -> Result<Option<Self>, Error> {
        let s = s.as_ref();
        if s.trim().is_empty() {
            return Ok(None);
        }
        let c = RE_RECORD
            .captures(s)
            .ok_or_else(|| format_err!(line, "not an Intel HEX record: {}", s.trim()))?;
        Self::from_captures(&c).map(Some).ok_or_else(|| format_err!(line, "bad record or checksum"))
    }
    fn from_captures(c: &regex::Captures) -> Option<Self> {
        let data_size = u8::from_str_radix(c.get(1)?.as_str(), 16).ok()?;
        let h = HexRecord {
            data_size,
            address: u16::from_str_radix(c.get(2)?.as_str(), 16).ok()?,
            record_type: u8::from_str_radix(c.get(3)?.as_str(), 16).ok()?,
            data: HexRecord::data_from_str(c.get(4)?.as_str(), data_size),
            checksum: u8::from_str_radix(c.get(5)?.as_str(), 16).ok()?,
        };
        h.calc_checksum().filter(|&c| c == h.checksum).map(|_| h)
    }
    fn data_from_str(s: &str, byte_count: u8) -> Option<Vec<u8>> {
        if byte_count == 0 || s.len() != (2 * byte_count as usize) {
            return None;
        }
        (0..byte_count as usize)
            .map(|i| u8::from_str_radix(&s[i * 2..(i + 1) * 2], 16).ok())
            .collect()
    }
    fn calc_checksum(&self) -> Option<u8> {
        let mut sum = 0u16;
        sum += self.data_size as u16;
        sum += self.address >> 8;
        sum += self.address & 0xff;
        sum += self.record_type as u16;
        if let Some(data) = self.data.as_ref() {
            data.iter().for_each(|&b| sum += b as u16);
            if data.len() != self.data_size as usize {
                return None;
            }
        } else if self.data_size != 0 {
            return None;
        }
        Some((sum as u8).wrapping_neg())
    }
    /// upper address bits set by an extended address record
    fn extended_base(&self) -> Option<u32> {
        let data = self.data.as_ref()?;
        if data.len() != 2 {
            return None;
        }
        let v = (data[0] as u32) << 8 | data[1] as u32;
        match self.record_type {
            HexRecordType::ExSegAddr => Some(v << 4),
            HexRecordType::ExLinAddr => Some(v << 16),
            _ => None,
        }
    }
}

pub struct HexRecordCollection {
    records: Vec<HexRecord>,
    eof: bool,
}

impl HexRecordCollection {
    pub fn from_str_iter<I, T>(iter: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut hf = HexRecordCollection {
            records: Vec::new(),
            eof: false,
        };
        for (i, s) in iter.into_iter().enumerate() {
            if let Some(hr) = HexRecord::from_str(s.into(), i + 1)? {
                hf.add_record(hr)?
            }
        }
        if hf.eof {
            Ok(hf)
        } else {
            Err(general_err!("EOF record not found in hex file"))
        }
    }
    pub fn add_record(&mut self, h: HexRecord) -> Result<(), Error> {
        if self.eof {
            return Err(general_err!("records after EOF in hex file"));
        }
        if h.record_type == HexRecordType::EndOfFile {
            self.eof = true
        }
        self.records.push(h);
        Ok(())
    }
    pub fn read_from_file(path: &Path) -> Result<Self, Error> {
        let file = BufReader::new(File::open(path)?)
            .lines()
            .collect::<Result<Vec<String>, io::Error>>()?;
        HexRecordCollection::from_str_iter(file)
    }
    /// Data records as (absolute address, bytes), with extended addresses applied.
    pub fn segments(&self) -> Result<Vec<(u32, &[u8])>, Error> {
        let mut base = 0u32;
        let mut out = Vec::new();
        for r in self.records.iter() {
            match r.record_type {
                HexRecordType::Data => {
                    if let Some(data) = r.data.as_ref() {
                        out.push((base.wrapping_add(r.address as u32), data.as_slice()));
                    }
                }
                HexRecordType::ExSegAddr | HexRecordType::ExLinAddr => {
                    base = r
                        .extended_base()
                        .ok_or_else(|| general_err!("malformed extended address record: {}", r))?;
                }
                HexRecordType::EndOfFile => break,
                HexRecordType::StartSegAddr | HexRecordType::StartLinAddr => {
                    verbose_println!("ignoring start address record {}", r)
                }
                _ => warn!("ignoring unsupported record type ({}) in hex file.", r.record_type),
            }
        }
        Ok(out)
    }
}

use std::ops::Deref;
impl Deref for HexRecordCollection {
    type Target = Vec<HexRecord>;
    fn deref(&self) -> &Self::Target { &self.records }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records() -> Result<(), Error> {
        let r = HexRecord::from_str(":04100000E748E05885", 1)?.ok_or_else(|| general_err!("no record"))?;
        assert_eq!(r.address, 0x1000);
        assert_eq!(r.data.as_deref(), Some(&[0xe7, 0x48, 0xe0, 0x58][..]));
        assert_eq!(r.to_string(), ":04100000e748e05885");
        assert!(HexRecord::from_str("", 2)?.is_none());
        // bad checksum
        assert!(HexRecord::from_str(":04100000E748E05886", 3).is_err());
        Ok(())
    }
    #[test]
    fn extended_linear_address() -> Result<(), Error> {
        let hex = HexRecordCollection::from_str_iter([
            ":020000040001F9",
            ":02001000484066",
            ":00000001FF",
        ])?;
        let segments = hex.segments()?;
        assert_eq!(segments, vec![(0x0001_0010, &[0x48, 0x40][..])]);
        assert!(HexRecordCollection::from_str_iter([":02001000484066"]).is_err());
        Ok(())
    }
}
