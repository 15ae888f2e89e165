//! Log sequence numbers
//!
//! A 64-bit WAL position, ordered by unsigned comparison and rendered in
//! PostgreSQL's `XXXXXXXX/XXXXXXXX` split-hex form.

use std::fmt;
use std::str::FromStr;

/// A position in the write-ahead log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Byte offset `len` past this position.
    pub fn advance(self, len: usize) -> Lsn {
        Lsn(self.0 + len as u64)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", (self.0 >> 32) as u32, self.0 as u32)
    }
}

impl FromStr for Lsn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid LSN {s:?}: expected HI/LO"))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|e| format!("invalid LSN {s:?}: {e}"))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|e| format!("invalid LSN {s:?}: {e}"))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let lsn = Lsn(0x0000_0001_5850_6000);
        assert_eq!(lsn.to_string(), "1/58506000");
        assert_eq!("1/58506000".parse::<Lsn>().unwrap(), lsn);
    }

    #[test]
    fn test_parse_zero() {
        assert_eq!("0/0".parse::<Lsn>().unwrap(), Lsn(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nope".parse::<Lsn>().is_err());
        assert!("1-2".parse::<Lsn>().is_err());
        assert!("zz/00".parse::<Lsn>().is_err());
    }

    #[test]
    fn test_unsigned_ordering() {
        assert!(Lsn(u64::MAX) > Lsn(1));
        assert!(Lsn(0x1_0000_0000) > Lsn(0xFFFF_FFFF));
    }

    #[test]
    fn test_advance() {
        assert_eq!(Lsn(100).advance(24), Lsn(124));
    }
}
