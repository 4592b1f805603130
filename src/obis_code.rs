//! OBIS identifiers (IEC 62056-61).

use alloc::vec::Vec;
use core::fmt::{self, Debug, Display};
use core::str::FromStr;

use nom::{IResult, Parser, number::complete::u8};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

/// A six-octet OBIS code identifying a COSEM object instance.
///
/// Canonical string form is `A-B:C.D.E.F`; the parser also accepts `.` or any
/// mix of `-:.*` as separators, and a missing `F` group defaults to 255.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObisCode {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
}

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (a, b, c, d, e, f)) = (u8, u8, u8, u8, u8, u8).parse(input)?;
        Ok((input, Self::new(a, b, c, d, e, f)))
    }

    /// The six raw octets, as they appear inside attribute descriptors.
    pub fn encode(&self) -> [u8; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// A-XDR octet-string form: `09 06` followed by the six octets, used when
    /// a logical name travels as a `Data` value.
    pub fn encode_as_data(&self) -> Vec<u8> {
        alloc::vec![0x09, 0x06, self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

/// Error parsing an OBIS code from its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseObisCodeError;

impl Display for ParseObisCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OBIS code string")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseObisCodeError {}

impl FromStr for ObisCode {
    type Err = ParseObisCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;

        for group in s.split(['-', ':', '.', '*']) {
            if count == 6 {
                return Err(ParseObisCodeError);
            }
            octets[count] = group.parse().map_err(|_| ParseObisCodeError)?;
            count += 1;
        }

        match count {
            6 => {}
            // F defaults to 255 when omitted.
            5 => octets[5] = 255,
            _ => return Err(ParseObisCodeError),
        }

        let [a, b, c, d, e, f] = octets;
        Ok(Self::new(a, b, c, d, e, f))
    }
}

impl Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}.{}", self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Debug for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObisCode({})", self)
    }
}

#[cfg(feature = "serde")]
impl Serialize for ObisCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_parse_bytes() {
        let input = [1, 0, 1, 8, 0, 255, 0xaa];
        let (remaining, code) = ObisCode::parse(&input).unwrap();

        assert_eq!(remaining, &[0xaa]);
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
    }

    #[test]
    fn test_parse_bytes_insufficient() {
        assert!(ObisCode::parse(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_encode() {
        let code = ObisCode::new(0, 0, 0x2b, 1, 0, 255);
        assert_eq!(code.encode(), [0x00, 0x00, 0x2b, 0x01, 0x00, 0xff]);
        assert_eq!(code.encode_as_data(), [0x09, 0x06, 0x00, 0x00, 0x2b, 0x01, 0x00, 0xff]);
    }

    #[test]
    fn test_from_str_canonical() {
        let code: ObisCode = "1-0:1.8.0.255".parse().unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
    }

    #[test]
    fn test_from_str_dotted() {
        let code: ObisCode = "0.0.1.0.0.255".parse().unwrap();
        assert_eq!(code, ObisCode::new(0, 0, 1, 0, 0, 255));
    }

    #[test]
    fn test_from_str_star_separator() {
        let code: ObisCode = "1-0:1.8.0*255".parse().unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 1, 8, 0, 255));
    }

    #[test]
    fn test_from_str_default_f() {
        let code: ObisCode = "1-0:99.1.0".parse().unwrap();
        assert_eq!(code.f, 255);
    }

    #[test]
    fn test_from_str_rejects_bad_input() {
        assert!("1-0:1.8".parse::<ObisCode>().is_err());
        assert!("1-0:1.8.0.255.7".parse::<ObisCode>().is_err());
        assert!("1-0:1.8.x".parse::<ObisCode>().is_err());
        assert!("256.0.1.0.0.255".parse::<ObisCode>().is_err());
        assert!("".parse::<ObisCode>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for code in [
            ObisCode::new(1, 0, 1, 8, 0, 255),
            ObisCode::new(0, 0, 43, 1, 0, 255),
            ObisCode::new(255, 255, 255, 255, 255, 255),
            ObisCode::new(0, 0, 0, 0, 0, 0),
        ] {
            let parsed: ObisCode = code.to_string().parse().unwrap();
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn test_display_format() {
        assert_eq!(ObisCode::new(1, 0, 1, 8, 0, 255).to_string(), "1-0:1.8.0.255");
    }

    #[test]
    fn test_byte_roundtrip() {
        let code = ObisCode::new(10, 20, 30, 40, 50, 60);
        let (_, parsed) = ObisCode::parse(&code.encode()).unwrap();
        assert_eq!(parsed, code);
    }

    #[test]
    fn test_ordering() {
        assert!(ObisCode::new(1, 0, 1, 8, 0, 255) < ObisCode::new(1, 0, 1, 8, 1, 255));
        assert!(ObisCode::new(1, 0, 1, 8, 0, 255) < ObisCode::new(1, 0, 2, 8, 0, 255));
    }
}
