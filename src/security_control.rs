//! The security-control byte of ciphered APDUs.
//!
//! Layout: bits 0-3 security suite id, bit 4 authenticated, bit 5 encrypted,
//! bit 6 broadcast key, bit 7 compressed.
//!
//! Reference: DLMS Green Book Ed. 12, Section 9.2.7.2.4.1.

use core::fmt;

use nom::{IResult, number::complete::u8};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecurityControl(u8);

impl SecurityControl {
    const AUTHENTICATED_BIT: u8 = 0b0001_0000;
    const ENCRYPTED_BIT: u8 = 0b0010_0000;
    const BROADCAST_KEY_BIT: u8 = 0b0100_0000;
    const COMPRESSED_BIT: u8 = 0b1000_0000;

    /// Plain suite-0 control byte with no protection bits set.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Suite-0 "authenticated and encrypted" (0x30), the usual client policy.
    pub const fn authenticated_and_encrypted() -> Self {
        Self(Self::AUTHENTICATED_BIT | Self::ENCRYPTED_BIT)
    }

    /// Suite-0 "authenticated only" (0x10), used for HLS challenge tags and
    /// integrity-only traffic.
    pub const fn authenticated_only() -> Self {
        Self(Self::AUTHENTICATED_BIT)
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, byte) = u8(input)?;
        Ok((input, Self(byte)))
    }

    pub fn suite_id(&self) -> u8 {
        self.0 & 0b0000_1111
    }

    pub fn authenticated(&self) -> bool {
        self.0 & Self::AUTHENTICATED_BIT != 0
    }

    pub fn encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED_BIT != 0
    }

    pub fn broadcast_key(&self) -> bool {
        self.0 & Self::BROADCAST_KEY_BIT != 0
    }

    pub fn compressed(&self) -> bool {
        self.0 & Self::COMPRESSED_BIT != 0
    }

    pub fn set_authenticated(&mut self, on: bool) {
        self.set(Self::AUTHENTICATED_BIT, on);
    }

    pub fn set_encrypted(&mut self, on: bool) {
        self.set(Self::ENCRYPTED_BIT, on);
    }

    pub fn set_broadcast_key(&mut self, on: bool) {
        self.set(Self::BROADCAST_KEY_BIT, on);
    }

    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl Default for SecurityControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecurityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityControl")
            .field("suite_id", &self.suite_id())
            .field("authenticated", &self.authenticated())
            .field("encrypted", &self.encrypted())
            .field("broadcast_key", &self.broadcast_key())
            .field("compressed", &self.compressed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_policies() {
        assert_eq!(SecurityControl::authenticated_and_encrypted().to_byte(), 0x30);
        assert_eq!(SecurityControl::authenticated_only().to_byte(), 0x10);
        assert_eq!(SecurityControl::new().to_byte(), 0x00);
    }

    #[test]
    fn test_bit_accessors() {
        let sc = SecurityControl::from_byte(0x30);
        assert_eq!(sc.suite_id(), 0);
        assert!(sc.authenticated());
        assert!(sc.encrypted());
        assert!(!sc.broadcast_key());
        assert!(!sc.compressed());

        let sc = SecurityControl::from_byte(0xff);
        assert_eq!(sc.suite_id(), 15);
        assert!(sc.broadcast_key());
        assert!(sc.compressed());
    }

    #[test]
    fn test_set_preserves_other_bits() {
        let mut sc = SecurityControl::from_byte(0xff);
        sc.set_encrypted(false);
        assert_eq!(sc.to_byte(), 0xdf);
        sc.set_authenticated(false);
        assert_eq!(sc.to_byte(), 0xcf);
        sc.set_encrypted(true);
        assert_eq!(sc.to_byte(), 0xef);
    }

    #[test]
    fn test_parse() {
        let (rest, sc) = SecurityControl::parse(&[0x10, 0xaa]).unwrap();
        assert_eq!(rest, &[0xaa]);
        assert!(sc.authenticated());
        assert!(!sc.encrypted());
    }
}
