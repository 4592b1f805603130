//! A-XDR data codec for DLMS/COSEM.
//!
//! Implements the recursive tagged `data` tree carried by every xDLMS service
//! (attribute values, method parameters, notification bodies) together with
//! the DLMS length encoding and the 12-byte date-time format.
//!
//! Reference: DLMS Green Book Ed. 12, Section 4.1.6.

use alloc::boxed::Box;
use alloc::{string::String, vec::Vec};
use core::convert::TryFrom;
use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::take,
    combinator::fail,
    number::streaming::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u32, be_u64, i8, u8},
};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

/// A-XDR type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum DataType {
    Null               =  0,
    Array              =  1,
    Structure          =  2,
    Bool               =  3,
    BitString          =  4,
    DoubleLong         =  5,
    DoubleLongUnsigned =  6,
    OctetString        =  9,
    VisibleString      = 10,
    Utf8String         = 12,
    BinaryCodedDecimal = 13,
    Integer            = 15,
    Long               = 16,
    Unsigned           = 17,
    LongUnsigned       = 18,
    CompactArray       = 19,
    Long64             = 20,
    Long64Unsigned     = 21,
    Enum               = 22,
    Float32            = 23,
    Float64            = 24,
    DateTime           = 25,
    Date               = 26,
    Time               = 27,
}

#[cfg(feature = "serde")]
impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

/// Helper trait for building encoded buffers with big-endian byte order.
///
/// All multi-byte integers on the DLMS wire are big-endian.
pub trait ByteWriter {
    fn push_u8(&mut self, value: u8);
    fn push_u16(&mut self, value: u16);
    fn push_u32(&mut self, value: u32);
    fn push_u64(&mut self, value: u64);
    fn push_i8(&mut self, value: i8);
    fn push_i16(&mut self, value: i16);
    fn push_i32(&mut self, value: i32);
    fn push_i64(&mut self, value: i64);
    fn push_bytes(&mut self, bytes: &[u8]);
}

impl ByteWriter for Vec<u8> {
    fn push_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn push_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_i8(&mut self, value: i8) {
        self.push(value as u8);
    }

    fn push_i16(&mut self, value: i16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_i32(&mut self, value: i32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_i64(&mut self, value: i64) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

// ============================================================================
// DLMS length codec
// ============================================================================

/// Append a DLMS-encoded length: one byte below 128, otherwise `0x80 | n`
/// followed by the `n` big-endian bytes of the minimal representation.
pub(crate) fn push_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        let bytes = (len as u64).to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        let tail = &bytes[first..];
        buf.push(0x80 | tail.len() as u8);
        buf.extend_from_slice(tail);
    }
}

/// Number of bytes `push_length` emits for `len`.
pub(crate) fn length_size(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        let value_bytes = (8 - (len as u64).leading_zeros() as usize / 8).max(1);
        1 + value_bytes
    }
}

/// Parse a DLMS-encoded length.
///
/// Long forms up to four length octets are accepted, including non-minimal
/// ones (`81 05` etc.) which appear in live meter traffic. The long form with
/// zero length octets and forms beyond four octets are rejected.
pub(crate) fn parse_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = u8(input)?;
    if first & 0x80 == 0 {
        return Ok((input, first as usize));
    }
    let count = (first & 0x7f) as usize;
    if count == 0 || count > 4 {
        return fail().parse(input);
    }
    let (input, bytes) = take(count)(input)?;
    let mut len = 0usize;
    for &b in bytes {
        len = (len << 8) | b as usize;
    }
    Ok((input, len))
}

// ============================================================================
// Bit strings
// ============================================================================

/// A bit string with bit-exact length.
///
/// The wire length field counts bits; the payload is the minimal number of
/// whole bytes, most significant bit first. Unused trailing bits are kept
/// zero so equality is well defined.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BitString {
    bit_length: usize,
    data: Vec<u8>,
}

impl BitString {
    /// Create a bit string from raw bytes, masking any unused trailing bits.
    pub fn new(mut data: Vec<u8>, bit_length: usize) -> Self {
        data.resize(bit_length.div_ceil(8), 0);
        if bit_length % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xffu8 << (8 - bit_length % 8);
            }
        }
        Self { bit_length, data }
    }

    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Value of bit `index`, counted from the most significant bit of the
    /// first byte. Out-of-range indexes read as `false`.
    pub fn bit(&self, index: usize) -> bool {
        if index >= self.bit_length {
            return false;
        }
        (self.data[index / 8] >> (7 - index % 8)) & 1 != 0
    }

    fn parse_body(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, bit_length) = parse_length(input)?;
        let (input, bytes) = take(bit_length.div_ceil(8))(input)?;
        Ok((input, Self::new(bytes.to_vec(), bit_length)))
    }

    fn push_body(&self, buf: &mut Vec<u8>) {
        push_length(buf, self.bit_length);
        buf.push_bytes(&self.data);
    }
}

// ============================================================================
// Date, time, date-time
// ============================================================================

/// COSEM date (5 bytes). `None` components encode as wildcards
/// (`0xFFFF` for the year, `0xFF` otherwise).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: Option<u16>,
    pub month: Option<u8>,
    pub day_of_month: Option<u8>,
    pub day_of_week: Option<u8>,
}

impl Date {
    pub fn new(year: u16, month: u8, day_of_month: u8, day_of_week: u8) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            day_of_month: Some(day_of_month),
            day_of_week: Some(day_of_week),
        }
    }

    /// A date with every component unspecified.
    pub const WILDCARD: Self =
        Self { year: None, month: None, day_of_month: None, day_of_week: None };

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, year) = be_u16(input)?;
        let (input, (month, day_of_month, day_of_week)) = (u8, u8, u8).parse(input)?;

        let year = Some(year).filter(|&y| y != 0xffff);
        let month = match month {
            0xff => None,
            1..=12 => Some(month),
            _ => return fail().parse(input),
        };
        let day_of_month = match day_of_month {
            0xff => None,
            1..=31 => Some(day_of_month),
            _ => return fail().parse(input),
        };
        let day_of_week = match day_of_week {
            0xff => None,
            1..=7 => Some(day_of_week),
            _ => return fail().parse(input),
        };

        Ok((input, Self { year, month, day_of_month, day_of_week }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.push_u16(self.year.unwrap_or(0xffff));
        buf.push_u8(self.month.unwrap_or(0xff));
        buf.push_u8(self.day_of_month.unwrap_or(0xff));
        buf.push_u8(self.day_of_week.unwrap_or(0xff));
        buf
    }

    #[cfg(feature = "chrono-conversions")]
    pub fn from_chrono(date: &chrono::NaiveDate) -> Self {
        use chrono::Datelike;
        Self::new(
            date.year() as u16,
            date.month() as u8,
            date.day() as u8,
            date.weekday().number_from_monday() as u8,
        )
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{:04}", year)?,
            None => write!(f, "*")?,
        }
        for part in [self.month, self.day_of_month] {
            match part {
                Some(n) => write!(f, "-{:02}", n)?,
                None => write!(f, "-*")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Date(\"{}\")", self)
    }
}

#[cfg(feature = "serde")]
impl Serialize for Date {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// COSEM time (4 bytes). `None` components encode as `0xFF` wildcards.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub second: Option<u8>,
    pub hundredth: Option<u8>,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, hundredth: u8) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            second: Some(second),
            hundredth: Some(hundredth),
        }
    }

    pub const WILDCARD: Self = Self { hour: None, minute: None, second: None, hundredth: None };

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (hour, minute, second, hundredth)) = (u8, u8, u8, u8).parse(input)?;

        let hour = match hour {
            0xff => None,
            0..=23 => Some(hour),
            _ => return fail().parse(input),
        };
        let minute = match minute {
            0xff => None,
            0..=59 => Some(minute),
            _ => return fail().parse(input),
        };
        let second = match second {
            0xff => None,
            0..=59 => Some(second),
            _ => return fail().parse(input),
        };
        let hundredth = match hundredth {
            0xff => None,
            0..=99 => Some(hundredth),
            _ => return fail().parse(input),
        };

        Ok((input, Self { hour, minute, second, hundredth }))
    }

    pub fn encode(&self) -> Vec<u8> {
        alloc::vec![
            self.hour.unwrap_or(0xff),
            self.minute.unwrap_or(0xff),
            self.second.unwrap_or(0xff),
            self.hundredth.unwrap_or(0xff),
        ]
    }

    #[cfg(feature = "chrono-conversions")]
    pub fn from_chrono(time: &chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        Self::new(
            time.hour() as u8,
            time.minute() as u8,
            time.second() as u8,
            (time.nanosecond() / 10_000_000) as u8,
        )
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:02}",
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
            self.hundredth.unwrap_or(0),
        )
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time(\"{}\")", self)
    }
}

#[cfg(feature = "serde")]
impl Serialize for Time {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Clock status byte of a date-time value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ClockStatus(u8);

impl ClockStatus {
    const INVALID_VALUE_BIT: u8 = 0b0000_0001;
    const DOUBTFUL_VALUE_BIT: u8 = 0b0000_0010;
    const DIFFERENT_BASE_BIT: u8 = 0b0000_0100;
    const INVALID_STATUS_BIT: u8 = 0b0000_1000;
    const DAYLIGHT_SAVING_BIT: u8 = 0b1000_0000;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub fn invalid_value(&self) -> bool {
        self.0 & Self::INVALID_VALUE_BIT != 0
    }

    pub fn doubtful_value(&self) -> bool {
        self.0 & Self::DOUBTFUL_VALUE_BIT != 0
    }

    pub fn different_base(&self) -> bool {
        self.0 & Self::DIFFERENT_BASE_BIT != 0
    }

    pub fn invalid_status(&self) -> bool {
        self.0 & Self::INVALID_STATUS_BIT != 0
    }

    pub fn daylight_saving(&self) -> bool {
        self.0 & Self::DAYLIGHT_SAVING_BIT != 0
    }
}

impl fmt::Debug for ClockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClockStatus({:#04x})", self.0)
    }
}

/// COSEM date-time (12 bytes): date(5), time(4), deviation(2 BE signed),
/// clock status(1).
///
/// The stored deviation is minutes *from local time to UTC*, the negation of
/// the usual UTC offset: local 14:00 at UTC+01:00 carries deviation -60
/// (`0xFF 0xC4`). `0x8000` and `0xFF` encode unspecified deviation/status.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
    pub deviation_minutes: Option<i16>,
    pub clock_status: Option<ClockStatus>,
}

impl DateTime {
    /// Build a date-time from a local civil time and a conventional UTC
    /// offset (minutes east of UTC). The offset is negated into the stored
    /// deviation.
    pub fn from_local(date: Date, time: Time, utc_offset_minutes: i16) -> Self {
        Self {
            date,
            time,
            deviation_minutes: Some(-utc_offset_minutes),
            clock_status: Some(ClockStatus::from_bits(0)),
        }
    }

    /// Conventional UTC offset in minutes east of UTC, when specified.
    pub fn utc_offset_minutes(&self) -> Option<i16> {
        self.deviation_minutes.map(|d| -d)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, date) = Date::parse(input)?;
        let (input, time) = Time::parse(input)?;
        let (input, deviation) = be_i16(input)?;
        let deviation_minutes = Some(deviation).filter(|&d| d != 0x8000u16 as i16);
        let (input, status) = u8(input)?;
        let clock_status = Some(status).filter(|&b| b != 0xff).map(ClockStatus::from_bits);

        Ok((input, Self { date, time, deviation_minutes, clock_status }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.push_bytes(&self.date.encode());
        buf.push_bytes(&self.time.encode());
        buf.push_i16(self.deviation_minutes.unwrap_or(0x8000u16 as i16));
        buf.push_u8(self.clock_status.map(|cs| cs.bits()).unwrap_or(0xff));
        buf
    }

    #[cfg(feature = "chrono-conversions")]
    pub fn from_chrono(dt: &chrono::NaiveDateTime, utc_offset_minutes: i16) -> Self {
        Self::from_local(
            Date::from_chrono(&dt.date()),
            Time::from_chrono(&dt.time()),
            utc_offset_minutes,
        )
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)?;

        if let Some(offset) = self.utc_offset_minutes() {
            let sign = if offset >= 0 { '+' } else { '-' };
            let offset = offset.abs();
            write!(f, "{}{:02}:{:02}", sign, offset / 60, offset % 60)?;
        }

        Ok(())
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime(\"{}\")", self)
    }
}

#[cfg(feature = "serde")]
impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Compact arrays
// ============================================================================

/// Type description of compact-array contents: a tag tree without values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum TypeDescriptor {
    Simple(DataType),
    Array { count: u16, element: Box<TypeDescriptor> },
    Structure(Vec<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        let data_type = match DataType::try_from(tag) {
            Ok(dt) => dt,
            Err(_) => return fail().parse(input),
        };
        match data_type {
            DataType::Array => {
                let (input, count) = be_u16(input)?;
                let (input, element) = Self::parse(input)?;
                Ok((input, Self::Array { count, element: Box::new(element) }))
            }
            DataType::Structure => {
                let (input, n) = parse_length(input)?;
                let mut members = Vec::with_capacity(n.min(16));
                let mut rest = input;
                for _ in 0..n {
                    let (r, member) = Self::parse(rest)?;
                    members.push(member);
                    rest = r;
                }
                Ok((rest, Self::Structure(members)))
            }
            // Nested compact arrays are not a thing on the wire.
            DataType::CompactArray => fail().parse(input),
            simple => Ok((input, Self::Simple(simple))),
        }
    }

    pub fn push(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Simple(dt) => buf.push(*dt as u8),
            Self::Array { count, element } => {
                buf.push(DataType::Array as u8);
                buf.push_u16(*count);
                element.push(buf);
            }
            Self::Structure(members) => {
                buf.push(DataType::Structure as u8);
                push_length(buf, members.len());
                for member in members {
                    member.push(buf);
                }
            }
        }
    }

    fn matches(&self, data: &Data) -> bool {
        match (self, data) {
            (Self::Array { count, element }, Data::Array(items)) => {
                items.len() == *count as usize && items.iter().all(|i| element.matches(i))
            }
            (Self::Structure(members), Data::Structure(items)) => {
                members.len() == items.len()
                    && members.iter().zip(items).all(|(m, i)| m.matches(i))
            }
            (Self::Simple(dt), data) => data.data_type() == *dt,
            _ => false,
        }
    }
}

/// A compact array: one shared type description, then packed element bodies
/// without per-element tags.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CompactArray {
    descriptor: TypeDescriptor,
    elements: Vec<Data>,
}

impl CompactArray {
    /// Build a compact array. Returns `None` when any element does not match
    /// the descriptor, so encoding is always well formed.
    pub fn new(descriptor: TypeDescriptor, elements: Vec<Data>) -> Option<Self> {
        if elements.iter().all(|e| descriptor.matches(e)) {
            Some(Self { descriptor, elements })
        } else {
            None
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn elements(&self) -> &[Data] {
        &self.elements
    }

    fn parse_body(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, descriptor) = TypeDescriptor::parse(input)?;
        let (input, len) = parse_length(input)?;
        let (input, mut contents) = take(len)(input)?;

        let mut elements = Vec::new();
        while !contents.is_empty() {
            let (rest, element) = Data::parse_packed(&descriptor, contents)?;
            elements.push(element);
            contents = rest;
        }

        Ok((input, Self { descriptor, elements }))
    }

    fn push_body(&self, buf: &mut Vec<u8>) {
        self.descriptor.push(buf);
        let mut contents = Vec::new();
        for element in &self.elements {
            element.push_packed(&mut contents);
        }
        push_length(buf, contents.len());
        buf.push_bytes(&contents);
    }
}

// ============================================================================
// The data tree
// ============================================================================

/// A decoded A-XDR data value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[non_exhaustive]
pub enum Data {
    Null,
    Bool(bool),
    BitString(BitString),
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    OctetString(Vec<u8>),
    VisibleString(String),
    Utf8String(String),
    Bcd(u8),
    Integer(i8),
    Long(i16),
    Unsigned(u8),
    LongUnsigned(u16),
    Long64(i64),
    Long64Unsigned(u64),
    Enum(u8),
    Float32(f32),
    Float64(f64),
    DateTime(DateTime),
    Date(Date),
    Time(Time),
    Array(Vec<Data>),
    Structure(Vec<Data>),
    CompactArray(CompactArray),
}

impl Data {
    /// Wire tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Bool(_) => DataType::Bool,
            Self::BitString(_) => DataType::BitString,
            Self::DoubleLong(_) => DataType::DoubleLong,
            Self::DoubleLongUnsigned(_) => DataType::DoubleLongUnsigned,
            Self::OctetString(_) => DataType::OctetString,
            Self::VisibleString(_) => DataType::VisibleString,
            Self::Utf8String(_) => DataType::Utf8String,
            Self::Bcd(_) => DataType::BinaryCodedDecimal,
            Self::Integer(_) => DataType::Integer,
            Self::Long(_) => DataType::Long,
            Self::Unsigned(_) => DataType::Unsigned,
            Self::LongUnsigned(_) => DataType::LongUnsigned,
            Self::Long64(_) => DataType::Long64,
            Self::Long64Unsigned(_) => DataType::Long64Unsigned,
            Self::Enum(_) => DataType::Enum,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::DateTime(_) => DataType::DateTime,
            Self::Date(_) => DataType::Date,
            Self::Time(_) => DataType::Time,
            Self::Array(_) => DataType::Array,
            Self::Structure(_) => DataType::Structure,
            Self::CompactArray(_) => DataType::CompactArray,
        }
    }

    /// Parse a tagged data value.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        let data_type = match DataType::try_from(tag) {
            Ok(dt) => dt,
            Err(_) => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Tag,
                )));
            }
        };
        Self::parse_body(data_type, input)
    }

    fn parse_body(data_type: DataType, input: &[u8]) -> IResult<&[u8], Self> {
        Ok(match data_type {
            DataType::Null => (input, Self::Null),
            DataType::Bool => {
                let (input, b) = u8(input)?;
                (input, Self::Bool(b != 0))
            }
            DataType::BitString => {
                let (input, bits) = BitString::parse_body(input)?;
                (input, Self::BitString(bits))
            }
            DataType::DoubleLong => {
                let (input, n) = be_i32(input)?;
                (input, Self::DoubleLong(n))
            }
            DataType::DoubleLongUnsigned => {
                let (input, n) = be_u32(input)?;
                (input, Self::DoubleLongUnsigned(n))
            }
            DataType::OctetString => {
                let (input, len) = parse_length(input)?;
                let (input, bytes) = take(len)(input)?;
                (input, Self::OctetString(bytes.to_vec()))
            }
            DataType::VisibleString => {
                let (input, s) = parse_string(input)?;
                (input, Self::VisibleString(s))
            }
            DataType::Utf8String => {
                let (input, s) = parse_string(input)?;
                (input, Self::Utf8String(s))
            }
            DataType::BinaryCodedDecimal => {
                let (input, n) = u8(input)?;
                (input, Self::Bcd(n))
            }
            DataType::Integer => {
                let (input, n) = i8(input)?;
                (input, Self::Integer(n))
            }
            DataType::Long => {
                let (input, n) = be_i16(input)?;
                (input, Self::Long(n))
            }
            DataType::Unsigned => {
                let (input, n) = u8(input)?;
                (input, Self::Unsigned(n))
            }
            DataType::LongUnsigned => {
                let (input, n) = be_u16(input)?;
                (input, Self::LongUnsigned(n))
            }
            DataType::Long64 => {
                let (input, n) = be_i64(input)?;
                (input, Self::Long64(n))
            }
            DataType::Long64Unsigned => {
                let (input, n) = be_u64(input)?;
                (input, Self::Long64Unsigned(n))
            }
            DataType::Enum => {
                let (input, n) = u8(input)?;
                (input, Self::Enum(n))
            }
            DataType::Float32 => {
                let (input, n) = be_f32(input)?;
                (input, Self::Float32(n))
            }
            DataType::Float64 => {
                let (input, n) = be_f64(input)?;
                (input, Self::Float64(n))
            }
            DataType::DateTime => {
                let (input, dt) = DateTime::parse(input)?;
                (input, Self::DateTime(dt))
            }
            DataType::Date => {
                let (input, date) = Date::parse(input)?;
                (input, Self::Date(date))
            }
            DataType::Time => {
                let (input, time) = Time::parse(input)?;
                (input, Self::Time(time))
            }
            DataType::Array => {
                let (input, items) = parse_elements(input)?;
                (input, Self::Array(items))
            }
            DataType::Structure => {
                let (input, items) = parse_elements(input)?;
                (input, Self::Structure(items))
            }
            DataType::CompactArray => {
                let (input, array) = CompactArray::parse_body(input)?;
                (input, Self::CompactArray(array))
            }
        })
    }

    /// Parse one packed (tagless) element according to a type descriptor.
    fn parse_packed<'i>(descriptor: &TypeDescriptor, input: &'i [u8]) -> IResult<&'i [u8], Self> {
        match descriptor {
            TypeDescriptor::Simple(dt) => Self::parse_body(*dt, input),
            TypeDescriptor::Array { count, element } => {
                let mut items = Vec::with_capacity((*count as usize).min(64));
                let mut rest = input;
                for _ in 0..*count {
                    let (r, item) = Self::parse_packed(element, rest)?;
                    items.push(item);
                    rest = r;
                }
                Ok((rest, Self::Array(items)))
            }
            TypeDescriptor::Structure(members) => {
                let mut items = Vec::with_capacity(members.len());
                let mut rest = input;
                for member in members {
                    let (r, item) = Self::parse_packed(member, rest)?;
                    items.push(item);
                    rest = r;
                }
                Ok((rest, Self::Structure(items)))
            }
        }
    }

    /// Encode to canonical A-XDR (tag + body, minimal length forms).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.push(&mut buf);
        buf
    }

    pub(crate) fn push(&self, buf: &mut Vec<u8>) {
        buf.push(self.data_type() as u8);
        self.push_body(buf);
    }

    fn push_body(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Null => {}
            Self::Bool(b) => buf.push_u8(*b as u8),
            Self::BitString(bits) => bits.push_body(buf),
            Self::DoubleLong(n) => buf.push_i32(*n),
            Self::DoubleLongUnsigned(n) => buf.push_u32(*n),
            Self::OctetString(bytes) => {
                push_length(buf, bytes.len());
                buf.push_bytes(bytes);
            }
            Self::VisibleString(s) | Self::Utf8String(s) => {
                push_length(buf, s.len());
                buf.push_bytes(s.as_bytes());
            }
            Self::Bcd(n) => buf.push_u8(*n),
            Self::Integer(n) => buf.push_i8(*n),
            Self::Long(n) => buf.push_i16(*n),
            Self::Unsigned(n) => buf.push_u8(*n),
            Self::LongUnsigned(n) => buf.push_u16(*n),
            Self::Long64(n) => buf.push_i64(*n),
            Self::Long64Unsigned(n) => buf.push_u64(*n),
            Self::Enum(n) => buf.push_u8(*n),
            Self::Float32(n) => buf.push_u32(n.to_bits()),
            Self::Float64(n) => buf.push_u64(n.to_bits()),
            Self::DateTime(dt) => buf.push_bytes(&dt.encode()),
            Self::Date(date) => buf.push_bytes(&date.encode()),
            Self::Time(time) => buf.push_bytes(&time.encode()),
            Self::Array(items) | Self::Structure(items) => {
                push_length(buf, items.len());
                for item in items {
                    item.push(buf);
                }
            }
            Self::CompactArray(array) => array.push_body(buf),
        }
    }

    /// Packed (tagless) encoding used inside compact arrays.
    fn push_packed(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Array(items) | Self::Structure(items) => {
                for item in items {
                    item.push_packed(buf);
                }
            }
            other => other.push_body(buf),
        }
    }

    /// Size of `encode()` output, for pre-allocation.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::Bool(_) | Self::Bcd(_) | Self::Integer(_) | Self::Unsigned(_)
            | Self::Enum(_) => 1,
            Self::Long(_) | Self::LongUnsigned(_) => 2,
            Self::DoubleLong(_) | Self::DoubleLongUnsigned(_) | Self::Float32(_) => 4,
            Self::Long64(_) | Self::Long64Unsigned(_) | Self::Float64(_) => 8,
            Self::BitString(bits) => length_size(bits.bit_length()) + bits.as_bytes().len(),
            Self::OctetString(bytes) => length_size(bytes.len()) + bytes.len(),
            Self::VisibleString(s) | Self::Utf8String(s) => length_size(s.len()) + s.len(),
            Self::DateTime(_) => 12,
            Self::Date(_) => 5,
            Self::Time(_) => 4,
            Self::Array(items) | Self::Structure(items) => {
                length_size(items.len()) + items.iter().map(Self::encoded_len).sum::<usize>()
            }
            // Lower bound; exact packed size is not worth computing twice.
            Self::CompactArray(array) => {
                2 + array.elements().iter().map(Self::encoded_len).sum::<usize>()
            }
        }
    }

    /// Decode a single data value, returning the tree and the number of
    /// consumed bytes.
    pub fn decode(input: &[u8]) -> Result<(Self, usize), crate::Error> {
        match input.first() {
            None => Err(crate::Error::Malformed),
            Some(&tag) if DataType::try_from(tag).is_err() => Err(crate::Error::UnknownTag(tag)),
            Some(_) => match Self::parse(input) {
                Ok((rest, data)) => Ok((data, input.len() - rest.len())),
                Err(_) => Err(crate::Error::Malformed),
            },
        }
    }
}

fn parse_string(input: &[u8]) -> IResult<&[u8], String> {
    let (input, len) = parse_length(input)?;
    let (rest, bytes) = take(len)(input)?;
    match String::from_utf8(bytes.to_vec()) {
        Ok(s) => Ok((rest, s)),
        Err(_) => {
            Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))
        }
    }
}

fn parse_elements(input: &[u8]) -> IResult<&[u8], Vec<Data>> {
    let (input, n) = parse_length(input)?;
    let mut items = Vec::with_capacity(n.min(64));
    let mut rest = input;
    for _ in 0..n {
        let (r, item) = Data::parse(rest)?;
        items.push(item);
        rest = r;
    }
    Ok((rest, items))
}
