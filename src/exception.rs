//! ExceptionResponse APDU (tag 0xD8).
//!
//! Sent by a server instead of a service response when the request cannot be
//! processed at all (wrong state, unsupported service, broken ciphering).

use alloc::vec::Vec;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{IResult, Parser, combinator::fail, number::streaming::u8};

pub const EXCEPTION_RESPONSE_TAG: u8 = 0xd8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum StateError {
    ServiceNotAllowed = 1,
    ServiceUnknown = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ServiceError {
    OperationNotPossible = 1,
    ServiceNotSupported = 2,
    OtherReason = 3,
    PduTooLong = 4,
    DecipheringError = 5,
    InvocationCounterError = 6,
}

/// Server-side exception report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExceptionResponse {
    pub state_error: StateError,
    pub service_error: ServiceError,
}

impl ExceptionResponse {
    pub fn encode(&self) -> Vec<u8> {
        alloc::vec![EXCEPTION_RESPONSE_TAG, self.state_error as u8, self.service_error as u8]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != EXCEPTION_RESPONSE_TAG {
            return fail().parse(input);
        }
        let (input, state) = u8(input)?;
        let (input, service) = u8(input)?;

        let (Ok(state_error), Ok(service_error)) =
            (StateError::try_from(state), ServiceError::try_from(service))
        else {
            return fail().parse(input);
        };

        Ok((input, Self { state_error, service_error }))
    }
}
