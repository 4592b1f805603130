//! ACTION service APDUs.
//!
//! Tags: ACTION-Request 0xC3, ACTION-Response 0xC7.
//!
//! Reference: DLMS Green Book Ed. 12, Tables 73-74.

use alloc::vec::Vec;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    combinator::fail,
    number::streaming::{be_u32, u8},
};

use crate::cosem::CosemMethod;
use crate::data::{Data, ByteWriter, parse_length, push_length};
use crate::get::GetDataResult;

pub const ACTION_REQUEST_TAG: u8 = 0xc3;
pub const ACTION_RESPONSE_TAG: u8 = 0xc7;

/// ACTION-Request choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ActionRequest {
    /// Invoke a single method (choice 1).
    Normal(ActionRequestNormal),
    /// Ask for the next block of a long response (choice 2).
    NextPBlock(ActionRequestNextPBlock),
    /// Invoke several methods at once (choice 3).
    WithList(ActionRequestWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionRequestNormal {
    pub invoke_id: u8,
    pub method: CosemMethod,
    pub parameters: Option<Data>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionRequestNextPBlock {
    pub invoke_id: u8,
    pub block_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionRequestWithList {
    pub invoke_id: u8,
    pub methods: Vec<CosemMethod>,
    pub parameters: Vec<Option<Data>>,
}

impl ActionRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(ACTION_REQUEST_TAG);

        match self {
            Self::Normal(req) => {
                buf.push(0x01);
                buf.push(req.invoke_id);
                req.method.push(&mut buf);
                match &req.parameters {
                    Some(parameters) => {
                        buf.push(0x01);
                        parameters.push(&mut buf);
                    }
                    None => buf.push(0x00),
                }
            }
            Self::NextPBlock(req) => {
                buf.push(0x02);
                buf.push(req.invoke_id);
                buf.push_u32(req.block_number);
            }
            Self::WithList(req) => {
                buf.push(0x03);
                buf.push(req.invoke_id);
                push_length(&mut buf, req.methods.len());
                for method in &req.methods {
                    method.push(&mut buf);
                }
                push_length(&mut buf, req.parameters.len());
                for parameters in &req.parameters {
                    match parameters {
                        Some(parameters) => {
                            buf.push(0x01);
                            parameters.push(&mut buf);
                        }
                        None => buf.push(0x00),
                    }
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != ACTION_REQUEST_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, method) = CosemMethod::parse(input)?;
                let (input, parameters) = parse_optional_data(input)?;
                Ok((input, Self::Normal(ActionRequestNormal { invoke_id, method, parameters })))
            }
            0x02 => {
                let (input, block_number) = be_u32(input)?;
                Ok((input, Self::NextPBlock(ActionRequestNextPBlock { invoke_id, block_number })))
            }
            0x03 => {
                let (input, count) = parse_length(input)?;
                let mut methods = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, method) = CosemMethod::parse(rest)?;
                    methods.push(method);
                    rest = r;
                }
                let (rest2, count) = parse_length(rest)?;
                let mut parameters = Vec::with_capacity(count.min(16));
                let mut rest = rest2;
                for _ in 0..count {
                    let (r, p) = parse_optional_data(rest)?;
                    parameters.push(p);
                    rest = r;
                }
                Ok((rest, Self::WithList(ActionRequestWithList { invoke_id, methods, parameters })))
            }
            _ => fail().parse(input),
        }
    }
}

fn parse_optional_data(input: &[u8]) -> IResult<&[u8], Option<Data>> {
    let (input, present) = u8(input)?;
    match present {
        0x00 => Ok((input, None)),
        _ => {
            let (input, data) = Data::parse(input)?;
            Ok((input, Some(data)))
        }
    }
}

/// Method invocation outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ActionResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongActionAborted = 15,
    NoLongActionInProgress = 16,
    OtherReason = 250,
}

impl ActionResult {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, code) = u8(input)?;
        match Self::try_from(code) {
            Ok(result) => Ok((input, result)),
            Err(_) => fail().parse(input),
        }
    }
}

/// ACTION-Response choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ActionResponse {
    /// Single method result (choice 1).
    Normal(ActionResponseNormal),
    /// One block of a long result (choice 2).
    WithPBlock(ActionResponseWithPBlock),
    /// One result per invoked method (choice 3).
    WithList(ActionResponseWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionResponseNormal {
    pub invoke_id: u8,
    pub result: ActionResult,
    /// Optional return parameters, present on success when the method
    /// produces data.
    pub return_parameters: Option<GetDataResult>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionResponseWithPBlock {
    pub invoke_id: u8,
    pub last_block: bool,
    pub block_number: u32,
    pub raw_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionResponseWithList {
    pub invoke_id: u8,
    pub results: Vec<ActionResponseNormalResult>,
}

/// One entry of an ACTION-Response-With-List.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActionResponseNormalResult {
    pub result: ActionResult,
    pub return_parameters: Option<GetDataResult>,
}

fn push_action_result(buf: &mut Vec<u8>, result: ActionResult, ret: &Option<GetDataResult>) {
    buf.push(result as u8);
    match ret {
        Some(GetDataResult::Data(data)) => {
            buf.push(0x01);
            buf.push(0x00);
            data.push(buf);
        }
        Some(GetDataResult::DataAccessError(error)) => {
            buf.push(0x01);
            buf.push(0x01);
            buf.push(*error as u8);
        }
        None => buf.push(0x00),
    }
}

fn parse_action_result(input: &[u8]) -> IResult<&[u8], (ActionResult, Option<GetDataResult>)> {
    let (input, result) = ActionResult::parse(input)?;
    let (input, present) = u8(input)?;
    match present {
        0x00 => Ok((input, (result, None))),
        _ => {
            let (input, ret) = GetDataResult::parse(input)?;
            Ok((input, (result, Some(ret))))
        }
    }
}

impl ActionResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(ACTION_RESPONSE_TAG);

        match self {
            Self::Normal(resp) => {
                buf.push(0x01);
                buf.push(resp.invoke_id);
                push_action_result(&mut buf, resp.result, &resp.return_parameters);
            }
            Self::WithPBlock(resp) => {
                buf.push(0x02);
                buf.push(resp.invoke_id);
                buf.push(resp.last_block as u8);
                buf.push_u32(resp.block_number);
                push_length(&mut buf, resp.raw_data.len());
                buf.push_bytes(&resp.raw_data);
            }
            Self::WithList(resp) => {
                buf.push(0x03);
                buf.push(resp.invoke_id);
                push_length(&mut buf, resp.results.len());
                for entry in &resp.results {
                    push_action_result(&mut buf, entry.result, &entry.return_parameters);
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != ACTION_RESPONSE_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, (result, return_parameters)) = parse_action_result(input)?;
                Ok((
                    input,
                    Self::Normal(ActionResponseNormal { invoke_id, result, return_parameters }),
                ))
            }
            0x02 => {
                let (input, last_block) = u8(input)?;
                let (input, block_number) = be_u32(input)?;
                let (input, len) = parse_length(input)?;
                let (input, raw) = nom::bytes::streaming::take(len)(input)?;
                Ok((
                    input,
                    Self::WithPBlock(ActionResponseWithPBlock {
                        invoke_id,
                        last_block: last_block != 0,
                        block_number,
                        raw_data: raw.to_vec(),
                    }),
                ))
            }
            0x03 => {
                let (input, count) = parse_length(input)?;
                let mut results = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, (result, return_parameters)) = parse_action_result(rest)?;
                    results.push(ActionResponseNormalResult { result, return_parameters });
                    rest = r;
                }
                Ok((rest, Self::WithList(ActionResponseWithList { invoke_id, results })))
            }
            _ => fail().parse(input),
        }
    }
}
