//! Binary class container.
//!
//! ```text
//! class     ::= magic version access:u16 name super:opt(name)
//!               interfaces:vec(name) methods:vec(method)
//! method    ::= access:u16 name descriptor:name max_locals:u16 size:u32 code
//! code      ::= instrs:vec(instr) handlers:vec(try_catch)
//! try_catch ::= start:label end:label handler:label catch_type:opt(name)
//! ```
//!
//! Integers are LEB128 encoded like in the WebAssembly binary format, names
//! are length-prefixed UTF-8 and labels are `u32` ids. Instructions are one
//! opcode byte followed by inline operands; see `opcodes`.

use nom::bytes::complete::{tag, take};
use nom::combinator::all_consuming;
use nom::error::{context, ErrorKind, ParseError, VerboseError, VerboseErrorKind};
use nom::number::complete::{le_u32, le_u64};
use nom::{IResult, Offset};
use thiserror::Error;

use resumable_structure::classes::{Class, Code, Method, TryCatchBlock};
use resumable_structure::instructions::{Constant, FieldRef, Instr, Label, MethodRef};
use resumable_structure::types::{ArrayKind, Slot};

pub mod opcodes;
mod emit;
mod table;

pub use emit::encode_class;

pub const MAGIC: &[u8] = b"\0rcf";
pub const VERSION: &[u8] = &[0x01, 0x00, 0x00, 0x00];

pub(crate) type Inp<'a> = &'a [u8];
pub(crate) type PResult<'a, O> = IResult<Inp<'a>, O, VerboseError<Inp<'a>>>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("malformed class container at byte {offset}: {reason}")]
pub struct DecodeError {
    pub offset: usize,
    pub reason: String,
    /// Innermost first.
    pub contexts: Vec<&'static str>,
}

impl DecodeError {
    fn from_nom(original: &[u8], err: nom::Err<VerboseError<Inp>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => DecodeError {
                offset: original.len(),
                reason: "unexpected end of input".to_string(),
                contexts: vec![],
            },
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let offset = e.errors.first().map(|(i, _)| original.offset(i)).unwrap_or(0);
                let mut reason = None;
                let mut contexts = vec![];
                for (_, kind) in &e.errors {
                    match kind {
                        VerboseErrorKind::Context(c) => contexts.push(*c),
                        VerboseErrorKind::Char(c) => {
                            reason.get_or_insert_with(|| format!("expected `{}`", c));
                        }
                        VerboseErrorKind::Nom(k) => {
                            reason.get_or_insert_with(|| describe(*k).to_string());
                        }
                    }
                }
                DecodeError {
                    offset,
                    reason: reason.unwrap_or_else(|| "invalid input".to_string()),
                    contexts,
                }
            }
        }
    }
}

fn describe(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Eof => "unexpected end of input",
        ErrorKind::Tag => "unexpected bytes",
        ErrorKind::Verify => "integer out of range",
        ErrorKind::Char => "invalid UTF-8 in name",
        ErrorKind::Switch => "unknown opcode",
        ErrorKind::Alt => "invalid tag",
        ErrorKind::LengthValue => "length prefix does not match contents",
        _ => "invalid input",
    }
}

pub fn decode_class(bytes: &[u8]) -> Result<Class, DecodeError> {
    all_consuming(parse_class)(bytes)
        .map(|(_, class)| class)
        .map_err(|e| DecodeError::from_nom(bytes, e))
}

pub(crate) fn fail<O>(input: Inp, kind: ErrorKind) -> PResult<O> {
    Err(nom::Err::Error(VerboseError::from_error_kind(input, kind)))
}

// Vectors

pub(crate) fn parse_vec<'a, B, F>(input: Inp<'a>, mut parse_b: F) -> PResult<'a, Vec<B>>
    where F: FnMut(Inp<'a>) -> PResult<'a, B>
{
    let (mut input, n) = parse_u32(input)?;
    let mut res = Vec::new();
    for _ in 0..n {
        let (rest, b) = parse_b(input)?;
        res.push(b);
        input = rest;
    }
    Ok((input, res))
}

pub(crate) fn parse_opt<'a, B, F>(input: Inp<'a>, parse_b: F) -> PResult<'a, Option<B>>
    where F: FnOnce(Inp<'a>) -> PResult<'a, B>
{
    let (rest, flag) = parse_byte(input)?;
    match flag {
        0x00 => Ok((rest, None)),
        0x01 => parse_b(rest).map(|(i, b)| (i, Some(b))),
        _ => fail(input, ErrorKind::Alt),
    }
}

// Bytes

pub(crate) fn parse_byte(input: Inp) -> PResult<u8> {
    nom::number::complete::u8(input)
}

// Integers

#[allow(non_snake_case)]
pub(crate) fn parse_uN(input: Inp, N: u32) -> PResult<u64> {
    let (rest, n) = parse_byte(input)?;
    let n = u64::from(n);
    if n < (1 << 7) && u128::from(n) < (1u128 << N) {
        // n < 2^7 ∧ n < 2^N
        Ok((rest, n))
    } else if n >= (1 << 7) && N > 7 {
        // n ≥ 2^7 ∧ N > 7
        let (rest, m) = parse_uN(rest, N - 7)?;
        Ok((rest, (1 << 7) * m + (n - (1 << 7))))
    } else {
        fail(input, ErrorKind::Verify)
    }
}

#[allow(non_snake_case)]
pub(crate) fn parse_sN(input: Inp, N: u32) -> PResult<i64> {
    let (rest, n) = parse_byte(input)?;
    let n = i64::from(n);
    let v2N1 = 1i128 << (N - 1);
    if n < (1 << 6) && i128::from(n) < v2N1 {
        // n < 2^6 ∧ n < 2^(N-1)
        Ok((rest, n))
    } else if (1 << 6) <= n && n < (1 << 7) && i128::from(n) >= (1i128 << 7) - v2N1 {
        // 2^6 ≤ n < 2^7 ∧ n ≥ 2^7 - 2^(N-1)
        Ok((rest, n - (1 << 7)))
    } else if n >= (1 << 7) && N > 7 {
        // n ≥ 2^7 ∧ N > 7
        let (rest, m) = parse_sN(rest, N - 7)?;
        Ok((rest, (1 << 7) * m + (n - (1 << 7))))
    } else {
        fail(input, ErrorKind::Verify)
    }
}

pub(crate) fn parse_u16(input: Inp) -> PResult<u16> {
    parse_uN(input, 16).map(|(i, n)| (i, n as u16))
}

pub(crate) fn parse_u32(input: Inp) -> PResult<u32> {
    parse_uN(input, 32).map(|(i, n)| (i, n as u32))
}

pub(crate) fn parse_s16(input: Inp) -> PResult<i16> {
    parse_sN(input, 16).map(|(i, n)| (i, n as i16))
}

pub(crate) fn parse_s32(input: Inp) -> PResult<i32> {
    parse_sN(input, 32).map(|(i, n)| (i, n as i32))
}

pub(crate) fn parse_s64(input: Inp) -> PResult<i64> {
    parse_sN(input, 64)
}

// Floating-Point

pub(crate) fn parse_f32(input: Inp) -> PResult<f32> {
    le_u32(input).map(|(i, bits)| (i, f32::from_bits(bits)))
}

pub(crate) fn parse_f64(input: Inp) -> PResult<f64> {
    le_u64(input).map(|(i, bits)| (i, f64::from_bits(bits)))
}

// Names

pub(crate) fn parse_name(input: Inp) -> PResult<String> {
    let (rest, n) = parse_u32(input)?;
    let (rest, bytes) = take(n as usize)(rest)?;
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok((rest, s.to_string())),
        Err(_) => fail(input, ErrorKind::Char),
    }
}

// Indices

pub(crate) fn parse_slot(input: Inp) -> PResult<Slot> {
    parse_u16(input)
}

pub(crate) fn parse_label(input: Inp) -> PResult<Label> {
    parse_u32(input).map(|(i, n)| (i, Label(n)))
}

pub(crate) fn parse_field_ref(input: Inp) -> PResult<FieldRef> {
    let (input, owner) = parse_name(input)?;
    let (input, name) = parse_name(input)?;
    let (input, descriptor) = parse_name(input)?;
    Ok((input, FieldRef { owner, name, descriptor }))
}

pub(crate) fn parse_method_ref(input: Inp) -> PResult<MethodRef> {
    let (input, owner) = parse_name(input)?;
    let (input, name) = parse_name(input)?;
    let (input, descriptor) = parse_name(input)?;
    Ok((input, MethodRef { owner, name, descriptor }))
}

// Instructions

fn parse_constant(input: Inp) -> PResult<Constant> {
    let (rest, t) = parse_byte(input)?;
    match t {
        opcodes::TAG_INT => parse_s32(rest).map(|(i, v)| (i, Constant::Int(v))),
        opcodes::TAG_FLOAT => parse_f32(rest).map(|(i, v)| (i, Constant::Float(v))),
        opcodes::TAG_LONG => parse_s64(rest).map(|(i, v)| (i, Constant::Long(v))),
        opcodes::TAG_DOUBLE => parse_f64(rest).map(|(i, v)| (i, Constant::Double(v))),
        opcodes::TAG_STRING => parse_name(rest).map(|(i, v)| (i, Constant::String(v))),
        opcodes::TAG_CLASS => parse_name(rest).map(|(i, v)| (i, Constant::Class(v))),
        _ => fail(input, ErrorKind::Alt),
    }
}

fn parse_table_switch(input: Inp) -> PResult<Instr> {
    let (i, low) = parse_s32(input)?;
    let (i, high) = parse_s32(i)?;
    let (i, default) = parse_label(i)?;
    let (i, targets) = parse_vec(i, parse_label)?;
    if i64::from(high) - i64::from(low) + 1 != targets.len() as i64 {
        return fail(input, ErrorKind::LengthValue);
    }
    Ok((i, Instr::TableSwitch { low, high, default, targets }))
}

fn parse_lookup_switch(input: Inp) -> PResult<Instr> {
    let (i, default) = parse_label(input)?;
    let (i, pairs) = parse_vec(i, |i| {
        let (i, key) = parse_s32(i)?;
        let (i, l) = parse_label(i)?;
        Ok((i, (key, l)))
    })?;
    Ok((i, Instr::LookupSwitch { default, pairs }))
}

pub(crate) fn parse_instr(input: Inp) -> PResult<Instr> {
    use crate::opcodes::*;

    let (i, op) = parse_byte(input)?;
    if let Some(res) = table::parse_tabled(i, op) {
        return res;
    }
    match op {
        ICONST_M1..=ICONST_5 => Ok((i, Instr::IConst(i32::from(op) - i32::from(ICONST_M1) - 1))),
        ICONST_W => parse_s32(i).map(|(i, v)| (i, Instr::IConst(v))),
        LCONST_0 => Ok((i, Instr::LConst(0))),
        LCONST_1 => Ok((i, Instr::LConst(1))),
        LCONST_W => parse_s64(i).map(|(i, v)| (i, Instr::LConst(v))),
        FCONST_0 => Ok((i, Instr::FConst(0.0))),
        FCONST_1 => Ok((i, Instr::FConst(1.0))),
        FCONST_2 => Ok((i, Instr::FConst(2.0))),
        FCONST_W => parse_f32(i).map(|(i, v)| (i, Instr::FConst(v))),
        DCONST_0 => Ok((i, Instr::DConst(0.0))),
        DCONST_1 => Ok((i, Instr::DConst(1.0))),
        DCONST_W => parse_f64(i).map(|(i, v)| (i, Instr::DConst(v))),
        BIPUSH => parse_byte(i).map(|(i, v)| (i, Instr::BiPush(v as i8))),
        SIPUSH => parse_s16(i).map(|(i, v)| (i, Instr::SiPush(v))),
        LDC => context("ldc", parse_constant)(i).map(|(i, c)| (i, Instr::Ldc(c))),
        IINC => {
            let (i, slot) = parse_slot(i)?;
            let (i, by) = parse_s16(i)?;
            Ok((i, Instr::IInc(slot, by)))
        }
        NEWARRAY => {
            let (rest, code) = parse_byte(i)?;
            match ArrayKind::from_code(code) {
                Some(kind) => Ok((rest, Instr::NewArray(kind))),
                None => fail(i, ErrorKind::Alt),
            }
        }
        MULTIANEWARRAY => {
            let (i, desc) = parse_name(i)?;
            let (i, dims) = parse_byte(i)?;
            Ok((i, Instr::MultiANewArray(desc, dims)))
        }
        TABLESWITCH => context("tableswitch", parse_table_switch)(i),
        LOOKUPSWITCH => context("lookupswitch", parse_lookup_switch)(i),
        INVOKEDYNAMIC => {
            let (i, name) = parse_name(i)?;
            let (i, descriptor) = parse_name(i)?;
            Ok((i, Instr::InvokeDynamic { name, descriptor }))
        }
        LABEL => parse_label(i).map(|(i, l)| (i, Instr::Label(l))),
        _ => fail(input, ErrorKind::Switch),
    }
}

// Methods

fn parse_try_catch(input: Inp) -> PResult<TryCatchBlock> {
    let (i, start) = parse_label(input)?;
    let (i, end) = parse_label(i)?;
    let (i, handler) = parse_label(i)?;
    let (i, catch_type) = parse_opt(i, parse_name)?;
    Ok((i, TryCatchBlock { start, end, handler, catch_type }))
}

fn parse_code(input: Inp) -> PResult<Code> {
    let (i, instrs) = parse_vec(input, |i| context("instruction", parse_instr)(i))?;
    let (i, try_catch) = parse_vec(i, |i| context("try-catch block", parse_try_catch)(i))?;
    Ok((i, Code { instrs, try_catch }))
}

fn parse_method(input: Inp) -> PResult<Method> {
    let (i, access) = parse_u16(input)?;
    let (i, name) = context("method name", parse_name)(i)?;
    let (i, descriptor) = context("method descriptor", parse_name)(i)?;
    let (i, max_locals) = parse_u16(i)?;
    let (i, size) = parse_u32(i)?;
    let (i, body) = context("code", take(size as usize))(i)?;
    let (_, code) = all_consuming(parse_code)(body)?;
    Ok((i, Method { access, name, descriptor, max_locals, code }))
}

// Classes

fn parse_class(input: Inp) -> PResult<Class> {
    let (i, _) = context("magic", tag(MAGIC))(input)?;
    let (i, _) = context("version", tag(VERSION))(i)?;
    let (i, access) = parse_u16(i)?;
    let (i, name) = context("class name", parse_name)(i)?;
    let (i, super_name) = parse_opt(i, parse_name)?;
    let (i, interfaces) = parse_vec(i, parse_name)?;
    let (i, methods) = parse_vec(i, |i| context("method", parse_method)(i))?;
    Ok((i, Class { access, name, super_name, interfaces, methods }))
}

#[cfg(test)]
#[path = "tests_binary_format.rs"]
mod tests;
