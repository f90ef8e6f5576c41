//! Field and method descriptors, in JVM notation.

use nom::branch::alt;
use nom::bytes::complete::take_till1;
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, map, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, preceded};
use nom::IResult;
use thiserror::Error;

use crate::types::TypeTag;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("malformed descriptor `{0}`")]
pub struct DescriptorError(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<TypeTag>,
    /// `None` for `void`.
    pub ret: Option<TypeTag>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        all_consuming(method_descriptor)(descriptor)
            .map(|(_, d)| d)
            .map_err(|_| DescriptorError(descriptor.to_string()))
    }

    /// Number of local slots the parameters occupy.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| if p.is_wide() { 2 } else { 1 }).sum()
    }
}

pub fn parse_field_type(descriptor: &str) -> Result<TypeTag, DescriptorError> {
    all_consuming(field_type)(descriptor)
        .map(|(_, t)| t)
        .map_err(|_| DescriptorError(descriptor.to_string()))
}

fn base_type(i: &str) -> IResult<&str, TypeTag> {
    let (i, c) = one_of("ZCBSIFJD")(i)?;
    let t = match c {
        'Z' => TypeTag::Boolean,
        'C' => TypeTag::Char,
        'B' => TypeTag::Byte,
        'S' => TypeTag::Short,
        'I' => TypeTag::Int,
        'F' => TypeTag::Float,
        'J' => TypeTag::Long,
        _ => TypeTag::Double,
    };
    Ok((i, t))
}

fn object_name(i: &str) -> IResult<&str, &str> {
    delimited(char('L'), take_till1(|c| c == ';'), char(';'))(i)
}

fn array_descriptor(i: &str) -> IResult<&str, &str> {
    recognize(preceded(
        many1(char('[')),
        alt((recognize(one_of("ZCBSIFJD")), recognize(object_name))),
    ))(i)
}

fn field_type(i: &str) -> IResult<&str, TypeTag> {
    alt((
        base_type,
        map(object_name, TypeTag::reference),
        map(array_descriptor, TypeTag::reference),
    ))(i)
}

fn method_descriptor(i: &str) -> IResult<&str, MethodDescriptor> {
    let (i, params) = delimited(char('('), many0(field_type), char(')'))(i)?;
    let (i, ret) = alt((value(None, char('V')), map(field_type, Some)))(i)?;
    Ok((i, MethodDescriptor { params, ret }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_descriptors() {
        let d = MethodDescriptor::parse("(IJ[Ljava/lang/String;Ljava/lang/Object;)D").unwrap();
        assert_eq!(d.params, vec![
            TypeTag::Int,
            TypeTag::Long,
            TypeTag::reference("[Ljava/lang/String;"),
            TypeTag::reference("java/lang/Object"),
        ]);
        assert_eq!(d.ret, Some(TypeTag::Double));
        assert_eq!(d.param_slots(), 5);

        let v = MethodDescriptor::parse("()V").unwrap();
        assert!(v.params.is_empty());
        assert_eq!(v.ret, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("()").is_err());
        assert!(MethodDescriptor::parse("(Q)V").is_err());
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
        assert!(parse_field_type("V").is_err());
        assert!(parse_field_type("II").is_err());
    }

    #[test]
    fn nested_arrays() {
        assert_eq!(parse_field_type("[[I"), Ok(TypeTag::reference("[[I")));
        assert_eq!(parse_field_type("[La/B;"), Ok(TypeTag::reference("[La/B;")));
    }
}
