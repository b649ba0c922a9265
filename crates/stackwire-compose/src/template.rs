//! `sub` interpolation strings, parsed with `nom`.
//!
//! A template mixes text with `${...}` placeholders:
//!
//! - `${import:<export>}`: a cross-stack export
//! - `${param:<name>}`: a stack parameter
//! - `${<resource>.<attribute>}`: a local resource attribute
//!
//! `$${` produces a literal `${`. A template is parsed once, at load time,
//! into a [`Value::Join`]; templates without placeholders become literals.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::char,
    combinator::{map, not, value},
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated},
};
use stackwire_common::error::{Result, StackwireError};

use crate::model::{Reference, Value};

#[derive(Debug, Clone)]
enum Fragment<'a> {
    Text(&'a str),
    Escaped,
    Placeholder(Reference),
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(is_name_char).parse(input)
}

fn reference_body(input: &str) -> IResult<&str, Reference> {
    alt((
        map(preceded(tag("import:"), name), |n: &str| Reference::import(n)),
        map(preceded(tag("param:"), name), |n: &str| Reference::parameter(n)),
        map(separated_pair(name, char('.'), name), |(resource, attribute)| {
            Reference::attribute(resource, attribute)
        }),
    ))
    .parse(input)
}

fn placeholder(input: &str) -> IResult<&str, Reference> {
    delimited(tag("${"), reference_body, char('}')).parse(input)
}

fn fragment(input: &str) -> IResult<&str, Fragment<'_>> {
    alt((
        value(Fragment::Escaped, tag("$${")),
        map(placeholder, Fragment::Placeholder),
        map(is_not("$"), Fragment::Text),
        map(terminated(tag("$"), not(char('{'))), Fragment::Text),
    ))
    .parse(input)
}

/// Parses a `sub` template into a value.
///
/// # Errors
///
/// Returns an error if a placeholder is malformed or unterminated.
pub fn parse_sub(input: &str) -> Result<Value> {
    let (rest, fragments) = many0(fragment)
        .parse(input)
        .map_err(|e| template_err(input, &format!("{e:?}")))?;
    if !rest.is_empty() {
        return Err(template_err(input, &format!("malformed placeholder at \"{rest}\"")));
    }

    let mut parts = Vec::new();
    let mut text = String::new();
    for fragment in fragments {
        match fragment {
            Fragment::Text(chunk) => text.push_str(chunk),
            Fragment::Escaped => text.push_str("${"),
            Fragment::Placeholder(reference) => {
                if !text.is_empty() {
                    parts.push(Value::from(std::mem::take(&mut text)));
                }
                parts.push(Value::Ref(reference));
            }
        }
    }

    if parts.is_empty() {
        return Ok(Value::from(text));
    }
    if !text.is_empty() {
        parts.push(Value::from(text));
    }
    Ok(Value::Join(parts))
}

fn template_err(input: &str, detail: &str) -> StackwireError {
    StackwireError::Config {
        message: format!("invalid sub template \"{input}\": {detail}"),
    }
}
