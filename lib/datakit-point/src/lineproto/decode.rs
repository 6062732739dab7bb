use std::time::{SystemTime, UNIX_EPOCH};

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, i64 as parse_i64},
    combinator::{opt, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    number::complete::recognize_float,
    sequence::{preceded, separated_pair},
    IResult, Parser as _,
};
use snafu::{ResultExt as _, Snafu};

use super::{KEY_SPECIALS, LEADING_NAME_SPECIALS, NAME_SPECIALS};
use crate::{FieldValue, Point, PointError};

const SNIPPET_LEN: usize = 64;

/// Line protocol decoding error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ParseError {
    #[snafu(display("malformed line protocol at byte {}: '{}'", offset, snippet))]
    Malformed { offset: usize, snippet: String },

    #[snafu(display("invalid point at byte {}", offset))]
    InvalidPoint { offset: usize, source: PointError },
}

struct RawPoint {
    name: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    time: Option<i64>,
}

/// Parses newline-separated points.
///
/// Points without a timestamp are stamped with the current time.
///
/// # Errors
///
/// If any line is malformed, or describes an invalid point, an error is returned and no points are produced.
pub fn parse(input: &str) -> Result<Vec<Point>, ParseError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default();
    parse_with_default_time(input, now)
}

/// Parses newline-separated points, stamping points that lack a timestamp with `default_time`.
///
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
///
/// If any line is malformed, or describes an invalid point, an error is returned and no points are produced.
pub fn parse_with_default_time(input: &str, default_time: i64) -> Result<Vec<Point>, ParseError> {
    let mut points = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(['\n', '\r', ' ', '\t']);
        if rest.is_empty() {
            break;
        }

        let offset = input.len() - rest.len();
        if rest.starts_with('#') {
            rest = rest.find('\n').map_or("", |idx| &rest[idx..]);
            continue;
        }

        let (remaining, raw) = match raw_point(rest) {
            Ok((remaining, raw)) if at_line_end(remaining) => (remaining, raw),
            _ => return Err(malformed(rest, offset)),
        };

        let mut builder = Point::builder(raw.name).with_time(raw.time.unwrap_or(default_time));
        for (key, value) in raw.tags {
            builder = builder.with_tag(key, value);
        }
        for (key, value) in raw.fields {
            builder = builder.with_field(key, value);
        }
        points.push(builder.build().context(InvalidPoint { offset })?);

        rest = remaining;
    }

    Ok(points)
}

fn malformed(rest: &str, offset: usize) -> ParseError {
    let line = rest.split('\n').next().unwrap_or_default();
    ParseError::Malformed {
        offset,
        snippet: line.chars().take(SNIPPET_LEN).collect(),
    }
}

fn at_line_end(input: &str) -> bool {
    input.is_empty() || input.starts_with('\n') || input.starts_with("\r\n")
}

fn raw_point(input: &str) -> IResult<&str, RawPoint> {
    let (input, name) = name(input)?;
    let (input, tags) = many0(preceded(char(','), separated_pair(key, char('='), key))).parse(input)?;
    let (input, fields) =
        preceded(char(' '), separated_list1(char(','), separated_pair(key, char('='), field_value))).parse(input)?;
    let (input, time) = opt(preceded(char(' '), parse_i64)).parse(input)?;

    Ok((
        input,
        RawPoint {
            name,
            tags,
            fields,
            time,
        },
    ))
}

fn name(input: &str) -> IResult<&str, String> {
    let leading = input
        .strip_prefix('\\')
        .and_then(|rest| rest.chars().next())
        .filter(|c| LEADING_NAME_SPECIALS.contains(c));

    match leading {
        Some(c) => {
            let input = &input[1 + c.len_utf8()..];
            let mut name = String::from(c);
            // The escaped character alone is a valid name.
            match escaped(input, NAME_SPECIALS, &[',', ' ']) {
                Ok((input, rest)) => {
                    name.push_str(&rest);
                    Ok((input, name))
                }
                Err(_) => Ok((input, name)),
            }
        }
        None => escaped(input, NAME_SPECIALS, &[',', ' ']),
    }
}

fn key(input: &str) -> IResult<&str, String> {
    escaped(input, KEY_SPECIALS, &[',', '=', ' '])
}

/// Takes a non-empty run of characters up to an unescaped stop character or line break, unescaping `specials`.
fn escaped<'a>(input: &'a str, specials: &[char], stops: &[char]) -> IResult<&'a str, String> {
    let mut out = String::new();
    let mut end = input.len();
    let mut chars = input.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            if let Some(&(_, next)) = chars.peek() {
                if specials.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
            out.push(c);
        } else if stops.contains(&c) || c == '\n' || c == '\r' {
            end = idx;
            break;
        } else {
            out.push(c);
        }
    }

    if out.is_empty() {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::TakeWhile1)));
    }
    Ok((&input[end..], out))
}

fn field_value(input: &str) -> IResult<&str, FieldValue> {
    alt((
        string_value,
        value(FieldValue::Bool(true), tag("true")),
        value(FieldValue::Bool(false), tag("false")),
        number_value,
    ))
    .parse(input)
}

fn string_value(input: &str) -> IResult<&str, FieldValue> {
    let (body, _) = char('"').parse(input)?;
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[idx + 1..], FieldValue::String(out))),
            '\\' => match chars.next() {
                Some((_, next @ ('"' | '\\'))) => out.push(next),
                Some((_, next)) => {
                    out.push('\\');
                    out.push(next);
                }
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn number_value(input: &str) -> IResult<&str, FieldValue> {
    let (rest, text) = recognize_float(input)?;
    let invalid = || nom::Err::Error(Error::new(input, ErrorKind::Digit));

    if let Some(rest) = rest.strip_prefix('i') {
        let v = text.parse::<i64>().map_err(|_| invalid())?;
        Ok((rest, FieldValue::Int(v)))
    } else if let Some(rest) = rest.strip_prefix('u') {
        let v = text.parse::<u64>().map_err(|_| invalid())?;
        Ok((rest, FieldValue::UInt(v)))
    } else {
        let v = text.parse::<f64>().map_err(|_| invalid())?;
        Ok((rest, FieldValue::Float(v)))
    }
}
