use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, not, opt, peek, recognize, value},
    multi::{many0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

/// Comparison operator of a condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Match,
    NotMatch,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::In => "in",
            Op::NotIn => "notin",
            Op::Match => "match",
            Op::NotMatch => "notmatch",
        }
    }
}

/// Literal on the right-hand side of a condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawCondition {
    pub key: String,
    pub op: Op,
    pub values: Vec<Literal>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawExpr {
    Or(Vec<RawExpr>),
    And(Vec<RawExpr>),
    Condition(RawCondition),
}

/// Parses a complete filter string into its groups.
///
/// On failure, returns the byte offset at which parsing stopped.
pub fn parse_groups(input: &str) -> Result<Vec<RawExpr>, usize> {
    let offset_of = |rest: &str| input.len() - rest.len();

    let (rest, first) = ws(group).parse(input).map_err(|e| match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => offset_of(e.input),
        nom::Err::Incomplete(_) => input.len(),
    })?;

    let (rest, others) = many0(preceded(opt(ws(alt((char(';'), char(','))))), ws(group)))
        .parse(rest)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| offset_of(rest))?;

    if !rest.trim().is_empty() {
        return Err(offset_of(rest));
    }

    let mut groups = vec![first];
    groups.extend(others);
    Ok(groups)
}

fn ws<'a, O, P>(parser: P) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    P: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, parser, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Matches a keyword, case-insensitively, that is not the prefix of a longer identifier.
fn keyword<'a>(kw: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag_no_case(kw), not(peek(satisfy(is_ident_char))))
}

fn group(input: &str) -> IResult<&str, RawExpr> {
    delimited(char('{'), ws(expr), char('}')).parse(input)
}

fn expr(input: &str) -> IResult<&str, RawExpr> {
    let (input, terms) = separated_list1(ws(alt((keyword("or"), tag("||")))), term).parse(input)?;
    Ok((input, flatten(terms, RawExpr::Or)))
}

fn term(input: &str) -> IResult<&str, RawExpr> {
    let (input, factors) = separated_list1(ws(alt((keyword("and"), tag("&&")))), factor).parse(input)?;
    Ok((input, flatten(factors, RawExpr::And)))
}

fn flatten(mut exprs: Vec<RawExpr>, combine: fn(Vec<RawExpr>) -> RawExpr) -> RawExpr {
    if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        combine(exprs)
    }
}

fn factor(input: &str) -> IResult<&str, RawExpr> {
    alt((
        delimited(char('('), ws(expr), char(')')),
        map(condition, RawExpr::Condition),
    ))
    .parse(input)
}

fn condition(input: &str) -> IResult<&str, RawCondition> {
    let (input, key) = ws(key).parse(input)?;
    alt((
        map(pair(ws(list_op), list), {
            let key = key.clone();
            move |(op, values)| RawCondition {
                key: key.clone(),
                op,
                values,
            }
        }),
        map(pair(ws(compare_op), literal), move |(op, value)| RawCondition {
            key: key.clone(),
            op,
            values: vec![value],
        }),
    ))
    .parse(input)
}

fn key(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('`'), take_while1(|c: char| c != '`'), char('`')), str::to_string),
        map(
            recognize(pair(
                satisfy(|c: char| c.is_alphabetic() || c == '_'),
                take_while(is_ident_char),
            )),
            str::to_string,
        ),
    ))
    .parse(input)
}

fn compare_op(input: &str) -> IResult<&str, Op> {
    alt((
        value(Op::Eq, tag("==")),
        value(Op::Ne, tag("!=")),
        value(Op::Le, tag("<=")),
        value(Op::Ge, tag(">=")),
        value(Op::Eq, tag("=")),
        value(Op::Lt, tag("<")),
        value(Op::Gt, tag(">")),
    ))
    .parse(input)
}

fn list_op(input: &str) -> IResult<&str, Op> {
    alt((
        value(Op::In, keyword("in")),
        value(Op::NotIn, keyword("notin")),
        value(Op::Match, keyword("match")),
        value(Op::NotMatch, keyword("notmatch")),
    ))
    .parse(input)
}

fn list(input: &str) -> IResult<&str, Vec<Literal>> {
    delimited(
        char('['),
        separated_list1(char(','), ws(literal)),
        char(']'),
    )
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(single_quoted, Literal::String),
        map(double_quoted, Literal::String),
        value(Literal::Bool(true), keyword("true")),
        value(Literal::Bool(false), keyword("false")),
        value(Literal::Nil, keyword("nil")),
        number,
    ))
    .parse(input)
}

fn number(input: &str) -> IResult<&str, Literal> {
    let (rest, raw) = recognize_float(input)?;
    let literal = if raw.contains(['.', 'e', 'E']) {
        raw.parse().map(Literal::Float)
    } else {
        raw.parse()
            .map(Literal::Int)
            .or_else(|_| raw.parse().map(Literal::Float))
    };

    match literal {
        Ok(literal) => Ok((rest, literal)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '\'')
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '"')
}

/// Parses a string enclosed in `quote`, where `\` escapes the next character.
fn quoted(input: &str, quote: char) -> IResult<&str, String> {
    let (body, _) = char(quote).parse(input)?;
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((&body[idx + c.len_utf8()..], out)),
            c => out.push(c),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}
