//! S-expression reader.
//!
//! Turns source text into [`Value`] data. Token-level recognition (whitespace,
//! comments, atoms, string bodies, number literals) is done with `nom`; the
//! nesting structure is walked by hand so that every failure can be reported
//! with the exact kind and position the caller needs.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{all_consuming, opt, recognize, value},
    multi::many0_count,
    sequence::{delimited, preceded},
};

use crate::ast::{DELIMITERS, NumberType, Value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Whitespace and `;` line comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0_count(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

/// A run of characters that are neither whitespace nor delimiters.
fn atom(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !DELIMITERS.contains(c)).parse(input)
}

/// A double-quoted string. No escapes: the body is everything up to the next `"`.
fn string_literal(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"')).parse(input)
}

/// `[+-]? (digits [. digits?] | . digits) ([eE] [+-]? digits)?`
fn number_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(one_of("+-")),
        alt((
            recognize((digit1, opt((char('.'), digit0)))),
            recognize((char('.'), digit1)),
        )),
        opt((one_of("eE"), opt(one_of("+-")), digit1))
    ))
    .parse(input)
}

/// Whether an atom is trying to be a number, so that `12abc` is an error
/// rather than a symbol.
fn looks_numeric(atom: &str) -> bool {
    let mut chars = atom.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(c), _, _) if c.is_ascii_digit() => true,
        (Some('+' | '-' | '.'), Some(d), _) if d.is_ascii_digit() => true,
        (Some('+' | '-'), Some('.'), Some(d)) => d.is_ascii_digit(),
        _ => false,
    }
}

struct Reader<'s> {
    source: &'s str,
}

impl<'s> Reader<'s> {
    fn offset(&self, rest: &str) -> usize {
        self.source.len() - rest.len()
    }

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>, at: &str) -> ParseError {
        ParseError::at_offset(kind, message, self.source, self.offset(at))
    }

    fn skip(&self, input: &'s str) -> &'s str {
        match skip_trivia(input) {
            Ok((rest, ())) => rest,
            Err(_) => input,
        }
    }

    /// Read one datum starting at `input`, which must not begin with trivia.
    fn datum(&self, input: &'s str, depth: usize) -> Result<(&'s str, Value), ParseError> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(self.error(
                ParseErrorKind::TooDeeplyNested,
                format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                input,
            ));
        }

        match input.chars().next() {
            None => Err(self.error(ParseErrorKind::Incomplete, "unexpected end of input", input)),
            Some('(') => self.list(input, depth),
            Some(')') => Err(self.error(ParseErrorKind::Unbalanced, "unexpected ')'", input)),
            Some('\'') => {
                let after = self.skip(&input[1..]);
                if after.is_empty() {
                    return Err(self.error(
                        ParseErrorKind::Incomplete,
                        "quote with nothing to quote",
                        input,
                    ));
                }
                let (rest, quoted) = self.datum(after, depth + 1)?;
                Ok((
                    rest,
                    Value::List(vec![Value::Symbol("quote".to_owned()), quoted]),
                ))
            }
            Some('"') => match string_literal(input) {
                Ok((rest, body)) => Ok((rest, Value::String(body.to_owned()))),
                Err(_) => Err(self.error(ParseErrorKind::Incomplete, "unterminated string", input)),
            },
            Some(_) => {
                let (rest, text) = atom(input)
                    .map_err(|_| self.error(ParseErrorKind::InvalidSyntax, "invalid token", input))?;
                Ok((rest, self.classify(text, input)?))
            }
        }
    }

    fn list(&self, open: &'s str, depth: usize) -> Result<(&'s str, Value), ParseError> {
        let mut rest = self.skip(&open[1..]);
        let mut items = Vec::new();
        loop {
            match rest.chars().next() {
                Some(')') => return Ok((&rest[1..], Value::List(items))),
                None => {
                    return Err(self.error(ParseErrorKind::Incomplete, "unclosed '('", open));
                }
                Some(_) => {
                    let (next, item) = self.datum(rest, depth + 1)?;
                    items.push(item);
                    rest = self.skip(next);
                }
            }
        }
    }

    fn classify(&self, text: &str, at: &str) -> Result<Value, ParseError> {
        match text {
            "#t" | "true" => return Ok(Value::Bool(true)),
            "#f" | "false" => return Ok(Value::Bool(false)),
            "nil" => return Ok(Value::Nil),
            _ => {}
        }
        if looks_numeric(text) {
            return all_consuming(number_literal)
                .parse(text)
                .ok()
                .and_then(|(_, digits)| digits.parse::<NumberType>().ok())
                .map(Value::Number)
                .ok_or_else(|| {
                    self.error(
                        ParseErrorKind::InvalidSyntax,
                        format!("invalid number '{text}'"),
                        at,
                    )
                });
        }
        if text.starts_with('#') {
            return Err(self.error(
                ParseErrorKind::InvalidSyntax,
                format!("unknown literal '{text}'"),
                at,
            ));
        }
        Ok(Value::Symbol(text.to_owned()))
    }
}

/// Read every top-level datum in `input`. Empty input yields no data.
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let reader = Reader { source: input };
    let mut rest = reader.skip(input);
    let mut data = Vec::new();
    while !rest.is_empty() {
        let (next, datum) = reader.datum(rest, 0)?;
        data.push(datum);
        rest = reader.skip(next);
    }
    Ok(data)
}

/// Read exactly one datum.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    let reader = Reader { source: input };
    let start = reader.skip(input);
    let (rest, datum) = reader.datum(start, 0)?;
    let rest = reader.skip(rest);
    if !rest.is_empty() {
        let kind = if rest.starts_with(')') {
            ParseErrorKind::Unbalanced
        } else {
            ParseErrorKind::InvalidSyntax
        };
        return Err(reader.error(kind, "unexpected input after expression", rest).into());
    }
    Ok(datum)
}
