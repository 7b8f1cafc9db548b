//! nom grammar for the expression language.
//!
//! Precedence, lowest first: ternary, `??`, `||`, `&&`, equality,
//! comparison, additive, multiplicative, unary, postfix (member, index,
//! call), primary.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, cut, map, map_res, opt, recognize, value},
    error::{context, convert_error, ContextError, ErrorKind, ParseError, VerboseError},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use super::ast::{BinaryOperator, Expr, UnaryOperator};
use super::{EvalError, EvalResult};
use crate::value::Value;

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

pub fn parse_expression(input: &str) -> EvalResult<Expr> {
    match all_consuming(delimited(multispace0, expression, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(EvalError::Syntax {
            expression: input.to_string(),
            message: convert_error(input, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(EvalError::Syntax {
            expression: input.to_string(),
            message: "incomplete input".to_string(),
        }),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParserResult<'a, O>
where
    F: FnMut(&'a str) -> ParserResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn expression(input: &str) -> ParserResult<Expr> {
    context("expression", ternary)(input)
}

fn ternary(input: &str) -> ParserResult<Expr> {
    let (input, condition) = coalesce(input)?;
    let (input, branches) = opt(preceded(
        ws(char('?')),
        cut(pair(expression, preceded(ws(char(':')), expression))),
    ))(input)?;
    let expr = match branches {
        Some((then_branch, else_branch)) => Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
        None => condition,
    };
    Ok((input, expr))
}

/// Left-associative chain of `operand (operator operand)*`.
fn binary_chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> ParserResult<'a, Expr>,
    operator: fn(&'a str) -> ParserResult<'a, BinaryOperator>,
) -> ParserResult<'a, Expr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(operator), operand))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |left, (op, right)| Expr::binary(op, left, right));
    Ok((input, expr))
}

fn coalesce(input: &str) -> ParserResult<Expr> {
    binary_chain(input, logical_or, |i| {
        value(BinaryOperator::Coalesce, tag("??"))(i)
    })
}

fn logical_or(input: &str) -> ParserResult<Expr> {
    binary_chain(input, logical_and, |i| value(BinaryOperator::Or, tag("||"))(i))
}

fn logical_and(input: &str) -> ParserResult<Expr> {
    binary_chain(input, equality, |i| value(BinaryOperator::And, tag("&&"))(i))
}

fn equality_operator(input: &str) -> ParserResult<BinaryOperator> {
    alt((
        value(BinaryOperator::Equal, tag("===")),
        value(BinaryOperator::NotEqual, tag("!==")),
        value(BinaryOperator::Equal, tag("==")),
        value(BinaryOperator::NotEqual, tag("!=")),
    ))(input)
}

fn equality(input: &str) -> ParserResult<Expr> {
    binary_chain(input, comparison, equality_operator)
}

fn comparison_operator(input: &str) -> ParserResult<BinaryOperator> {
    alt((
        value(BinaryOperator::LessThanEqual, tag("<=")),
        value(BinaryOperator::GreaterThanEqual, tag(">=")),
        value(BinaryOperator::LessThan, char('<')),
        value(BinaryOperator::GreaterThan, char('>')),
    ))(input)
}

fn comparison(input: &str) -> ParserResult<Expr> {
    binary_chain(input, additive, comparison_operator)
}

fn additive_operator(input: &str) -> ParserResult<BinaryOperator> {
    alt((
        value(BinaryOperator::Add, char('+')),
        value(BinaryOperator::Subtract, char('-')),
    ))(input)
}

fn additive(input: &str) -> ParserResult<Expr> {
    binary_chain(input, multiplicative, additive_operator)
}

fn multiplicative_operator(input: &str) -> ParserResult<BinaryOperator> {
    alt((
        value(BinaryOperator::Multiply, char('*')),
        value(BinaryOperator::Divide, char('/')),
        value(BinaryOperator::Modulo, char('%')),
    ))(input)
}

fn multiplicative(input: &str) -> ParserResult<Expr> {
    binary_chain(input, unary, multiplicative_operator)
}

fn unary(input: &str) -> ParserResult<Expr> {
    let unary_op = alt((
        value(UnaryOperator::Not, char('!')),
        value(UnaryOperator::Negate, char('-')),
    ));
    alt((
        map(
            pair(preceded(multispace0, unary_op), unary),
            |(op, operand)| Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        ),
        postfix,
    ))(input)
}

#[derive(Debug)]
enum PostfixOp {
    Member(String),
    Index(Expr),
    Call(Vec<Expr>),
}

fn property(input: &str) -> ParserResult<&str> {
    alt((identifier, digit1))(input)
}

fn postfix_operator(input: &str) -> ParserResult<PostfixOp> {
    alt((
        map(preceded(alt((tag("?."), tag("."))), ws(property)), |p| {
            PostfixOp::Member(p.to_string())
        }),
        map(
            delimited(char('['), ws(expression), char(']')),
            PostfixOp::Index,
        ),
        map(
            delimited(
                char('('),
                separated_list0(char(','), ws(expression)),
                preceded(multispace0, char(')')),
            ),
            PostfixOp::Call,
        ),
    ))(input)
}

fn postfix(input: &str) -> ParserResult<Expr> {
    let (mut input, mut expr) = primary(input)?;
    loop {
        let (rest, op) = match opt(preceded(multispace0, postfix_operator))(input)? {
            (rest, Some(op)) => (rest, op),
            (_, None) => break,
        };
        expr = match (op, expr) {
            (PostfixOp::Member(property), object) => Expr::Member {
                object: Box::new(object),
                property,
            },
            (PostfixOp::Index(index), object) => Expr::Index {
                object: Box::new(object),
                index: Box::new(index),
            },
            (PostfixOp::Call(arguments), Expr::Identifier(function)) => {
                Expr::Call { function, arguments }
            }
            // `value.upper()` is sugar for `upper(value)`.
            (PostfixOp::Call(mut arguments), Expr::Member { object, property }) => {
                arguments.insert(0, *object);
                Expr::Call {
                    function: property,
                    arguments,
                }
            }
            (PostfixOp::Call(_), _) => {
                let error = VerboseError::from_error_kind(input, ErrorKind::Verify);
                return Err(nom::Err::Failure(VerboseError::add_context(
                    input,
                    "only built-in functions can be called",
                    error,
                )));
            }
        };
        input = rest;
    }
    Ok((input, expr))
}

fn primary(input: &str) -> ParserResult<Expr> {
    preceded(
        multispace0,
        alt((
            number,
            map(string_literal, |s| Expr::Literal(Value::String(s))),
            list_literal,
            map_literal,
            parenthesized,
            word,
        )),
    )(input)
}

fn identifier(input: &str) -> ParserResult<&str> {
    context(
        "identifier",
        recognize(pair(
            take_while1(|c: char| c.is_alphabetic() || c == '_'),
            take_while(|c: char| c.is_alphanumeric() || c == '_'),
        )),
    )(input)
}

fn word(input: &str) -> ParserResult<Expr> {
    map(identifier, |name| match name {
        "true" => Expr::Literal(Value::Boolean(true)),
        "false" => Expr::Literal(Value::Boolean(false)),
        "null" | "undefined" => Expr::Literal(Value::Null),
        _ => Expr::Identifier(name.to_string()),
    })(input)
}

fn number(input: &str) -> ParserResult<Expr> {
    context(
        "number",
        map_res(
            recognize(tuple((digit1, opt(pair(char('.'), digit1))))),
            |text: &str| {
                let literal = match text.parse::<i64>() {
                    Ok(i) => Value::Integer(i),
                    Err(_) => Value::Float(text.parse::<f64>()?),
                };
                Ok::<_, std::num::ParseFloatError>(Expr::Literal(literal))
            },
        ),
    )(input)
}

fn escape_sequence(input: &str) -> ParserResult<&str> {
    alt((
        value("\\", char('\\')),
        value("\"", char('"')),
        value("'", char('\'')),
        value("\n", char('n')),
        value("\t", char('t')),
        value("\r", char('r')),
        value("$", char('$')),
    ))(input)
}

fn double_quoted(input: &str) -> ParserResult<String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(is_not("\\\""), '\\', escape_sequence)),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn single_quoted(input: &str) -> ParserResult<String> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(is_not("\\'"), '\\', escape_sequence)),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(input)
}

fn string_literal(input: &str) -> ParserResult<String> {
    context("string literal", alt((double_quoted, single_quoted)))(input)
}

fn list_literal(input: &str) -> ParserResult<Expr> {
    context(
        "list literal",
        map(
            delimited(
                char('['),
                terminated(
                    separated_list0(char(','), ws(expression)),
                    opt(ws(char(','))),
                ),
                ws(char(']')),
            ),
            Expr::List,
        ),
    )(input)
}

fn map_key(input: &str) -> ParserResult<String> {
    alt((
        string_literal,
        map(identifier, str::to_string),
        map(digit1, str::to_string),
    ))(input)
}

fn map_literal(input: &str) -> ParserResult<Expr> {
    context(
        "map literal",
        map(
            delimited(
                char('{'),
                terminated(
                    separated_list0(
                        char(','),
                        separated_pair(ws(map_key), char(':'), ws(expression)),
                    ),
                    opt(ws(char(','))),
                ),
                ws(char('}')),
            ),
            Expr::Map,
        ),
    )(input)
}

fn parenthesized(input: &str) -> ParserResult<Expr> {
    delimited(char('('), ws(expression), char(')'))(input)
}
