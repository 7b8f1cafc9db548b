//! Embedded expression language.
//!
//! Expressions are side-effect free: they read variables through a
//! [`VariableScope`] and may only call the built-in function table. Templates
//! embed expressions in `${...}` spans.

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod pattern;
mod template;

use thiserror::Error;

use crate::value::{Value, ValueMap};

pub use evaluator::ExpressionEvaluator;
pub use parser::parse_expression;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Syntax error in `{expression}`: {message}")]
    Syntax { expression: String, message: String },
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments for {function}: {message}")]
    InvalidArguments { function: String, message: String },
    #[error("Type mismatch in `{operation}`: cannot apply to {left} and {right}")]
    TypeMismatch {
        operation: String,
        left: String,
        right: String,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Reserved key cannot be accessed: {0}")]
    ReservedKey(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Read access to the variables an expression can see.
pub trait VariableScope {
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl VariableScope for ValueMap {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Scope with no variables, for constant expressions.
pub struct EmptyScope;

impl VariableScope for EmptyScope {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }
}
