use thiserror::Error;

use crate::event::EventError;
use crate::executor::{ActionError, FlowError, TimerError};
use crate::expression::EvalError;
use crate::pipe::PipeError;
use crate::platform::PlatformError;
use crate::spec::SpecError;
use crate::state::{StateError, StorageError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),
    // evaluation
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    // state
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    // outbound
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    // execution
    #[error("Action error: {0}")]
    Action(#[from] ActionError),
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),
    #[error("Command not found: {0}")]
    CommandNotFound(String),
    #[error("Command `{command}` is missing required option `{option}`")]
    MissingOption { command: String, option: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RuntimeResult<T> = Result<T, Error>;
