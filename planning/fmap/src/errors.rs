use thiserror::Error;

/// A malformed planning task. Always fatal: the agent stops in the error status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown object `{0}`")]
    UnknownObject(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("parameter `{param}` is not bound in operator `{operator}`")]
    UnboundParameter { operator: String, param: String },
    #[error("`{function}` expects {expected} arguments but got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("function `{0}` is numeric and cannot be used in a literal")]
    NumericInLiteral(String),
    #[error("function `{0}` is not numeric")]
    NotNumeric(String),
    #[error("invalid task: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("agent `{0}` is not part of the roster")]
    UnknownAgent(String),
    #[error("communication channel with `{0}` is closed")]
    Disconnected(String),
}

/// A peer sent a message that does not fit the current synchronized exchange.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("protocol violation in {phase}: expected {expected} from `{peer}`, got {got}")]
pub struct ProtocolError {
    pub phase: &'static str,
    pub peer: String,
    pub expected: &'static str,
    pub got: String,
}

#[derive(Error, Debug)]
pub enum FmapError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Res<T> = Result<T, FmapError>;
