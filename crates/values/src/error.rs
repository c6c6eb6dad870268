//! Errors raised while transforming values

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValuesError {
    #[error("{which} values must be a JSON object")]
    NotAnObject { which: &'static str },

    #[error("fields starting with '_' are not allowed in user values (found {path})")]
    UnderscoreField { path: String },
}

pub type Result<T, E = ValuesError> = std::result::Result<T, E>;
