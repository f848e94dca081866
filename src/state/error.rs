//! State errors.

use thiserror::Error;

use crate::{
    interfaces::BuilderError,
    math::{fixed::FixedPointError, lmsr::LmsrError, outcome::OutcomeError},
    serialize::DecodeError,
    store::StoreError,
    types::ObjectId,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: ObjectId },
    #[error("duplicate record {id}")]
    Duplicate { id: ObjectId },
    #[error("constraint violated: {reason}")]
    ConstraintViolated { reason: String },
    #[error(
        "declared price {declared} below minimum acceptable {minimum}"
    )]
    PriceRejected { declared: u64, minimum: u64 },
    #[error(transparent)]
    Lmsr(#[from] LmsrError),
    #[error(transparent)]
    Outcome(#[from] OutcomeError),
    #[error(transparent)]
    FixedPoint(#[from] FixedPointError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Store(StoreError),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { id } => Self::Duplicate { id },
            StoreError::Cancelled => Self::Cancelled,
            StoreError::Decode(err) => Self::Decode(err),
            other => Self::Store(other),
        }
    }
}

impl Error {
    /// Short stable code for the operator front-end's `(code, message)`
    /// surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::NotFound { .. } => "not-found",
            Self::Duplicate { .. } => "duplicate",
            Self::ConstraintViolated { .. } => "constraint-violated",
            Self::PriceRejected { .. } => "price-rejected",
            Self::Lmsr(_) => "lmsr",
            Self::Outcome(_) => "outcome",
            Self::FixedPoint(_) => "fixed-point",
            Self::Builder(_) => "tx-builder",
            Self::Store(_) => "store-corruption",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn constraint(reason: impl Into<String>) -> Self {
        Self::ConstraintViolated {
            reason: reason.into(),
        }
    }
}
