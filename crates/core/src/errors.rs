use thiserror::Error;

use crate::domain::procurement::ProcurementStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid procurement transition from {from:?} to {to:?}")]
    InvalidRequestTransition { from: ProcurementStatus, to: ProcurementStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
