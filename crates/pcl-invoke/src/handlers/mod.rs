//! Built-in pipeline steps.

pub mod commit;
pub mod endorsement;
pub mod signature;
pub mod targets;
pub mod validation;

pub use commit::CommitTxHandler;
pub use endorsement::EndorsementHandler;
pub use signature::SignatureValidationHandler;
pub use targets::TargetResolutionHandler;
pub use validation::EndorsementValidationHandler;
