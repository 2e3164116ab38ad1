//! Query-side projections fed by the event bus.

pub mod job_balances;

pub use job_balances::{JobBalancesError, JobBalancesProjection, JobSheetBalance};
