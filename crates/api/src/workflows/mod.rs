//! Workflow store: CRUD, step-order invariants, group-share ACL.

pub mod model;
pub mod steps;
pub mod store;

pub use model::{Step, StepInput, StepUpdate, Workflow};
