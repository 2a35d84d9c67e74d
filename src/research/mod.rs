//! The research coordinator and its plan/dispatch/evaluate/synthesize loop.
//!
//! Generation calls exchange a fixed field-tagged text format (`KEY: value`
//! lines, see [`parse`]); any malformed generator output resolves to a
//! documented fallback rather than an error, so the loop always terminates
//! with a result.

pub mod coordinator;
pub mod evaluate;
pub mod parse;
pub mod plan;
pub mod synthesize;

pub use coordinator::Coordinator;
pub use evaluate::{Evaluation, Pivot, PivotUrgency};
pub use plan::{PlanStep, ResearchPlan};
