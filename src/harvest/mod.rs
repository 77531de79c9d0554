//! Per-journal harvest scheduling (spec §4.2) and the five fetch operators
//! (spec §4.1/§4.3) a journal's `harvester_operation_` dispatches through.

pub mod dispatcher;
pub mod operators;

pub use dispatcher::{run_journal, JournalMetrics, JournalOutcome};
pub use operators::{HarvestOperator, OperatorContext, OperatorOutcome, OperatorRegistry};
