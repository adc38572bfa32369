//! devconsole-store: JSON-on-disk definitions for devconsole evaluations
//!
//! Eval sets and evaluators live as plain JSON documents under a project's
//! `evaluations/` directory:
//!
//! - `evaluations/eval-sets/<id>.json`: [`EvalSet`]
//! - `evaluations/evaluators/<id>.json`: [`Evaluator`]
//!
//! Reads are lenient (unreadable files are skipped when listing), writes are
//! atomic (temp file in the target directory, then rename).

mod error;
pub mod eval_sets;
pub mod evaluator_types;
pub mod evaluators;
mod fs;

pub use error::StoreError;
pub use eval_sets::{EvalSet, EvalSetStore, EvalSetSummary, Evaluation, EVAL_SETS_SUBDIR};
pub use evaluator_types::{get_evaluator_type, EvaluatorType, EVALUATOR_TYPES};
pub use evaluators::{Evaluator, EvaluatorStore, EvaluatorSummary, EVALUATORS_SUBDIR};

/// Schema version written into every new definition file.
pub const DEFINITION_VERSION: &str = "1.0";

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
