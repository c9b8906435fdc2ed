//! Execution and verification-capture engine for grading cellscript
//! notebooks and scripts.
//!
//! A grading run reproduces notebook semantics (cells execute in order, a
//! failing cell stops only itself), rewrites every `(check ...)` call so
//! its Result lands in a hidden run-scoped collection, re-executes the
//! combined source under output suppression, and merges the captured
//! results with externally discovered and pre-graded suites into one
//! deterministic score mapping.

pub mod aggregate;
pub mod ast;
pub mod env;
pub mod error;
pub mod execute;
pub mod grade;
pub mod interp;
pub mod normalize;
pub mod notebook;
pub mod rewrite;
pub mod sandbox;
pub mod suite;

pub use aggregate::{question_id, ScoreEntry, ScoreMapping, SCORE_REPORT_SCHEMA_VERSION};
pub use env::{Bindings, Value};
pub use error::{ExecError, ExecErrorKind};
pub use execute::{execute_notebook, execute_script, results_name, take_results, ExecuteOptions};
pub use grade::{grade_notebook_document, grade_path, grade_path_with_env, grade_script_source, GradeOptions};
pub use interp::{check, ExecContext, DEFAULT_FUEL, DEFAULT_SUITE_DIR};
pub use notebook::{Cell, CellSource, Notebook};
pub use suite::{FailureDetail, FileSuite, FsSuiteLoader, SubTest, SuiteLoader, SuiteReport};
