use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::ast::{parse_source, Expr};
use crate::env::Bindings;
use crate::error::{ExecError, ExecErrorKind};
use crate::interp::{eval_expr, ExecContext};

/// One named sub-test inside a suite. The name is the suite file path; the
/// question identifier is derived from it (file name, extension stripped).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubTest {
    pub name: String,
    pub value: f64,
}

/// Human-facing detail for a failing sub-test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    pub hint: String,
    pub hidden: bool,
}

/// The Result of running a Verification Suite against a Binding
/// Environment: a grade in [0, 1], the ordered sub-tests with their point
/// values, the failing sub-tests with detail, and the file paths the suite
/// was loaded from (used for path-containment deduplication).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    pub grade: f64,
    pub tests: Vec<SubTest>,
    pub failures: Vec<(SubTest, FailureDetail)>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SuiteCase {
    expr: Expr,
    hint: String,
    hidden: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct SuiteFile {
    path: String,
    value: f64,
    cases: Vec<SuiteCase>,
}

/// A loaded Verification Suite: immutable once loaded for a run; its only
/// operation is running against an environment.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSuite {
    files: Vec<SuiteFile>,
}

impl FileSuite {
    /// Build a single-file suite from an in-memory source. This is the seam
    /// custom [`SuiteLoader`] implementations use to serve suites from
    /// non-filesystem storage.
    pub fn from_source(path: &Path, source: &str) -> Result<Self, ExecError> {
        Ok(Self {
            files: vec![parse_suite_file(path, source)?],
        })
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Run every case against `env`. Case failures (falsy result or raised
    /// execution failure) are folded into the report; only infrastructure
    /// failures surface as errors.
    pub fn run(&self, env: &mut Bindings, cx: &mut ExecContext) -> SuiteReport {
        let mut tests = Vec::with_capacity(self.files.len());
        let mut failures = Vec::new();
        let mut total_cases = 0usize;
        let mut passed_cases = 0usize;

        for file in &self.files {
            let sub = SubTest {
                name: file.path.clone(),
                value: file.value,
            };
            tests.push(sub.clone());

            let mut first_failure: Option<FailureDetail> = None;
            for case in &file.cases {
                total_cases += 1;
                let passed = match eval_expr(&case.expr, env, cx) {
                    Ok(v) => v.truthy(),
                    Err(_) => false,
                };
                if passed {
                    passed_cases += 1;
                } else if first_failure.is_none() {
                    first_failure = Some(FailureDetail {
                        hint: case.hint.clone(),
                        hidden: case.hidden,
                    });
                }
            }
            if let Some(detail) = first_failure {
                failures.push((sub, detail));
            }
        }

        let grade = if total_cases == 0 {
            1.0
        } else {
            passed_cases as f64 / total_cases as f64
        };

        SuiteReport {
            grade,
            tests,
            failures,
            paths: self.paths(),
        }
    }
}

/// Loads Verification Suites from one or more paths. The engine only ever
/// sees this surface; the `.cms` file format below is one implementation.
pub trait SuiteLoader {
    fn load(&self, paths: &[PathBuf]) -> Result<FileSuite, ExecError>;
}

/// Filesystem loader for `.cms` suite files:
///
/// ```text
/// (points 2)
/// (case (= x 2) "x should equal 2")
/// (case (= y 3) "hidden detail" hidden)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSuiteLoader;

impl SuiteLoader for FsSuiteLoader {
    fn load(&self, paths: &[PathBuf]) -> Result<FileSuite, ExecError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let source = std::fs::read_to_string(path).map_err(|err| {
                ExecError::new(
                    ExecErrorKind::Io,
                    format!("read suite {}: {err}", path.display()),
                )
            })?;
            files.push(parse_suite_file(path, &source)?);
        }
        Ok(FileSuite { files })
    }
}

fn parse_suite_file(path: &Path, source: &str) -> Result<SuiteFile, ExecError> {
    let forms = parse_source(source).map_err(|err| {
        ExecError::new(
            err.kind,
            format!("suite {}: {}", path.display(), err.message),
        )
    })?;

    let mut value = 1.0f64;
    let mut cases = Vec::new();

    for form in forms {
        match form.callee() {
            Some("points") => {
                let Expr::List(items) = &form else {
                    unreachable!("callee implies list");
                };
                value = match items.get(1) {
                    Some(Expr::Int(i)) => *i as f64,
                    Some(Expr::Num(n)) => *n,
                    _ => {
                        return Err(suite_form_err(path, "(points n) needs a numeric value"));
                    }
                };
            }
            Some("case") => {
                let Expr::List(items) = form else {
                    unreachable!("callee implies list");
                };
                let mut it = items.into_iter().skip(1);
                let Some(expr) = it.next() else {
                    return Err(suite_form_err(path, "(case ...) needs an expression"));
                };
                let mut hint = String::new();
                let mut hidden = false;
                for rest in it {
                    match rest {
                        Expr::Str(s) => hint = s,
                        Expr::Ident(id) if id == "hidden" => hidden = true,
                        other => {
                            return Err(suite_form_err(
                                path,
                                format!("unexpected case attribute: {other:?}"),
                            ));
                        }
                    }
                }
                cases.push(SuiteCase { expr, hint, hidden });
            }
            _ => {
                return Err(suite_form_err(
                    path,
                    "expected (points n) or (case expr \"hint\" [hidden])",
                ));
            }
        }
    }

    Ok(SuiteFile {
        path: path.display().to_string(),
        value,
        cases,
    })
}

fn suite_form_err(path: &Path, msg: impl Into<String>) -> ExecError {
    ExecError::new(
        ExecErrorKind::Exec,
        format!("suite {}: {}", path.display(), msg.into()),
    )
}
