use std::path::{Path, PathBuf};

use crate::aggregate::{aggregate, ScoreMapping};
use crate::env::Bindings;
use crate::error::{ExecError, ExecErrorKind};
use crate::execute::{execute_notebook, execute_script, take_results, ExecuteOptions};
use crate::interp::{ExecContext, DEFAULT_FUEL};
use crate::notebook::Notebook;
use crate::sandbox;
use crate::suite::{SuiteLoader, SuiteReport};

/// Options for one grading run. A fresh run shares nothing with previous
/// runs except what the caller passes in `initial`.
#[derive(Debug, Clone)]
pub struct GradeOptions {
    /// Swallow execution failures (cell-local in the pre-pass, whole-run in
    /// the second pass) instead of propagating them.
    pub ignore_errors: bool,
    /// Treat the input as a linear script instead of a notebook document.
    pub script: bool,
    pub seed: Option<u64>,
    pub cwd: Option<PathBuf>,
    pub test_dir: Option<PathBuf>,
    pub fuel: u64,
    pub initial: Option<Bindings>,
}

impl Default for GradeOptions {
    fn default() -> Self {
        Self {
            ignore_errors: true,
            script: false,
            seed: None,
            cwd: None,
            test_dir: None,
            fuel: DEFAULT_FUEL,
            initial: None,
        }
    }
}

impl GradeOptions {
    fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            ignore_errors: self.ignore_errors,
            seed: self.seed,
            cwd: self.cwd.clone(),
            test_dir: self.test_dir.clone(),
            fuel: self.fuel,
            initial: self.initial.clone(),
        }
    }
}

/// Grade one document file (notebook JSON, or plain source with
/// `opts.script`): execute, capture verification results, merge with the
/// externally discovered suites and pre-graded results, and reduce to the
/// score mapping. The Binding Environment is discarded; use
/// [`grade_path_with_env`] to keep it for introspection.
pub fn grade_path(
    path: &Path,
    suites_glob: &[PathBuf],
    pregraded: &[SuiteReport],
    loader: &dyn SuiteLoader,
    opts: &GradeOptions,
) -> Result<ScoreMapping, ExecError> {
    let (mapping, _env) = grade_path_with_env(path, suites_glob, pregraded, loader, opts)?;
    Ok(mapping)
}

pub fn grade_path_with_env(
    path: &Path,
    suites_glob: &[PathBuf],
    pregraded: &[SuiteReport],
    loader: &dyn SuiteLoader,
    opts: &GradeOptions,
) -> Result<(ScoreMapping, Bindings), ExecError> {
    if opts.script {
        let source = std::fs::read_to_string(path).map_err(|err| {
            ExecError::new(
                ExecErrorKind::Io,
                format!("read script {}: {err}", path.display()),
            )
        })?;
        grade_script_source(&source, suites_glob, pregraded, loader, opts)
    } else {
        let nb = Notebook::from_path(path)?;
        grade_notebook_document(&nb, suites_glob, pregraded, loader, opts)
    }
}

pub fn grade_notebook_document(
    nb: &Notebook,
    suites_glob: &[PathBuf],
    pregraded: &[SuiteReport],
    loader: &dyn SuiteLoader,
    opts: &GradeOptions,
) -> Result<(ScoreMapping, Bindings), ExecError> {
    let secret = sandbox::secret_token();
    let env = execute_notebook(nb, &secret, loader, &opts.execute_options())?;
    finish(env, &secret, suites_glob, pregraded, loader, opts)
}

pub fn grade_script_source(
    source: &str,
    suites_glob: &[PathBuf],
    pregraded: &[SuiteReport],
    loader: &dyn SuiteLoader,
    opts: &GradeOptions,
) -> Result<(ScoreMapping, Bindings), ExecError> {
    let secret = sandbox::secret_token();
    let env = execute_script(source, &secret, loader, &opts.execute_options())?;
    finish(env, &secret, suites_glob, pregraded, loader, opts)
}

fn finish(
    mut env: Bindings,
    secret: &str,
    suites_glob: &[PathBuf],
    pregraded: &[SuiteReport],
    loader: &dyn SuiteLoader,
    opts: &GradeOptions,
) -> Result<(ScoreMapping, Bindings), ExecError> {
    let reports = take_results(&mut env, secret);

    // Externally discovered suites run against the final environment; give
    // them their own fuel budget so a fuel-starved document cannot starve
    // instructor suites.
    let mut cx = ExecContext::new(loader);
    cx.set_fuel(opts.fuel);
    if let Some(cwd) = &opts.cwd {
        cx.module_roots.push(cwd.clone());
    }

    let mapping = aggregate(reports, suites_glob, pregraded, &mut env, &mut cx)?;
    Ok((mapping, env))
}
