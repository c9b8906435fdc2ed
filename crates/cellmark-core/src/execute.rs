use std::path::PathBuf;

use crate::ast::parse_source;
use crate::env::{Bindings, Value};
use crate::error::ExecError;
use crate::interp::{eval_program, ExecContext, DEFAULT_FUEL};
use crate::normalize::{normalize_cell, normalize_script};
use crate::notebook::Notebook;
use crate::rewrite::rewrite_program;
use crate::sandbox;
use crate::suite::SuiteLoader;

/// Execution configuration for one run. `pregraded` results and suite
/// discovery live a level up in [`crate::grade`]; this layer only executes.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Swallow per-cell (and second-pass) failures instead of aborting.
    pub ignore_errors: bool,
    /// Intercell seeding: inject generator state and prepend a seeding
    /// statement to every cell.
    pub seed: Option<u64>,
    /// Appended to the module search path before execution.
    pub cwd: Option<PathBuf>,
    /// Overrides the default suite directory in rewritten `use-tests`
    /// constructions.
    pub test_dir: Option<PathBuf>,
    pub fuel: u64,
    /// Caller-provided initial bindings; the run still owns its copy.
    pub initial: Option<Bindings>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            seed: None,
            cwd: None,
            test_dir: None,
            fuel: DEFAULT_FUEL,
            initial: None,
        }
    }
}

/// Name of the hidden, run-scoped result collection for `secret`.
pub fn results_name(secret: &str) -> String {
    format!("check_results_{secret}")
}

fn prepare(secret: &str, opts: &ExecuteOptions) -> (Bindings, String) {
    let mut env = opts.initial.clone().unwrap_or_default();
    let results = results_name(secret);
    if !env.contains(&results) {
        env.insert(results.clone(), Value::List(Vec::new()));
    }
    if let Some(seed) = opts.seed {
        sandbox::seed_bindings(&mut env, seed);
    }
    (env, results)
}

fn context<'a>(loader: &'a dyn SuiteLoader, opts: &ExecuteOptions) -> ExecContext<'a> {
    let mut cx = ExecContext::new(loader);
    cx.set_fuel(opts.fuel);
    if let Some(cwd) = &opts.cwd {
        cx.module_roots.push(cwd.clone());
    }
    cx
}

/// Execute a notebook document and return the resulting Binding
/// Environment, with the populated result collection under its secret key.
///
/// Two passes: the pre-execution pass runs each cell in document order so a
/// failure in cell N leaves cells 1..N-1 applied and (under
/// `ignore_errors`) excludes cell N from the combined source, mimicking a
/// notebook that stopped at that cell. The second pass re-executes the
/// rewritten combined source against the same environment; only its
/// rewritten `check` calls populate the result collection.
pub fn execute_notebook(
    nb: &Notebook,
    secret: &str,
    loader: &dyn SuiteLoader,
    opts: &ExecuteOptions,
) -> Result<Bindings, ExecError> {
    let (mut env, results) = prepare(secret, opts);
    let mut cx = context(loader, opts);

    let mut combined = String::new();
    for cell in &nb.cells {
        if !cell.is_code() {
            continue;
        }
        let normalized = normalize_cell(&cell.source, opts.test_dir.as_deref());
        let cell_source = match opts.seed {
            Some(seed) => format!("{}{normalized}", sandbox::seeding_stmt(seed)),
            None => normalized,
        };
        if cell_source.is_empty() {
            continue;
        }

        let outcome = parse_source(&cell_source)
            .and_then(|forms| eval_program(&forms, &mut env, &mut cx));
        match outcome {
            Ok(_) => combined.push_str(&cell_source),
            Err(err) => {
                if !opts.ignore_errors {
                    return Err(err);
                }
            }
        }
    }

    second_pass(&combined, &results, &mut env, loader, opts)?;
    Ok(env)
}

/// Execute a script (one linear source, no cell boundaries) with the same
/// two-pass scheme. Scripts get no directive filtering; only the
/// `use-tests` rebinding applies.
pub fn execute_script(
    script: &str,
    secret: &str,
    loader: &dyn SuiteLoader,
    opts: &ExecuteOptions,
) -> Result<Bindings, ExecError> {
    let (mut env, results) = prepare(secret, opts);
    let mut cx = context(loader, opts);

    let preamble = match opts.seed {
        Some(seed) => sandbox::seeding_stmt(seed),
        None => String::new(),
    };
    let full = format!("{preamble}{}", normalize_script(script, opts.test_dir.as_deref()));

    let mut combined = preamble;
    let outcome =
        parse_source(&full).and_then(|forms| eval_program(&forms, &mut env, &mut cx));
    match outcome {
        Ok(_) => combined = full,
        Err(err) => {
            if !opts.ignore_errors {
                return Err(err);
            }
        }
    }

    second_pass(&combined, &results, &mut env, loader, opts)?;
    Ok(env)
}

/// Authoritative execution: parse the combined source (a parse failure here
/// is always fatal — the run cannot be rewritten), rewrite verification
/// calls against the secret collection name, and evaluate once more with
/// output suppressed.
///
/// Only the Binding Environment carries over from the pre-execution pass.
/// The context is rebuilt from scratch: the replayed source re-establishes
/// any `use-tests` directory in document order, and the pass gets the full
/// fuel budget again.
fn second_pass(
    combined: &str,
    results: &str,
    env: &mut Bindings,
    loader: &dyn SuiteLoader,
    opts: &ExecuteOptions,
) -> Result<(), ExecError> {
    let mut cx = context(loader, opts);
    let forms = parse_source(combined)?;
    let rewritten = rewrite_program(forms, results);
    match eval_program(&rewritten, env, &mut cx) {
        Ok(_) => Ok(()),
        Err(_) if opts.ignore_errors => Ok(()),
        Err(err) => Err(err),
    }
}

/// Extract the result collection from a finished environment.
pub fn take_results(env: &mut Bindings, secret: &str) -> Vec<crate::suite::SuiteReport> {
    let name = results_name(secret);
    let mut out = Vec::new();
    if let Some(Value::List(items)) = env.remove(&name) {
        for item in items {
            if let Value::Report(report) = item {
                out.push(report);
            }
        }
    }
    out
}
