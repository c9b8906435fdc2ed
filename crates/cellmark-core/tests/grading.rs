use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cellmark_core::{
    execute_notebook, grade_notebook_document, grade_script_source, Bindings, ExecError,
    ExecErrorKind, ExecuteOptions, FileSuite, FsSuiteLoader, GradeOptions, Notebook, SuiteLoader,
    Value,
};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_fixture_dir() -> PathBuf {
    let base = std::env::temp_dir().join("cellmark-core-tests");
    std::fs::create_dir_all(&base).expect("create temp base");
    let pid = std::process::id();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = base.join(format!("fixture_{pid}_{n}"));
    std::fs::create_dir_all(&dir).expect("create fixture dir");
    dir
}

fn write_suite(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let tests = dir.join("tests");
    std::fs::create_dir_all(&tests).expect("create tests dir");
    let path = tests.join(name);
    std::fs::write(&path, contents).expect("write suite");
    path
}

fn notebook(cells: &[(&str, &str)]) -> Notebook {
    let cells: Vec<serde_json::Value> = cells
        .iter()
        .map(|(cell_type, source)| {
            serde_json::json!({"cell_type": cell_type, "source": source})
        })
        .collect();
    let doc = serde_json::json!({ "cells": cells });
    Notebook::from_json(doc.to_string().as_bytes()).expect("build notebook")
}

fn default_grade() -> GradeOptions {
    GradeOptions::default()
}

/// Serves exactly one suite, at the bare path `q1.cms`; any other spelling
/// fails to load.
struct SingleSuiteLoader;

impl SuiteLoader for SingleSuiteLoader {
    fn load(&self, paths: &[PathBuf]) -> Result<FileSuite, ExecError> {
        match paths {
            [path] if path == Path::new("q1.cms") => {
                FileSuite::from_source(path, "(case (= x 1) \"x is 1\")")
            }
            _ => Err(ExecError::new(
                ExecErrorKind::Io,
                format!("no suite at {paths:?}"),
            )),
        }
    }
}

#[test]
fn example_notebook_scores_one_point() {
    let dir = temp_fixture_dir();
    let q1 = write_suite(&dir, "q1.cms", "(points 1)\n(case (= x 2) \"x should be 2\")\n");

    let nb = notebook(&[
        ("code", "(set x (+ 1 1))"),
        ("code", &format!("(check \"{}\")", q1.display())),
    ]);

    let (mapping, _env) =
        grade_notebook_document(&nb, &[], &[], &FsSuiteLoader, &default_grade()).expect("grade");

    assert_eq!(mapping.questions["q1"].score, Some(1.0));
    assert_eq!(mapping.questions["q1"].possible, Some(1.0));
    assert_eq!(mapping.total, 1.0);
    assert_eq!(mapping.possible, 1.0);
}

#[test]
fn failing_cell_is_excluded_from_the_combined_source() {
    // Pre-pass: n goes 0 -> 1 (cell fails after the increment) -> 11.
    // Second pass re-runs only the surviving cells, so n ends at 10:
    // the failed cell's source must not resurrect in the second pass,
    // while the surviving cells keep their original order.
    let nb = notebook(&[
        ("code", "(set n 0)"),
        ("code", "(set n (+ n 1)) (ghost)"),
        ("markdown", "# prose"),
        ("code", "(set n (+ n 10))"),
    ]);

    let opts = ExecuteOptions {
        ignore_errors: true,
        ..ExecuteOptions::default()
    };
    let env = execute_notebook(&nb, "s3cr3t", &FsSuiteLoader, &opts).expect("execute");
    assert_eq!(env.get("n"), Some(&Value::Int(10)));
}

#[test]
fn execution_failure_propagates_without_ignore_errors() {
    let nb = notebook(&[("code", "(ghost)")]);
    let opts = ExecuteOptions::default();
    assert!(!opts.ignore_errors);
    let err = execute_notebook(&nb, "s3cr3t", &FsSuiteLoader, &opts).expect_err("must fail");
    assert_eq!(err.kind, ExecErrorKind::Exec);
}

#[test]
fn failing_only_cell_still_yields_an_empty_mapping() {
    let nb = notebook(&[("code", "(ghost)")]);
    let (mapping, _env) =
        grade_notebook_document(&nb, &[], &[], &FsSuiteLoader, &default_grade()).expect("grade");
    assert!(mapping.questions.is_empty());
    assert_eq!(mapping.total, 0.0);
    assert_eq!(mapping.possible, 0.0);
}

#[test]
fn unreferenced_external_suite_is_still_graded() {
    let dir = temp_fixture_dir();
    let q2 = write_suite(&dir, "q2.cms", "(points 2)\n(case (= hidden_x 5) \"x is 5\")\n");

    let nb = notebook(&[("code", "(set hidden_x 5)")]);
    let (mapping, _env) =
        grade_notebook_document(&nb, &[q2], &[], &FsSuiteLoader, &default_grade()).expect("grade");

    assert_eq!(mapping.questions["q2"].score, Some(2.0));
    assert_eq!(mapping.total, 2.0);
    assert_eq!(mapping.possible, 2.0);
}

#[test]
fn covered_suites_are_not_run_twice() {
    let dir = temp_fixture_dir();
    let q1 = write_suite(&dir, "q1.cms", "(case (= x 1) \"x\")\n");
    let q2 = write_suite(&dir, "q2.cms", "(case (= x 1) \"x\")\n");

    let nb = notebook(&[
        ("code", "(set x 1)"),
        ("code", &format!("(check \"{}\")", q1.display())),
    ]);

    // q1 is already covered in-document; only q2 may be added.
    let (mapping, _env) = grade_notebook_document(
        &nb,
        &[q1, q2],
        &[],
        &FsSuiteLoader,
        &default_grade(),
    )
    .expect("grade");

    assert_eq!(mapping.possible, 2.0, "q1 must contribute exactly once");
    assert_eq!(mapping.total, 2.0);
}

#[test]
fn pregraded_result_wins_end_to_end() {
    let dir = temp_fixture_dir();
    let q1 = write_suite(&dir, "q1.cms", "(case (= x 2) \"x should be 2\")\n");

    // The document fails q1; the pregraded result says full credit.
    let nb = notebook(&[
        ("code", "(set x 3)"),
        ("code", &format!("(check \"{}\")", q1.display())),
    ]);
    let pregraded = cellmark_core::SuiteReport {
        grade: 1.0,
        tests: vec![cellmark_core::SubTest {
            name: q1.display().to_string(),
            value: 1.0,
        }],
        failures: Vec::new(),
        paths: vec![q1.display().to_string()],
    };

    let (mapping, _env) =
        grade_notebook_document(&nb, &[], &[pregraded], &FsSuiteLoader, &default_grade())
            .expect("grade");

    assert_eq!(mapping.questions["q1"].score, Some(1.0));
    assert_eq!(mapping.total, 1.0);
    assert_eq!(mapping.possible, 1.0);
}

#[test]
fn seeded_runs_are_deterministic() {
    let nb = notebook(&[("code", "(set x (rand))"), ("code", "(set y (rand-int 100))")]);

    let opts = ExecuteOptions {
        ignore_errors: true,
        seed: Some(1234),
        ..ExecuteOptions::default()
    };
    let a = execute_notebook(&nb, "fixed", &FsSuiteLoader, &opts).expect("run a");
    let b = execute_notebook(&nb, "fixed", &FsSuiteLoader, &opts).expect("run b");
    assert_eq!(a.get("x"), b.get("x"));
    assert_eq!(a.get("y"), b.get("y"));

    let other = ExecuteOptions {
        seed: Some(4321),
        ..opts
    };
    let c = execute_notebook(&nb, "fixed", &FsSuiteLoader, &other).expect("run c");
    assert_ne!(a.get("x"), c.get("x"));
}

#[test]
fn intercell_seeding_replays_per_cell() {
    // With intercell seeding every cell starts from the same generator
    // state, so two cells drawing once each see the same value.
    let nb = notebook(&[("code", "(set a (rand))"), ("code", "(set b (rand))")]);
    let opts = ExecuteOptions {
        ignore_errors: true,
        seed: Some(7),
        ..ExecuteOptions::default()
    };
    let env = execute_notebook(&nb, "fixed", &FsSuiteLoader, &opts).expect("run");
    assert_eq!(env.get("a"), env.get("b"));
}

#[test]
fn use_tests_is_rebound_to_the_override_directory() {
    let dir = temp_fixture_dir();
    write_suite(&dir, "q1.cms", "(case (= x 2) \"x should be 2\")\n");

    let nb = notebook(&[
        ("code", "(set x 2)"),
        ("code", "(use-tests \"/srv/course/tests\")"),
        ("code", "(check \"q1.cms\")"),
    ]);

    let opts = GradeOptions {
        test_dir: Some(dir.join("tests")),
        ..GradeOptions::default()
    };
    let (mapping, _env) =
        grade_notebook_document(&nb, &[], &[], &FsSuiteLoader, &opts).expect("grade");
    assert_eq!(mapping.questions["q1"].score, Some(1.0));
}

#[test]
fn directive_and_widget_lines_do_not_execute() {
    let nb = notebook(&[("code", "%timeit\n(interact widget)\n(set x 1)")]);
    let opts = ExecuteOptions::default();
    let env = execute_notebook(&nb, "s3cr3t", &FsSuiteLoader, &opts).expect("execute");
    assert_eq!(env.get("x"), Some(&Value::Int(1)));
}

#[test]
fn script_mode_grades_a_linear_source() {
    let dir = temp_fixture_dir();
    let q1 = write_suite(&dir, "q1.cms", "(case (= x 2) \"x should be 2\")\n");

    let source = format!("(set x (+ 1 1))\n(check \"{}\")\n", q1.display());
    let (mapping, _env) =
        grade_script_source(&source, &[], &[], &FsSuiteLoader, &default_grade()).expect("grade");
    assert_eq!(mapping.questions["q1"].score, Some(1.0));
    assert_eq!(mapping.total, 1.0);
}

#[test]
fn broken_script_with_ignore_errors_scores_zero() {
    let (mapping, _env) =
        grade_script_source("(set x", &[], &[], &FsSuiteLoader, &default_grade()).expect("grade");
    assert!(mapping.questions.is_empty());
    assert_eq!(mapping.total, 0.0);
    assert_eq!(mapping.possible, 0.0);
}

#[test]
fn late_use_tests_does_not_redirect_earlier_checks() {
    // A check that runs before any use-tests form resolves its path as
    // written. Both passes must see the same resolution: the suite
    // directory the pre-pass ended with (set by the trailing use-tests)
    // must not carry into the start of the authoritative pass.
    let nb = notebook(&[
        ("code", "(set x 1)"),
        ("code", "(check \"q1.cms\")"),
        ("code", "(use-tests \"elsewhere\")"),
    ]);

    let (mapping, _env) =
        grade_notebook_document(&nb, &[], &[], &SingleSuiteLoader, &default_grade())
            .expect("grade");
    assert_eq!(mapping.questions["q1"].score, Some(1.0));
    assert_eq!(mapping.total, 1.0);
    assert_eq!(mapping.possible, 1.0);
}

#[test]
fn second_pass_runs_on_a_fresh_fuel_budget() {
    // Each pass executes the document once, so a document using more than
    // half the budget still completes both passes.
    let nb = notebook(&[("code", "(set n 0) (while (< n 400) (set n (+ n 1)))")]);
    let opts = GradeOptions {
        ignore_errors: false,
        fuel: 4_000,
        ..GradeOptions::default()
    };
    let (_mapping, env) = grade_notebook_document(&nb, &[], &[], &FsSuiteLoader, &opts)
        .expect("both passes within budget");
    assert_eq!(env.get("n"), Some(&Value::Int(400)));
}

#[test]
fn runaway_loop_is_contained_by_fuel() {
    let nb = notebook(&[("code", "(while true (do))"), ("code", "(set x 1)")]);
    let opts = GradeOptions {
        fuel: 50_000,
        ..GradeOptions::default()
    };
    let (mapping, env) = grade_notebook_document(&nb, &[], &[], &FsSuiteLoader, &opts)
        .expect("grade despite runaway cell");
    assert_eq!(mapping.total, 0.0);
    // The runaway cell burned the budget; later cells failed too, but the
    // run still produced a mapping.
    let _ = env;
}

#[test]
fn result_collection_names_differ_between_runs() {
    let nb = notebook(&[("code", "(set x 1)")]);
    let opts = ExecuteOptions::default();
    let a = execute_notebook(&nb, "aaaa", &FsSuiteLoader, &opts).expect("run");
    let names_a: Vec<String> = a
        .names()
        .filter(|n| n.starts_with("check_results_"))
        .map(str::to_string)
        .collect();
    assert_eq!(names_a, vec!["check_results_aaaa".to_string()]);

    let mut initial = Bindings::new();
    initial.insert("check_results_aaaa", Value::Int(0));
    // A colliding student binding of a *guessed* name does not disturb a
    // run with a different secret.
    let opts = ExecuteOptions {
        initial: Some(initial),
        ..ExecuteOptions::default()
    };
    let b = execute_notebook(&nb, "bbbb", &FsSuiteLoader, &opts).expect("run");
    assert!(b.get("check_results_bbbb").is_some());
}
