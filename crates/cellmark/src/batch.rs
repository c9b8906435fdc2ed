use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::Glob;
use serde::Serialize;
use serde_json::Value as Json;
use walkdir::WalkDir;

use cellmark_core::{grade_path, FsSuiteLoader, GradeOptions};

use crate::Cli;

pub const BATCH_REPORT_SCHEMA_VERSION: &str = "cellmark.batch_report@0.1.0";

const NOTEBOOK_EXT: &str = "cmnb";
const SCRIPT_EXT: &str = "cms";

#[derive(Debug, Serialize)]
struct BatchReport {
    schema_version: &'static str,
    submissions_dir: String,
    results: Vec<DocumentResult>,
}

#[derive(Debug, Serialize)]
struct DocumentResult {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scores: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn cmd_grade(cli: Cli) -> Result<std::process::ExitCode> {
    let dir = cli
        .submissions_dir
        .canonicalize()
        .with_context(|| format!("resolve submissions dir: {}", cli.submissions_dir.display()))?;

    let submissions = discover_submissions(&dir, cli.scripts)?;
    let suites = discover_suites(&dir, &cli.tests_glob)?;

    if cli.verbose {
        eprintln!(
            "cellmark: {} submission(s), {} discovered suite(s)",
            submissions.len(),
            suites.len()
        );
    }

    let opts = GradeOptions {
        ignore_errors: !cli.debug,
        script: cli.scripts,
        seed: cli.seed,
        cwd: Some(dir.clone()),
        test_dir: cli.test_dir.clone(),
        ..GradeOptions::default()
    };

    let mut results: Vec<DocumentResult> = Vec::with_capacity(submissions.len());
    for path in &submissions {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match grade_path(path, &suites, &[], &FsSuiteLoader, &opts) {
            Ok(mapping) => {
                let scores = mapping.to_json();
                if cli.verbose {
                    eprintln!("{file}: {scores}");
                }
                results.push(DocumentResult {
                    file,
                    scores: Some(scores),
                    error: None,
                });
            }
            Err(err) => {
                // A failed-and-not-ignored document gets no partial report;
                // the rest of the batch continues.
                eprintln!("{file}: {err}");
                results.push(DocumentResult {
                    file,
                    scores: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    write_csv(&cli.out, &results)
        .with_context(|| format!("write grades CSV: {}", cli.out.display()))?;

    if cli.json {
        let report = BatchReport {
            schema_version: BATCH_REPORT_SCHEMA_VERSION,
            submissions_dir: dir.display().to_string(),
            results,
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(std::process::ExitCode::SUCCESS)
}

fn discover_submissions(dir: &Path, scripts: bool) -> Result<Vec<PathBuf>> {
    let want_ext = if scripts { SCRIPT_EXT } else { NOTEBOOK_EXT };
    let mut out: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("list submissions dir: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(want_ext) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn discover_suites(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("invalid tests glob: {pattern}"))?
        .compile_matcher();

    let mut out: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or_else(|_| entry.path());
        if matcher.is_match(rel) {
            out.push(entry.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

/// One row per document, one column per question plus `total`/`possible`.
/// Documents that failed without a report leave their score cells empty.
fn write_csv(out_path: &Path, results: &[DocumentResult]) -> Result<()> {
    let mut questions: BTreeSet<String> = BTreeSet::new();
    for result in results {
        if let Some(Json::Object(map)) = &result.scores {
            for key in map.keys() {
                if key != "total" && key != "possible" {
                    questions.insert(key.clone());
                }
            }
        }
    }

    let mut csv = String::new();
    let mut header: Vec<String> = vec!["file".to_string()];
    header.extend(questions.iter().cloned());
    header.push("total".to_string());
    header.push("possible".to_string());
    push_csv_row(&mut csv, &header);

    for result in results {
        let mut row: Vec<String> = vec![result.file.clone()];
        match &result.scores {
            Some(Json::Object(map)) => {
                for q in &questions {
                    row.push(question_cell(map.get(q)));
                }
                row.push(number_cell(map.get("total")));
                row.push(number_cell(map.get("possible")));
            }
            _ => {
                for _ in 0..questions.len() + 2 {
                    row.push(String::new());
                }
            }
        }
        push_csv_row(&mut csv, &row);
    }

    std::fs::write(out_path, csv)?;
    Ok(())
}

fn question_cell(entry: Option<&Json>) -> String {
    let Some(entry) = entry else {
        return String::new();
    };
    number_cell(entry.get("score"))
}

fn number_cell(value: Option<&Json>) -> String {
    value.and_then(Json::as_f64).map(render_num).unwrap_or_default()
}

fn render_num(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn push_csv_row(out: &mut String, cells: &[String]) {
    let escaped: Vec<String> = cells.iter().map(|c| csv_escape(c)).collect();
    out.push_str(&escaped.join(","));
    out.push('\n');
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn integral_scores_render_without_decimals() {
        assert_eq!(render_num(1.0), "1");
        assert_eq!(render_num(0.5), "0.5");
    }
}
