use std::path::PathBuf;

use clap::Parser;

mod batch;

/// Grade a directory of cellscript notebooks or scripts against
/// instructor-authored verification suites.
#[derive(Parser, Debug)]
#[command(name = "cellmark")]
#[command(about = "Batch grader for cellscript notebooks.", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory containing the submissions to grade.
    pub submissions_dir: PathBuf,

    /// Grade `*.cms` scripts instead of `*.cmnb` notebooks.
    #[arg(long)]
    pub scripts: bool,

    /// Random seed applied before each cell (intercell seeding).
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Overrides the suite directory embedded in rewritten `use-tests`
    /// constructions.
    #[arg(long, value_name = "DIR")]
    pub test_dir: Option<PathBuf>,

    /// Glob (relative to the submissions directory) for instructor suites
    /// to grade even when a document never calls them.
    #[arg(long, value_name = "PATTERN", default_value = "tests/*.cms")]
    pub tests_glob: String,

    /// Output CSV path.
    #[arg(long, value_name = "PATH", default_value = "grades.csv")]
    pub out: PathBuf,

    /// Also print the batch report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Print per-document score details to stderr.
    #[arg(long)]
    pub verbose: bool,

    /// Do not ignore execution failures (the first failure in a document
    /// surfaces; other documents still continue).
    #[arg(long)]
    pub debug: bool,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> anyhow::Result<std::process::ExitCode> {
    let cli = Cli::parse();
    batch::cmd_grade(cli)
}
