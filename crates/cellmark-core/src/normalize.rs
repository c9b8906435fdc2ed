use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::interp::DEFAULT_SUITE_DIR;
use crate::notebook::CellSource;

/// Reserved prefix for interactive directive lines ("magics"); they have no
/// meaning outside a live session and are dropped wholesale.
pub const DIRECTIVE_PREFIX: &str = "%";

fn use_tests_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\(use-tests\s+"[^"]*"\s*\)"#).expect("use-tests regex"))
}

fn rewrite_use_tests(line: &str, suite_dir: &str) -> String {
    let replacement = format!("(use-tests \"{suite_dir}\")");
    use_tests_re()
        .replace_all(line, regex::NoExpand(&replacement))
        .into_owned()
}

fn resolved_suite_dir(test_dir: Option<&Path>) -> String {
    match test_dir {
        Some(dir) => dir.display().to_string(),
        None => DEFAULT_SUITE_DIR.to_string(),
    }
}

/// Normalize one cell into a single executable source string:
/// directive lines and interactive-widget lines are dropped, suite-lookup
/// constructions are rebound to the resolved suite directory, and line
/// endings are re-joined identically for both source representations.
/// A cell with no surviving lines yields the empty string.
pub fn normalize_cell(source: &CellSource, test_dir: Option<&Path>) -> String {
    let suite_dir = resolved_suite_dir(test_dir);
    let mut out_lines: Vec<String> = Vec::new();

    for line in source.lines() {
        if line.starts_with(DIRECTIVE_PREFIX) {
            continue;
        }
        if line.contains("(interact") {
            continue;
        }
        if use_tests_re().is_match(line) {
            out_lines.push(rewrite_use_tests(line, &suite_dir));
        } else {
            out_lines.push(line.to_string());
        }
    }

    while matches!(out_lines.last(), Some(l) if l.is_empty()) {
        out_lines.pop();
    }
    if out_lines.is_empty() {
        return String::new();
    }
    let mut joined = out_lines.join("\n");
    joined.push('\n');
    joined
}

/// Script-mode normalization: scripts are plain source, so only the
/// suite-lookup rebinding applies (directives never appear in scripts).
pub fn normalize_script(source: &str, test_dir: Option<&Path>) -> String {
    let suite_dir = resolved_suite_dir(test_dir);
    let lines: Vec<String> = source
        .split('\n')
        .map(|line| rewrite_use_tests(line, &suite_dir))
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn text(s: &str) -> CellSource {
        CellSource::Text(s.to_string())
    }

    #[test]
    fn drops_directive_and_widget_lines() {
        let src = text("%time\n(set x 1)\n(interact slider)\n(print x)");
        let out = normalize_cell(&src, None);
        assert_eq!(out, "(set x 1)\n(print x)\n");
    }

    #[test]
    fn rewrites_use_tests_to_the_default_dir() {
        let src = text("(use-tests \"/srv/course/tests\")");
        let out = normalize_cell(&src, None);
        assert_eq!(out, "(use-tests \"tests\")\n");
    }

    #[test]
    fn rewrites_use_tests_to_the_override() {
        let src = text("(set nb (use-tests \"wherever\"))");
        let out = normalize_cell(&src, Some(&PathBuf::from("grading/tests")));
        assert_eq!(out, "(set nb (use-tests \"grading/tests\"))\n");
    }

    #[test]
    fn line_list_and_text_sources_normalize_identically() {
        let as_text = text("(set x 1)\n(set y 2)");
        let as_lines = CellSource::Lines(vec!["(set x 1)\n".to_string(), "(set y 2)".to_string()]);
        assert_eq!(
            normalize_cell(&as_text, None),
            normalize_cell(&as_lines, None)
        );
    }

    #[test]
    fn empty_after_filtering_yields_empty_source() {
        let src = text("%magic\n%%more-magic\n(interact w)");
        assert_eq!(normalize_cell(&src, None), "");
        assert_eq!(normalize_cell(&text(""), None), "");
    }

    #[test]
    fn script_mode_keeps_directive_lines() {
        let out = normalize_script("%not-a-magic-here\n(use-tests \"x\")", None);
        assert_eq!(out, "%not-a-magic-here\n(use-tests \"tests\")");
    }
}
