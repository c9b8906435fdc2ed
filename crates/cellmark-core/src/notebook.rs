use std::path::Path;

use serde::Deserialize;

use crate::error::{ExecError, ExecErrorKind};

/// A notebook document: an ordered sequence of cells. Only the fields the
/// engine consumes are modeled; unknown document fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    pub source: CellSource,
}

impl Cell {
    pub fn is_code(&self) -> bool {
        self.cell_type == "code"
    }
}

/// Cell source as stored on disk: either one string or an ordered list of
/// line strings (both appear in the wild).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl CellSource {
    /// Line view regardless of representation. Line-list sources may carry
    /// their own trailing newlines; those are trimmed so both forms re-join
    /// identically.
    pub fn lines(&self) -> Vec<&str> {
        match self {
            CellSource::Text(s) => s.split('\n').collect(),
            CellSource::Lines(lines) => lines
                .iter()
                .map(|l| l.strip_suffix('\n').unwrap_or(l))
                .collect(),
        }
    }
}

impl Notebook {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ExecError> {
        serde_json::from_slice(bytes)
            .map_err(|err| ExecError::new(ExecErrorKind::Parse, format!("notebook JSON: {err}")))
    }

    pub fn from_path(path: &Path) -> Result<Self, ExecError> {
        let bytes = std::fs::read(path).map_err(|err| {
            ExecError::new(
                ExecErrorKind::Io,
                format!("read notebook {}: {err}", path.display()),
            )
        })?;
        Self::from_json(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_source_shapes() {
        let nb = Notebook::from_json(
            br##"{"cells": [
                {"cell_type": "code", "source": "(set x 1)\n(set y 2)"},
                {"cell_type": "markdown", "source": ["# prose\n"]},
                {"cell_type": "code", "source": ["(set z 3)\n", "(print z)"]}
            ]}"##,
        )
        .expect("parse");
        assert_eq!(nb.cells.len(), 3);
        assert!(nb.cells[0].is_code());
        assert!(!nb.cells[1].is_code());
        assert_eq!(nb.cells[0].source.lines(), vec!["(set x 1)", "(set y 2)"]);
        assert_eq!(nb.cells[2].source.lines(), vec!["(set z 3)", "(print z)"]);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let err = Notebook::from_json(b"{").expect_err("must fail");
        assert_eq!(err.kind, ExecErrorKind::Parse);
    }
}
