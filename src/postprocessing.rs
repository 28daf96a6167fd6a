use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors found while reading the averaged field file written by the solver.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no data lines found")]
    Empty,
    #[error("expected at least 2 columns in {0:?}")]
    MissingColumn(String),
    #[error("malformed vector {0:?}")]
    MalformedVector(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

/// One line of a `volFieldValue.dat` file: a time value followed by the averaged vector.
///
/// Lines look like `0.2 (2.5 0 0)`. Extra columns after the vector are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldAverage {
    pub time: f64,
    pub value: [f64; 3],
}

/// Parses a finite real number. Diverged solvers write `nan` or `inf`, which are rejected.
fn parse_number(s: &str) -> Result<f64, ParseError> {
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(ParseError::InvalidNumber(s.to_string())),
    }
}

impl FromStr for FieldAverage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (time, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| ParseError::MissingColumn(line.to_string()))?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            return Err(ParseError::MissingColumn(line.to_string()));
        }
        let time = parse_number(time)?;

        // The vector column is the parenthesized group right after the time column,
        // and it must be followed by whitespace or the end of the line
        let vector = rest
            .strip_prefix('(')
            .and_then(|r| r.split_once(')'))
            .filter(|(_, tail)| tail.is_empty() || tail.starts_with(char::is_whitespace))
            .map(|(inner, _)| inner)
            .ok_or_else(|| ParseError::MalformedVector(rest.to_string()))?;
        let components: Vec<&str> = vector.split_whitespace().collect();
        if components.len() != 3 {
            return Err(ParseError::MalformedVector(format!("({vector})")));
        }
        let mut value = [0.; 3];
        for (v, c) in value.iter_mut().zip(components) {
            *v = parse_number(c)?;
        }
        Ok(Self { time, value })
    }
}

/// Parses the last data line of an averaged field file.
/// Empty lines and `#` comment lines are skipped.
pub fn parse_last(content: &str) -> Result<FieldAverage, ParseError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .last()
        .ok_or(ParseError::Empty)?
        .parse()
}

/// Reads the file at `path` and parses its last data line.
pub fn read_last(path: &Path) -> Result<FieldAverage, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_last(&content)
}
