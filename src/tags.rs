//! `%sens(start, end, n)` sweep tags in box files
//!
//! Tags are read from the raw text before YAML parsing. The key path of a
//! tagged line is rebuilt from indentation, the tag is cut from the line and
//! the cleaned text is returned for the regular parser.

use std::fmt;

use crate::grid::linspace;
use crate::RadsimError;

pub const SENS_TAG: &str = "%sens";

/// One swept configuration leaf: its key path and the percentage range of
/// its nominal value
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityParameter {
    pub path: Vec<String>,
    pub start_pct: f64,
    pub end_pct: f64,
    pub n_points: usize,
}

impl SensitivityParameter {
    pub fn new(path: Vec<String>, start_pct: f64, end_pct: f64, n_points: usize) -> Self {
        Self {
            path,
            start_pct,
            end_pct,
            n_points,
        }
    }

    /// Path joined with `/`, used as output key
    pub fn key(&self) -> String {
        self.path.join("/")
    }

    /// Multiplicative factors applied to the nominal value
    pub fn factors(&self) -> Vec<f64> {
        linspace(self.start_pct, self.end_pct, self.n_points)
            .into_iter()
            .map(|pct| pct / 100.0)
            .collect()
    }
}

impl fmt::Display for SensitivityParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}({}, {}, {})",
            self.key(),
            SENS_TAG,
            self.start_pct,
            self.end_pct,
            self.n_points
        )
    }
}

fn parse_arguments(line_no: usize, line: &str, raw: &str) -> Result<(f64, f64, usize), RadsimError> {
    let invalid = |reason: &str| {
        RadsimError::InvalidConfig(format!(
            "invalid {SENS_TAG} tag at line {line_no} ('{}'): {reason}",
            line.trim()
        ))
    };

    let open = raw
        .find('(')
        .ok_or_else(|| invalid("tag must be followed by '('"))?;
    let close = raw
        .find(')')
        .filter(|&close| close > open)
        .ok_or_else(|| invalid("tag must be closed with ')'"))?;

    let numbers = raw[open + 1..close]
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| invalid("arguments must be numbers"))?;

    match numbers.as_slice() {
        [start, end, n] if start.is_finite() && end.is_finite() => {
            if *n < 1.0 || n.fract() != 0.0 {
                return Err(invalid("number of points must be a positive integer"));
            }
            Ok((*start, *end, *n as usize))
        }
        [_, _, _] => Err(invalid("range bounds must be finite")),
        _ => Err(invalid("expected (start_pct, end_pct, n_points)")),
    }
}

/// Part of a line before its `#` comment; a `#` inside quotes or glued to
/// the preceding token does not start a comment
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut prev = ' ';
    for (pos, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') if prev.is_whitespace() => return &line[..pos],
            _ => {}
        }
        prev = c;
    }
    line
}

/// Strip every sweep tag from `text`, returning the cleaned text and the
/// tagged parameters in file order
pub fn extract_sens_tags(text: &str) -> Result<(String, Vec<SensitivityParameter>), RadsimError> {
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut params = Vec::new();
    let mut cleaned = String::with_capacity(text.len());

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let code = strip_comment(line);
        let content = code.trim_start();
        let indent = code.len() - content.len();

        let mut kept = line;
        if content.starts_with('-') {
            if content.contains(SENS_TAG) {
                return Err(RadsimError::InvalidConfig(format!(
                    "{SENS_TAG} tag at line {line_no} is on a list item; tag the list key instead"
                )));
            }
        } else if !content.trim().is_empty() {
            if let Some(colon) = content.find(':') {
                let key = content[..colon].trim().trim_matches(|c| c == '"' || c == '\'');
                while stack.last().is_some_and(|(level, _)| *level >= indent) {
                    stack.pop();
                }
                stack.push((indent, key.to_string()));
            }

            if let Some(pos) = code.find(SENS_TAG) {
                if !content.contains(':') {
                    return Err(RadsimError::InvalidConfig(format!(
                        "{SENS_TAG} tag at line {line_no} is not attached to a key"
                    )));
                }
                let (start, end, n) = parse_arguments(line_no, line, &code[pos + SENS_TAG.len()..])?;
                let path = stack.iter().map(|(_, key)| key.clone()).collect();
                params.push(SensitivityParameter::new(path, start, end, n));
                kept = code[..pos].trim_end();
            }
        }

        cleaned.push_str(kept);
        cleaned.push('\n');
    }

    Ok((cleaned, params))
}
