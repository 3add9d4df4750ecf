// pin function inference for flip-flop cells
use crate::expr::{Expr, ParseError};
use crate::target::LibraryCell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("cell has no ff block")]
    NoFlop,
    #[error("ff block has no '{0}' attribute")]
    MissingAttribute(&'static str),
    #[error("cannot find pin '{0}'")]
    PinNotFound(String),
    #[error("unsupported expression '{0}'")]
    Unsupported(String),
    #[error("invalid expression '{expr}': {cause}")]
    Malformed { expr: String, cause: ParseError },
    #[error("expression '{expr}' does not contain ff output '{state}'")]
    NoFeedback { expr: String, state: String },
    #[error("expression '{expr}' depends on {count} pins, expected 2")]
    VariableCount { expr: String, count: usize },
    #[error("expression '{0}' does not evaluate to an enable flop")]
    NotEnableFlop(String),
    #[error("input pin '{0}' has no role")]
    UnexplainedInput(String),
    #[error("no output pin exposes the flop state")]
    NoStateOutput,
}

/// Data (and enable, if any) pins recovered from a `next_state` function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextState {
    pub data: String,
    pub data_noninverted: bool,
    pub enable: Option<(String, bool)>,
}

pub(crate) fn strip(text: &str, also: &[char]) -> String {
    text.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '"' && !also.contains(ch))
        .collect()
}

fn enclosed(text: &str) -> bool {
    if !(text.starts_with('(') && text.ends_with(')')) {
        return false;
    }
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return idx == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

// peels `x'`, `!x` and `(x)` layers, returning the core and whether it is
// taken non-inverted
fn peel(mut text: &str) -> (&str, bool) {
    let mut noninverted = true;
    loop {
        if let Some(inner) = text.strip_suffix('\'') {
            text = inner;
            noninverted = !noninverted;
        } else if let Some(inner) = text.strip_prefix('!') {
            text = inner;
            noninverted = !noninverted;
        } else if enclosed(text) {
            text = &text[1..text.len() - 1];
        } else {
            return (text, noninverted);
        }
    }
}

/// Resolves a single-pin attribute such as `clocked_on`, `clear` or `preset`
/// to a pin name and whether the pin is active high.
pub fn resolve_simple_pin(cell: &LibraryCell, expr: &str) -> Result<(String, bool), ClassifyError> {
    let value = strip(expr, &['(', ')']);
    let (pin_name, noninverted) = match (value.strip_suffix('\''), value.strip_prefix('!')) {
        (Some(name), _) => (name, false),
        (None, Some(name)) => (name, false),
        (None, None) => (value.as_str(), true),
    };
    if cell.has_pin(pin_name) {
        return Ok((pin_name.to_owned(), noninverted));
    }
    if pin_name.contains(['^', '*', '|', '&', '+']) {
        Err(ClassifyError::Unsupported(pin_name.to_owned()))
    } else {
        Err(ClassifyError::PinNotFound(pin_name.to_owned()))
    }
}

/// Resolves the data pin, and the enable pin if the function describes an
/// enable flop, from a `next_state` function.
///
/// A bare pin name (possibly negated or parenthesized) is taken as is. Any
/// other function must be a mux between the flop's own state and one pin,
/// selected by another pin; which pin is which, and the enable polarity, is
/// read off the function's truth table over the two pins and the state.
pub fn resolve_data_and_enable(
    cell: &LibraryCell,
    expr: &str,
) -> Result<NextState, ClassifyError> {
    let text = strip(expr, &[]);
    let (data, data_noninverted) = peel(&text);
    if !data.is_empty() && cell.has_pin(data) {
        return Ok(NextState {
            data: data.to_owned(),
            data_noninverted,
            enable: None,
        });
    }

    let tree = Expr::parse(&text).map_err(|cause| ClassifyError::Malformed {
        expr: text.clone(),
        cause,
    })?;
    let mut pins = tree.free_variables();

    let Some(ff) = &cell.ff else {
        return Err(ClassifyError::NoFlop);
    };
    let state = ff.state.as_str();
    if !pins.remove(state) {
        return Err(ClassifyError::NoFeedback {
            expr: text,
            state: state.to_owned(),
        });
    }
    let candidates: Vec<String> = pins.into_iter().collect();
    let [pin_a, pin_b] = &candidates[..] else {
        return Err(ClassifyError::VariableCount {
            expr: text,
            count: candidates.len(),
        });
    };

    // bit 0: pin_a, bit 1: pin_b, bit 2: state
    let mut lut = 0u8;
    let mut values = HashMap::new();
    for n in 0..8 {
        values.insert(pin_a.as_str(), n & 1 != 0);
        values.insert(pin_b.as_str(), n & 2 != 0);
        values.insert(state, n & 4 != 0);
        if tree.eval(&values) {
            lut |= 1 << n;
        }
    }

    let (data, enable, enable_noninverted) = match lut {
        0xD8 => (pin_b, pin_a, true),
        0xB8 => (pin_a, pin_b, true),
        0xE4 => (pin_b, pin_a, false),
        0xE2 => (pin_a, pin_b, false),
        _ => return Err(ClassifyError::NotEnableFlop(text)),
    };
    Ok(NextState {
        data: data.clone(),
        data_noninverted: true,
        enable: Some((enable.clone(), enable_noninverted)),
    })
}

/// Suppresses repeats of the same rejection reason for the same cell.
#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: HashSet<(String, String)>,
}

impl WarnOnce {
    pub fn skip(&mut self, cell: &str, error: &ClassifyError) {
        if self.seen.insert((cell.to_owned(), error.to_string())) {
            log::debug!("cell '{cell}': {error} - skipping");
        }
    }
}
