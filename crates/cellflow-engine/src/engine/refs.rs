//! Reference extraction from formula text.
//!
//! Scans a formula for identifier tokens that name other cells. A token
//! only becomes a reference if the sheet actually knows a cell by that
//! name, so formulas can mention host functions and keywords freely.
//! Tokens inside string literals are ignored.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::cell_id::CellId;

/// Extract all cell ids referenced by a formula, in identifier order.
///
/// `is_cell` decides whether a token names a cell. Self-references are
/// returned like any other reference; cycle detection rejects them later.
pub fn extract_references<F>(formula: &str, is_cell: F) -> Vec<CellId>
where
    F: Fn(&str) -> bool,
{
    // Ignore references inside string literals.
    let stripped = strip_string_literals(formula);

    let mut refs = BTreeSet::new();
    for m in ident_re().find_iter(&stripped) {
        let token = m.as_str();
        if is_cell(token)
            && let Some(id) = CellId::parse(token)
        {
            refs.insert(id);
        }
    }

    refs.into_iter().collect()
}

fn ident_re() -> &'static Regex {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    IDENT_RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("reference token regex must compile")
    })
}

/// Blank out single- and double-quoted literals, preserving length so
/// token boundaries stay put.
fn strip_string_literals(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in formula.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    out.push(' ');
                } else if ch == '\\' {
                    escaped = true;
                    out.push(' ');
                } else if ch == q {
                    quote = None;
                    out.push(q);
                } else {
                    out.push(' ');
                }
            }
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }

    out
}
