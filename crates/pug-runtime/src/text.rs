//! Helpers for reading tool output.

use crate::PugError;
use regex::Regex;
use std::sync::OnceLock;

/// Compiles `pattern` once into `cell`.
///
/// # Errors
///
/// Returns [`PugError::Parse`] if the pattern does not compile.
pub(crate) fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex, PugError> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern).map_err(|e| PugError::parse("pattern", e))?;
    Ok(cell.get_or_init(|| re))
}

/// Removes ANSI escape sequences (colours, cursor movement).
#[must_use]
pub fn strip_ansi(s: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    match regex(&ANSI, r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07") {
        Ok(re) => re.replace_all(s, "").into_owned(),
        Err(_) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_colour_codes() {
        let coloured = "\x1b[0m\x1b[1m\x1b[32mApply complete!\x1b[0m";
        assert_eq!(strip_ansi(coloured), "Apply complete!");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(strip_ansi("No changes."), "No changes.");
    }

    #[test]
    fn regex_is_compiled_once() {
        static CELL: OnceLock<Regex> = OnceLock::new();
        let a = regex(&CELL, "a+").unwrap() as *const Regex;
        let b = regex(&CELL, "ignored").unwrap() as *const Regex;
        assert_eq!(a, b);
    }
}
