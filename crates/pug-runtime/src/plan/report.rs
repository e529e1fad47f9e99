//! Plan and apply report parsing.

use crate::task::Report;
use crate::text::{self, strip_ansi};
use crate::tfjson::{self, Action, Body, Message};
use crate::PugError;
use regex::Regex;
use std::sync::OnceLock;

static PLAN: OnceLock<Regex> = OnceLock::new();
static APPLY: OnceLock<Regex> = OnceLock::new();
static DESTROY: OnceLock<Regex> = OnceLock::new();

fn count(caps: &regex::Captures<'_>, i: usize) -> Result<u32, PugError> {
    caps[i]
        .parse()
        .map_err(|e| PugError::parse("report", e))
}

/// Parses the human-readable output of `terraform plan`.
///
/// Returns the report and whether the plan has changes. The patterns
/// are tried in order and the first match wins:
///
/// | Output contains | Report | Changes |
/// |-----------------|--------|---------|
/// | `No changes.` | empty | no |
/// | `Plan: A to add, C to change, D to destroy.` | `A, C, D` | yes |
/// | `Changes to Outputs:` | empty | yes |
///
/// # Errors
///
/// Returns [`PugError::UnexpectedOutput`] if none match.
pub fn parse_plan_report(output: &str) -> Result<(Report, bool), PugError> {
    let output = strip_ansi(output);
    if output.contains("No changes.") {
        return Ok((Report::default(), false));
    }
    let re = text::regex(
        &PLAN,
        r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy\.",
    )?;
    if let Some(caps) = re.captures(&output) {
        let report = Report::new(count(&caps, 1)?, count(&caps, 2)?, count(&caps, 3)?);
        return Ok((report, true));
    }
    if output.contains("Changes to Outputs:") {
        return Ok((Report::default(), true));
    }
    Err(PugError::unexpected_output("plan"))
}

/// Parses the output of `terraform apply`.
///
/// # Errors
///
/// Returns [`PugError::UnexpectedOutput`] if the output has no apply,
/// destroy or no-changes line.
pub fn parse_apply_report(output: &str) -> Result<Report, PugError> {
    let output = strip_ansi(output);
    let apply = text::regex(
        &APPLY,
        r"Apply complete! Resources: (\d+) added, (\d+) changed, (\d+) destroyed\.",
    )?;
    if let Some(caps) = apply.captures(&output) {
        return Ok(Report::new(count(&caps, 1)?, count(&caps, 2)?, count(&caps, 3)?));
    }
    let destroy = text::regex(&DESTROY, r"Destroy complete! Resources: (\d+) destroyed\.")?;
    if let Some(caps) = destroy.captures(&output) {
        return Ok(Report::new(0, 0, count(&caps, 1)?));
    }
    if output.contains("No changes.") {
        return Ok(Report::default());
    }
    Err(PugError::unexpected_output("apply"))
}

/// Takes a plan report from `-json` output.
///
/// The last `change_summary` message gives the counts; changed outputs
/// alone also count as changes. Without a summary, the messages' text
/// is parsed as in [`parse_plan_report`].
///
/// # Errors
///
/// Returns [`PugError::UnexpectedOutput`] if neither yields a report.
pub fn parse_json_plan_report(output: &[u8]) -> Result<(Report, bool), PugError> {
    let messages = tfjson::parse_messages(output);
    if let Some(changes) = tfjson::change_summary(&messages) {
        let report = Report::new(changes.add, changes.change, changes.remove);
        let has_changes = !report.is_empty() || outputs_changed(&messages);
        return Ok((report, has_changes));
    }
    let text: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
    parse_plan_report(&text.join("\n"))
}

fn outputs_changed(messages: &[Message]) -> bool {
    messages.iter().any(|m| match &m.body {
        Body::Outputs { outputs } => outputs
            .values()
            .any(|o| o.action.is_some_and(|a| a != Action::Noop)),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_changes() {
        let out = "\x1b[1mPlan:\x1b[0m 2 to add, 1 to change, 0 to destroy.\n";
        assert_eq!(parse_plan_report(out).unwrap(), (Report::new(2, 1, 0), true));
    }

    #[test]
    fn plan_without_changes() {
        let out = "No changes. Your infrastructure matches the configuration.\n";
        assert_eq!(parse_plan_report(out).unwrap(), (Report::default(), false));
    }

    #[test]
    fn plan_with_output_changes_only() {
        let out = "Changes to Outputs:\n  + name = \"x\"\n";
        assert_eq!(parse_plan_report(out).unwrap(), (Report::default(), true));
    }

    #[test]
    fn plan_with_unknown_output_fails() {
        let err = parse_plan_report("Error: something broke").unwrap_err();
        assert_eq!(err, PugError::unexpected_output("plan"));
    }

    #[test]
    fn apply_reports() {
        let out = "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.\n";
        assert_eq!(parse_apply_report(out).unwrap(), Report::new(1, 0, 0));

        let out = "\x1b[32mDestroy complete! Resources: 3 destroyed.\x1b[0m";
        assert_eq!(parse_apply_report(out).unwrap(), Report::new(0, 0, 3));

        assert!(parse_apply_report("No changes.").unwrap().is_empty());
        assert!(parse_apply_report("garbage").is_err());
    }

    #[test]
    fn json_plan_uses_change_summary() {
        let out = br#"{"@level":"info","@message":"Plan: 0 to add, 0 to change, 2 to destroy.","changes":{"add":0,"change":0,"remove":2,"operation":"plan"},"type":"change_summary"}"#;
        assert_eq!(parse_json_plan_report(out).unwrap(), (Report::new(0, 0, 2), true));
    }

    #[test]
    fn json_plan_counts_output_changes() {
        let out = concat!(
            r#"{"@level":"info","@message":"Outputs: 1","outputs":{"x":{"sensitive":false,"action":"update"}},"type":"outputs"}"#,
            "\n",
            r#"{"@level":"info","@message":"Plan: 0 to add, 0 to change, 0 to destroy.","changes":{"add":0,"change":0,"remove":0,"operation":"plan"},"type":"change_summary"}"#,
        );
        assert_eq!(
            parse_json_plan_report(out.as_bytes()).unwrap(),
            (Report::default(), true)
        );
    }

    #[test]
    fn json_plan_falls_back_to_message_text() {
        let out = br#"{"@level":"info","@message":"No changes. Your infrastructure matches the configuration.","type":"unknown_thing"}"#;
        assert_eq!(parse_json_plan_report(out).unwrap(), (Report::default(), false));
    }
}
