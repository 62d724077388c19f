//! Extraction of a branch verdict from an agent's markdown output.

use regex::RegexBuilder;

use super::role::VerdictRule;

/// Decision read from an agent's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
    /// No heading found, or its value contains neither token.
    Undetermined,
}

impl Verdict {
    /// Normalized branch token, if the verdict was determined.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Verdict::Approve => Some("approve"),
            Verdict::Reject => Some("reject"),
            Verdict::Undetermined => None,
        }
    }
}

/// Find the first `#`/`##` heading for `field` and classify its value.
///
/// Matches lines like `## Verdict: APPROVE` (case-insensitive, `:` or `：`).
/// Only the first such heading counts. The value is upper-cased and tested for
/// *containment* of `approve_value` first, then `reject_value`.
///
/// Known ambiguity: a value containing both tokens as substrings resolves to
/// [`Verdict::Approve`] only because approve is tested first. The order is
/// kept as-is; it is not a domain precedence rule.
pub fn extract_verdict(
    content: &str,
    field: &str,
    approve_value: &str,
    reject_value: &str,
) -> Verdict {
    let pattern = format!(r"^##?\s*{}\s*[:：]\s*(.+)$", regex::escape(field));
    // The field is escaped, so the only possible failure is the size limit.
    let Ok(re) = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
    else {
        return Verdict::Undetermined;
    };

    let Some(value) = re
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_uppercase())
    else {
        return Verdict::Undetermined;
    };

    if value.contains(&approve_value.to_uppercase()) {
        return Verdict::Approve;
    }
    if value.contains(&reject_value.to_uppercase()) {
        return Verdict::Reject;
    }
    Verdict::Undetermined
}

/// [`extract_verdict`] driven by a role's verdict configuration.
pub fn extract_with_rule(content: &str, rule: &VerdictRule) -> Verdict {
    extract_verdict(
        content,
        &rule.field,
        &rule.approve_value,
        &rule.reject_value,
    )
}
