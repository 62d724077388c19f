//! Matching of free-text limit labels to stage names.
//!
//! Limits are declared as `label: threshold` with no explicit stage binding.
//! A label applies to a stage when their word sets overlap after splitting on
//! `_`, `-` and whitespace and dropping the filler words `max` and
//! `iterations` from the label. This is deliberately loose: `max_plan_iterations`
//! applies to `plan`, `planning_plan` and `plan_review` alike, and a stage whose
//! words overlap no label has no limit at all.
//!
//! Everything that decides applicability goes through [`limit_applies_to_stage`]
//! so an explicit stage binding can replace the heuristic in one place.

use std::collections::{BTreeMap, BTreeSet};

const FILLER_WORDS: &[&str] = &["max", "iterations"];

/// True if the limit `label` is considered to govern `stage`.
pub fn limit_applies_to_stage(label: &str, stage: &str) -> bool {
    let stage_words = words(stage);
    let label_words: BTreeSet<String> = words(label)
        .into_iter()
        .filter(|word| !FILLER_WORDS.contains(&word.as_str()))
        .collect();
    !stage_words.is_disjoint(&label_words)
}

/// Limits applicable to `stage`, in label order.
pub fn applicable_limits<'a>(
    limits: &'a BTreeMap<String, u32>,
    stage: &str,
) -> impl Iterator<Item = (&'a str, u32)> {
    limits
        .iter()
        .filter(move |(label, _)| limit_applies_to_stage(label, stage))
        .map(|(label, threshold)| (label.as_str(), *threshold))
}

fn words(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}
