use crate::errors::ToolError;
use serde_json::Value;

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut curr = Vec::with_capacity(prev.len());
        curr.push(i + 1);
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr.push((prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost));
        }
        prev = curr;
    }
    prev[b_chars.len()]
}

/// Known actions close to `input`, best first.
pub fn closest_actions(input: &str, known: &[&str], limit: usize) -> Vec<String> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let allowed = (needle.len() / 3).max(1);
    let mut scored: Vec<(usize, &str)> = known
        .iter()
        .map(|candidate| {
            let score = if candidate.contains(needle.as_str()) || needle.contains(candidate) {
                1
            } else {
                edit_distance(&needle, candidate)
            };
            (score, *candidate)
        })
        .filter(|(score, _)| *score <= allowed)
        .collect();
    scored.sort();
    scored
        .into_iter()
        .take(limit.max(1))
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

pub fn unknown_action_error(tool: &str, action: Option<&Value>, known: &[&str]) -> ToolError {
    let action = action.and_then(Value::as_str).unwrap_or("");
    let suggestions = closest_actions(action, known, 3);
    let mut hint = format!("Use one of: {}.", known.join(", "));
    if !suggestions.is_empty() {
        hint = format!("Did you mean: {}? {}", suggestions.join(", "), hint);
    }
    ToolError::invalid_params(format!("Unknown {} action: {}", tool, action))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known,
            "did_you_mean": suggestions,
        }))
}
