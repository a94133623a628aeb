//! Team assignment matcher.
//!
//! A pure scoring function over the team roster and one subtask. No I/O,
//! no generation calls, no randomness: the same inputs in the same order
//! always produce the same ranked output.

use std::collections::HashSet;

use tw_core::types::{MatchResult, MemberStatus, Subtask, TeamMember};

/// Points per skill token found in the subtask text.
const SKILL_POINTS: u32 = 2;
/// Points per expertise tag found in the subtask text (expertise is a
/// stronger signal than a raw skill).
const EXPERTISE_POINTS: u32 = 3;
/// Points when the subtask role and member role overlap.
const ROLE_POINTS: u32 = 5;
/// Points when the member currently has idle capacity.
const IDLE_POINTS: u32 = 2;

/// Number of candidates returned per subtask.
const TOP_N: usize = 3;

/// Rank team members against a subtask, best first.
///
/// Members scoring zero are excluded entirely; when nobody scores, the
/// caller falls back to the "Unassigned" sentinel rather than forcing an
/// arbitrary assignment. Ties keep roster order (stable sort), so repeated
/// calls are deterministic.
pub fn match_members(subtask: &Subtask, team: &[TeamMember]) -> Vec<MatchResult> {
    let haystack = format!(
        "{} {} {}",
        subtask.title, subtask.description, subtask.role
    )
    .to_lowercase();
    let tokens: HashSet<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut results: Vec<MatchResult> = Vec::new();

    for member in team {
        let mut score = 0u32;
        let mut reasons = Vec::new();

        for skill in &member.skills {
            if contains_term(&tokens, &haystack, skill) {
                score += SKILL_POINTS;
                reasons.push(format!("skill '{skill}'"));
            }
        }

        for tag in &member.expertise {
            if contains_term(&tokens, &haystack, tag) {
                score += EXPERTISE_POINTS;
                reasons.push(format!("expertise '{tag}'"));
            }
        }

        let member_role = member.role.to_lowercase();
        let subtask_role = subtask.role.to_lowercase();
        if !member_role.is_empty()
            && !subtask_role.is_empty()
            && (member_role.contains(&subtask_role) || subtask_role.contains(&member_role))
        {
            score += ROLE_POINTS;
            reasons.push(format!("role overlap '{}'", member.role));
        }

        if member.status() == MemberStatus::Idle {
            score += IDLE_POINTS;
            reasons.push("idle capacity".to_string());
        }

        if score > 0 {
            results.push(MatchResult {
                member: member.clone(),
                score,
                match_reasons: reasons,
            });
        }
    }

    // Stable sort keeps first-seen members ahead on ties.
    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.truncate(TOP_N);
    results
}

/// Whether a skill/expertise term appears in the subtask text. Single-word
/// terms must match a whole token; multi-word terms match as a substring.
fn contains_term(tokens: &HashSet<&str>, haystack: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    if term.is_empty() {
        return false;
    }
    if term.split_whitespace().count() > 1 {
        haystack.contains(&term)
    } else {
        tokens.contains(term.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
