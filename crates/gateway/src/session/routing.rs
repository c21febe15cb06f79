// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing scoring and session turn dynamics.
//!
//! Scoring is a pure function of the input text and the session state:
//! keyword hits against a fixed rule table, a decaying bonus for the sticky
//! provider, Jaccard-based topic-drift tracking, and a streak detector for
//! provider-switch suggestions. The constants here are load-bearing defaults;
//! tests pin them.

use std::collections::HashSet;

use crate::events::{RoutingCandidate, RoutingDecision, RunMode};

use super::SessionState;

/// Base score for a single keyword hit.
pub const SCORE_BASE: f64 = 0.45;
/// Additional score per keyword hit.
pub const SCORE_PER_HIT: f64 = 0.18;
/// Upper bound for any keyword-derived score.
pub const SCORE_CAP: f64 = 0.95;
/// Minimum score for a candidate to be selected.
pub const SELECTION_THRESHOLD: f64 = 0.55;
/// When the top two selected candidates are closer than this, ask the user.
pub const CONFIRMATION_MARGIN: f64 = 0.10;
/// Lead over the sticky provider that starts a switch-lead streak.
pub const SWITCH_LEAD_MARGIN: f64 = 0.15;
/// Sticky bonus lost per turn.
pub const STICKY_DECAY: f64 = 0.03;
/// Sticky bonus granted on first leadership or an explicit switch.
pub const STICKY_DEFAULT_BOOST: f64 = 0.15;
/// Jaccard similarity below which a turn counts as topic drift.
pub const DRIFT_SIMILARITY_THRESHOLD: f64 = 0.30;
/// Consecutive drift turns before a new-session suggestion.
pub const DRIFT_STREAK_TRIGGER: u32 = 2;
/// Consecutive leading turns before a switch suggestion.
pub const SWITCH_STREAK_TRIGGER: u32 = 2;

/// Provider selected when no candidate passes the threshold.
pub const FALLBACK_PROVIDER: &str = "builtin_chat";

/// One routable provider and the keywords that select it.
pub struct ProviderRule {
    pub id: &'static str,
    pub keywords: &'static [&'static str],
}

/// Routing rule table. Order is the deterministic tie-break.
pub const PROVIDER_RULES: &[ProviderRule] = &[
    ProviderRule {
        id: "plan",
        keywords: &["plan", "planning", "schedule", "roadmap", "goal", "计划", "规划", "安排"],
    },
    ProviderRule {
        id: "work",
        keywords: &["work", "task", "project", "deadline", "meeting", "工作", "任务", "项目"],
    },
    ProviderRule {
        id: "reminder",
        keywords: &["remind", "reminder", "alarm", "提醒", "闹钟"],
    },
];

/// Whether `provider_id` is in the rule table.
pub fn is_known_provider(provider_id: &str) -> bool {
    provider_id == FALLBACK_PROVIDER || PROVIDER_RULES.iter().any(|r| r.id == provider_id)
}

/// Lowercased Unicode alphanumeric tokens.
pub fn tokenize(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Jaccard similarity of two token sets. Empty-vs-empty is 1.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

/// Score every provider against the text. Only positive scores are kept;
/// order is score-descending with the rule table breaking exact ties.
pub fn score_providers(
    text: &str,
    sticky_provider_id: Option<&str>,
    sticky_score_boost: f64,
) -> Vec<RoutingCandidate> {
    let lowered = text.to_lowercase();
    let mut candidates = Vec::new();

    for rule in PROVIDER_RULES {
        let hits = rule.keywords.iter().filter(|k| lowered.contains(&k.to_lowercase())).count();
        let mut score =
            if hits > 0 { SCORE_CAP.min(SCORE_BASE + SCORE_PER_HIT * hits as f64) } else { 0.0 };
        let mut reason = if hits > 0 {
            format!("matched {hits} keyword{}", if hits == 1 { "" } else { "s" })
        } else {
            "no keyword match".to_owned()
        };
        if sticky_provider_id == Some(rule.id) && sticky_score_boost > 0.0 {
            score = (score + sticky_score_boost).min(1.0);
            reason.push_str(", sticky bonus");
        }
        if score > 0.0 {
            candidates.push(RoutingCandidate {
                provider_id: rule.id.to_owned(),
                score,
                reason,
                requires_clarification: false,
                suggested_mode: RunMode::Async,
            });
        }
    }

    // Stable sort keeps rule-table order on exact ties.
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

/// Everything one routed turn produces besides the events themselves.
pub struct TurnOutcome {
    pub decision: RoutingDecision,
    /// Candidates that passed the selection threshold (at most two).
    pub selected: Vec<RoutingCandidate>,
    /// Suggest starting a new session (topic drifted twice in a row).
    pub suggest_new_session: bool,
    /// Suggest switching the sticky provider to this id.
    pub suggest_switch_to: Option<String>,
}

/// Advance the session's routing state by one turn and compute the decision.
pub fn apply_turn(session: &mut SessionState, text: Option<&str>) -> TurnOutcome {
    session.sticky_score_boost = (session.sticky_score_boost - STICKY_DECAY).max(0.0);

    if let Some(text) = text {
        update_topic_drift(session, text);
    }

    let candidates = match text {
        Some(text) => {
            score_providers(text, session.sticky_provider_id.as_deref(), session.sticky_score_boost)
        }
        None => Vec::new(),
    };

    let mut selected: Vec<RoutingCandidate> =
        candidates.iter().filter(|c| c.score >= SELECTION_THRESHOLD).take(2).cloned().collect();

    let requires_user_confirmation =
        selected.len() == 2 && (selected[0].score - selected[1].score) < CONFIRMATION_MARGIN;
    if requires_user_confirmation {
        for candidate in &mut selected {
            candidate.requires_clarification = true;
        }
    }

    let suggest_switch_to = update_switch_lead(session, &candidates);

    // A fresh session adopts the first selected leader as sticky.
    if session.sticky_provider_id.is_none() {
        if let Some(leader) = selected.first() {
            session.sticky_provider_id = Some(leader.provider_id.clone());
            session.sticky_score_boost = STICKY_DEFAULT_BOOST;
        }
    }

    let fallback = if selected.is_empty() { FALLBACK_PROVIDER.to_owned() } else { "none".to_owned() };
    let suggest_new_session = text.is_some() && session.topic_drift_streak >= DRIFT_STREAK_TRIGGER;

    TurnOutcome {
        decision: RoutingDecision { candidates, requires_user_confirmation, fallback },
        selected,
        suggest_new_session,
        suggest_switch_to,
    }
}

/// Explicit `switch_provider:<id>` interaction: adopt the provider as sticky
/// and clear the lead streak.
pub fn apply_switch(session: &mut SessionState, provider_id: &str, now: u64) {
    session.sticky_provider_id = Some(provider_id.to_owned());
    session.sticky_score_boost = STICKY_DEFAULT_BOOST;
    session.switch_lead_provider_id = None;
    session.switch_lead_streak = 0;
    session.last_switch_ts = Some(now);
}

fn update_topic_drift(session: &mut SessionState, text: &str) {
    if let Some(ref last) = session.last_user_text {
        let similarity = jaccard(&tokenize(last), &tokenize(text));
        if similarity < DRIFT_SIMILARITY_THRESHOLD {
            session.topic_drift_streak += 1;
        } else {
            session.topic_drift_streak = 0;
        }
    }
    session.last_user_text = Some(text.to_owned());
}

fn update_switch_lead(
    session: &mut SessionState,
    candidates: &[RoutingCandidate],
) -> Option<String> {
    let sticky = session.sticky_provider_id.clone()?;
    let top = candidates.first()?;
    if top.provider_id == sticky {
        session.switch_lead_provider_id = None;
        session.switch_lead_streak = 0;
        return None;
    }

    let sticky_score = candidates
        .iter()
        .find(|c| c.provider_id == sticky)
        .map(|c| c.score)
        .unwrap_or(0.0);
    if top.score - sticky_score >= SWITCH_LEAD_MARGIN {
        if session.switch_lead_provider_id.as_deref() == Some(&top.provider_id) {
            session.switch_lead_streak += 1;
        } else {
            session.switch_lead_provider_id = Some(top.provider_id.clone());
            session.switch_lead_streak = 1;
        }
        if session.switch_lead_streak >= SWITCH_STREAK_TRIGGER {
            return Some(top.provider_id.clone());
        }
    } else {
        session.switch_lead_provider_id = None;
        session.switch_lead_streak = 0;
    }
    None
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
