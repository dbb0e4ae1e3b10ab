//! Frequency capping: limits how often a tag's (or CTA's) prompts are shown.

use serde::Serialize;
use thunder_core::types::{EpochMillis, ExposureRule};

/// The cap that turned an exposure down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureCap {
    Session,
    Window,
    Lifespan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExposureVerdict {
    pub eligible: bool,
    pub rejected_by: Option<ExposureCap>,
}

impl ExposureVerdict {
    const ELIGIBLE: Self = Self {
        eligible: true,
        rejected_by: None,
    };

    fn rejected(cap: ExposureCap) -> Self {
        Self {
            eligible: false,
            rejected_by: Some(cap),
        }
    }
}

/// Recorded reset / "action done" timestamps, in any order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExposureHistory<'a> {
    pub reset_at: &'a [EpochMillis],
    pub action_done_at: &'a [EpochMillis],
}

/// Checks whether every configured cap in `rule` still allows one more
/// exposure at `now`. Caps are checked session, window, lifespan; the first
/// one that fails is reported.
pub fn evaluate(rule: &ExposureRule, history: ExposureHistory<'_>, now: EpochMillis) -> ExposureVerdict {
    if let Some(session) = rule.session {
        // Everything counts when there has never been a reset.
        let last_reset = history.reset_at.iter().copied().max();
        let count = history
            .action_done_at
            .iter()
            .filter(|&&ts| last_reset.map_or(true, |reset| ts > reset))
            .count();
        if !within_limit(count, session.limit) {
            return ExposureVerdict::rejected(ExposureCap::Session);
        }
    }

    if let Some(window) = rule.window {
        let window_start = now - window.span().num_milliseconds();
        let count = history
            .action_done_at
            .iter()
            .filter(|&&ts| ts >= window_start)
            .count();
        if !within_limit(count, window.limit) {
            return ExposureVerdict::rejected(ExposureCap::Window);
        }
    }

    if let Some(lifespan) = rule.lifespan {
        if !within_limit(history.action_done_at.len(), lifespan.limit) {
            return ExposureVerdict::rejected(ExposureCap::Lifespan);
        }
    }

    ExposureVerdict::ELIGIBLE
}

fn within_limit(count: usize, limit: u32) -> bool {
    count < limit as usize
}
