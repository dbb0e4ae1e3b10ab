//! Show/hide dependencies between CTAs.

use std::collections::HashSet;

use thunder_core::types::CtaRelation;

/// Decides whether a CTA governed by `relation` may show, given the ids of the
/// CTAs the client currently considers shown.
///
/// Hide beats show: any active id in `hideCta` suppresses the CTA even when
/// every `shownCta` prerequisite is met.
pub fn evaluate(relation: &CtaRelation, active_ctas: &HashSet<&str>) -> bool {
    if let Some(hide) = &relation.hide_cta {
        if hide.cta_list.iter().any(|id| active_ctas.contains(id.as_str())) {
            return false;
        }
    }

    match &relation.shown_cta {
        Some(shown) => shown
            .cta_list
            .iter()
            .all(|id| active_ctas.contains(id.as_str())),
        None => true,
    }
}

/// Borrowed id set for [`evaluate`].
pub fn active_set(active_ctas: &[String]) -> HashSet<&str> {
    active_ctas.iter().map(String::as_str).collect()
}
