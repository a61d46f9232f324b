//! Choosing a scenario from the catalog by id or by an approximate name.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use kiyomi_core::{Scenario, Skill};

/// Finds the scenario the user asked for.
///
/// An exact id (case-insensitive) wins; otherwise the best fuzzy match over
/// scenario names and ids. `skill` narrows the search to one skill.
pub fn find_scenario<'a>(skills: &'a [Skill], skill: Option<&str>, query: &str) -> Option<&'a Scenario> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    let candidates = || {
        skills
            .iter()
            .filter(move |s| skill.is_none_or(|wanted| s.name.eq_ignore_ascii_case(wanted)))
            .flat_map(|s| s.scenarios.iter())
    };

    if let Some(exact) = candidates().find(|s| s.id.eq_ignore_ascii_case(query)) {
        return Some(exact);
    }

    let matcher = SkimMatcherV2::default();
    candidates()
        .filter_map(|scenario| {
            let by_name = matcher.fuzzy_match(&scenario.name, query);
            let by_id = matcher.fuzzy_match(&scenario.id, query);
            by_name.max(by_id).map(|score| (score, scenario))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, scenario)| scenario)
}
