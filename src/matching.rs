//! Ordered, first-match regex rule engine used for both pool selection and
//! reply selection.

use regex::Regex;
use tracing::instrument;

use crate::codec::PacketView;
use crate::config::MatchRuleGroup;
use crate::enums::ReplyCategory;
use crate::error::RadGuardError;

/// A config [`MatchRuleGroup`] with its predicate patterns pre-compiled.
struct CompiledGroup {
    target: String,
    predicates: Vec<Vec<(String, Regex)>>,
}

pub struct MatchEngine {
    pool_rules: Vec<CompiledGroup>,
    reply_rules_auth: Vec<CompiledGroup>,
    reply_rules_acct: Vec<CompiledGroup>,
}

impl MatchEngine {
    pub fn build(
        pool_match_rules: &[MatchRuleGroup],
        reply_match_rules_auth: &[MatchRuleGroup],
        reply_match_rules_acct: &[MatchRuleGroup],
    ) -> Result<Self, RadGuardError> {
        Ok(MatchEngine {
            pool_rules: compile_groups(pool_match_rules)?,
            reply_rules_auth: compile_groups(reply_match_rules_auth)?,
            reply_rules_acct: compile_groups(reply_match_rules_acct)?,
        })
    }

    #[instrument(level = "debug", skip(self, request))]
    pub fn select_pool(&self, request: &dyn PacketView, default: &str) -> String {
        match_rules(&self.pool_rules, request, default)
    }

    #[instrument(level = "debug", skip(self, request))]
    pub fn select_reply(
        &self,
        category: ReplyCategory,
        request: &dyn PacketView,
        default: &str,
    ) -> String {
        let rules = match category {
            ReplyCategory::Auth => &self.reply_rules_auth,
            ReplyCategory::Acct => &self.reply_rules_acct,
        };
        match_rules(rules, request, default)
    }
}

fn compile_groups(groups: &[MatchRuleGroup]) -> Result<Vec<CompiledGroup>, RadGuardError> {
    groups
        .iter()
        .map(|group| {
            let predicates = group
                .predicates
                .iter()
                .map(|predicate| {
                    predicate
                        .0
                        .iter()
                        .map(|(attr, pattern)| {
                            Ok((attr.clone(), Regex::new(pattern)?))
                        })
                        .collect::<Result<Vec<_>, RadGuardError>>()
                })
                .collect::<Result<Vec<_>, RadGuardError>>()?;
            Ok(CompiledGroup {
                target: group.target.clone(),
                predicates,
            })
        })
        .collect()
}

fn match_rules(groups: &[CompiledGroup], request: &dyn PacketView, default: &str) -> String {
    for group in groups {
        if group.predicates.is_empty() {
            return group.target.clone();
        }
        for predicate in &group.predicates {
            if predicate
                .iter()
                .all(|(attr, re)| request_attr_matches(request, attr, re))
            {
                return group.target.clone();
            }
        }
    }
    default.to_string()
}

fn request_attr_matches(request: &dyn PacketView, attr: &str, re: &Regex) -> bool {
    match request.get(attr).and_then(|values| values.first()) {
        Some(value) => re.is_match(&value.as_display_string()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StaticPacketView;
    use crate::config::MatchPredicate;
    use crate::enums::AttributeValue;
    use indexmap::IndexMap;

    fn group(target: &str, predicates: Vec<Vec<(&str, &str)>>) -> MatchRuleGroup {
        MatchRuleGroup {
            target: target.to_string(),
            predicates: predicates
                .into_iter()
                .map(|p| {
                    let mut map = IndexMap::new();
                    for (k, v) in p {
                        map.insert(k.to_string(), v.to_string());
                    }
                    MatchPredicate(map)
                })
                .collect(),
        }
    }

    fn request_with(attrs: &[(&str, &str)]) -> StaticPacketView {
        let mut map = IndexMap::new();
        for (k, v) in attrs {
            map.insert(k.to_string(), vec![AttributeValue::Text(v.to_string())]);
        }
        StaticPacketView::new(1, 1, map)
    }

    #[test]
    fn catch_all_matches_anything() {
        let engine = MatchEngine::build(
            &[group("fallback", vec![])],
            &[group("fallback", vec![])],
            &[group("fallback", vec![])],
        )
        .unwrap();
        let req = request_with(&[]);
        assert_eq!(engine.select_pool(&req, "default"), "fallback");
    }

    #[test]
    fn first_matching_group_wins() {
        let engine = MatchEngine::build(
            &[
                group("pool_a", vec![vec![("User-Name", "^alice$")]]),
                group("pool_b", vec![]),
            ],
            &[group("fallback", vec![])],
            &[group("fallback", vec![])],
        )
        .unwrap();
        let req = request_with(&[("User-Name", "alice")]);
        assert_eq!(engine.select_pool(&req, "default"), "pool_a");
        let req = request_with(&[("User-Name", "bob")]);
        assert_eq!(engine.select_pool(&req, "default"), "pool_b");
    }

    #[test]
    fn no_match_returns_default() {
        let engine = MatchEngine::build(
            &[group("pool_a", vec![vec![("User-Name", "^alice$")]])],
            &[group("fallback", vec![])],
            &[group("fallback", vec![])],
        )
        .unwrap();
        let req = request_with(&[("User-Name", "bob")]);
        assert_eq!(engine.select_pool(&req, "default"), "default");
    }

    #[test]
    fn predicate_pairs_are_anded() {
        let engine = MatchEngine::build(
            &[group(
                "both",
                vec![vec![("User-Name", "^alice$"), ("NAS-Port", "^1$")]],
            )],
            &[group("fallback", vec![])],
            &[group("fallback", vec![])],
        )
        .unwrap();
        let req = request_with(&[("User-Name", "alice"), ("NAS-Port", "2")]);
        assert_eq!(engine.select_pool(&req, "default"), "default");
        let req = request_with(&[("User-Name", "alice"), ("NAS-Port", "1")]);
        assert_eq!(engine.select_pool(&req, "default"), "both");
    }
}
