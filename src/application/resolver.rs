//! Target resolution: configuration + universe -> ordered work list

use std::collections::{HashMap, HashSet};

use crate::domain::{RunConfiguration, RunScope, Target};

/// Turns a run configuration into the ordered list of targets to process.
///
/// An empty result means "nothing to do"; the caller must not start a run.
pub struct TargetResolver;

impl TargetResolver {
    pub fn resolve(config: &RunConfiguration, universe: &[Target]) -> Vec<Target> {
        match config.scope() {
            RunScope::Selected => dedup_by_id(config.selected_targets().iter()),
            RunScope::All => {
                let kind = config.mode().target_kind();
                let stores = config.store_filter();
                let candidates = dedup_by_id(universe.iter().filter(|t| {
                    t.kind == kind
                        && stores.is_none_or(|ids| ids.iter().any(|id| id == t.group_key()))
                }));

                match config.per_group_limit() {
                    Some(limit) => limit_per_group(candidates, limit.get()),
                    None => candidates,
                }
            }
        }
    }
}

fn dedup_by_id<'a>(targets: impl Iterator<Item = &'a Target>) -> Vec<Target> {
    let mut seen: HashSet<String> = HashSet::new();
    targets
        .filter(|t| seen.insert(t.id.clone()))
        .cloned()
        .collect()
}

/// First `limit` targets of every group, groups in order of first appearance
fn limit_per_group(targets: Vec<Target>, limit: usize) -> Vec<Target> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Target>> = HashMap::new();

    for target in targets {
        let key = target.group_key().to_string();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        if group.len() < limit {
            group.push(target);
        }
    }

    order
        .into_iter()
        .flat_map(|key| groups.remove(&key).unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunMode, Selection, TargetKind};
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    fn products(store: &str, count: usize) -> Vec<Target> {
        (0..count)
            .map(|i| Target::product(format!("{store}-p{i}"), format!("Item {i}"), store))
            .collect()
    }

    fn limited(limit: usize) -> RunConfiguration {
        RunConfiguration::all(RunMode::Products)
            .with_per_group_limit(NonZeroUsize::new(limit).unwrap())
            .unwrap()
    }

    #[test]
    fn test_selected_scope_returns_selection_in_order() {
        let mut selection = Selection::new(TargetKind::Store, 5);
        selection.insert(Target::store("s2", "Two")).unwrap();
        selection.insert(Target::store("s1", "One")).unwrap();
        let config = RunConfiguration::selected(RunMode::Stores, selection).unwrap();

        let universe = vec![Target::store("s1", "One"), Target::store("s3", "Three")];
        let resolved = TargetResolver::resolve(&config, &universe);
        let ids: Vec<_> = resolved.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[test]
    fn test_all_scope_filters_by_kind() {
        let mut universe = products("a", 2);
        universe.push(Target::store("a", "Store A"));

        let stores = TargetResolver::resolve(&RunConfiguration::all(RunMode::Stores), &universe);
        assert_eq!(stores.len(), 1);

        let all_products =
            TargetResolver::resolve(&RunConfiguration::all(RunMode::Products), &universe);
        assert_eq!(all_products.len(), 2);
    }

    #[test]
    fn test_per_group_limit_scenario() {
        let mut universe = products("a", 5);
        universe.extend(products("b", 1));

        let resolved = TargetResolver::resolve(&limited(2), &universe);
        let ids: Vec<_> = resolved.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a-p0", "a-p1", "b-p0"]);
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let universe = vec![
            Target::product("x1", "X1", "b"),
            Target::product("y1", "Y1", "a"),
            Target::product("x2", "X2", "b"),
        ];
        let resolved = TargetResolver::resolve(&limited(5), &universe);
        let ids: Vec<_> = resolved.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["x1", "x2", "y1"]);
    }

    #[test]
    fn test_store_filter_keeps_only_listed_stores() {
        let mut universe = products("a", 2);
        universe.extend(products("b", 2));
        universe.extend(products("c", 1));
        universe.push(Target::store("a", "Store A"));

        let config = RunConfiguration::all(RunMode::Products)
            .with_store_filter(["c", "a"])
            .unwrap();
        let resolved = TargetResolver::resolve(&config, &universe);
        let ids: Vec<_> = resolved.iter().map(|t| t.id.as_str()).collect();
        // Universe order, not filter order
        assert_eq!(ids, vec!["a-p0", "a-p1", "c-p0"]);
    }

    #[test]
    fn test_store_filter_applies_before_per_group_limit() {
        let mut universe = products("a", 5);
        universe.extend(products("b", 4));
        universe.extend(products("c", 1));

        let config = RunConfiguration::all(RunMode::Products)
            .with_store_filter(["b", "c"])
            .unwrap()
            .with_per_group_limit(NonZeroUsize::new(2).unwrap())
            .unwrap();
        let resolved = TargetResolver::resolve(&config, &universe);
        let ids: Vec<_> = resolved.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b-p0", "b-p1", "c-p0"]);
    }

    #[test]
    fn test_store_filter_without_matches_resolves_to_nothing() {
        let config = RunConfiguration::all(RunMode::Products)
            .with_store_filter(["missing"])
            .unwrap();
        assert!(TargetResolver::resolve(&config, &products("a", 3)).is_empty());
    }

    #[test]
    fn test_empty_universe_resolves_to_nothing() {
        let resolved = TargetResolver::resolve(&RunConfiguration::all(RunMode::Stores), &[]);
        assert!(resolved.is_empty());
    }

    proptest! {
        #[test]
        fn prop_per_group_limit_takes_min(
            sizes in proptest::collection::vec(0usize..8, 1..6),
            limit in 1usize..6,
        ) {
            let mut universe = Vec::new();
            for (i, size) in sizes.iter().enumerate() {
                universe.extend(products(&format!("s{i}"), *size));
            }

            let resolved = TargetResolver::resolve(&limited(limit), &universe);
            for (i, size) in sizes.iter().enumerate() {
                let store = format!("s{i}");
                let taken = resolved.iter().filter(|t| t.group_key() == store).count();
                prop_assert_eq!(taken, (*size).min(limit));
            }
        }
    }
}
