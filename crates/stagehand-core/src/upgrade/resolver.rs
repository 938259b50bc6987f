//! Upgrade path enumeration.
//!
//! Each catalog entry is an edge from every version its `from` range admits
//! to its `to` version. [`find_upgrade_paths`] lists every route from one
//! version to another; [`choose_path`] picks one for planning.

use semver::Version;
use tracing::debug;

use super::Upgrade;
use super::range::same_release;

/// Enumerate every sequence of upgrade names leading from `from` to `to`.
///
/// No upgrade appears twice in one route, which bounds the search even when
/// the catalog contains loops. A route stops as soon as it reaches `to`.
/// Starting at the target yields the single empty path. Routes come back in
/// discovery order; callers decide which one to take.
pub fn find_upgrade_paths(from: &Version, to: &Version, catalog: &[Upgrade]) -> Vec<Vec<String>> {
    if same_release(from, to) {
        return vec![Vec::new()];
    }

    struct Route<'a> {
        version: &'a Version,
        upgrades: Vec<&'a str>,
    }

    let mut stack: Vec<Route<'_>> = catalog
        .iter()
        .filter(|upgrade| upgrade.from.matches(from))
        .map(|upgrade| Route {
            version: &upgrade.to,
            upgrades: vec![upgrade.name.as_str()],
        })
        .collect();

    let mut paths = Vec::new();
    let mut explored = 0usize;
    while let Some(route) = stack.pop() {
        explored += 1;
        if same_release(route.version, to) {
            paths.push(route.upgrades.iter().map(|name| name.to_string()).collect());
            continue;
        }
        for upgrade in catalog {
            if route.upgrades.contains(&upgrade.name.as_str()) {
                continue;
            }
            if upgrade.from.matches(route.version) {
                let mut upgrades = route.upgrades.clone();
                upgrades.push(upgrade.name.as_str());
                stack.push(Route {
                    version: &upgrade.to,
                    upgrades,
                });
            }
        }
    }

    debug!(%from, %to, explored, found = paths.len(), "resolved upgrade paths");
    paths
}

/// Outcome of picking one path for planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChoice {
    /// No route reaches the target.
    Unreachable,
    /// Exactly one shortest route.
    Unique(Vec<String>),
    /// Several routes tie for shortest, sorted by name sequence.
    Ambiguous(Vec<Vec<String>>),
}

/// Prefer the shortest route; report a tie instead of guessing.
pub fn choose_path(paths: &[Vec<String>]) -> PathChoice {
    let Some(shortest) = paths.iter().map(Vec::len).min() else {
        return PathChoice::Unreachable;
    };
    let mut candidates: Vec<Vec<String>> = paths
        .iter()
        .filter(|path| path.len() == shortest)
        .cloned()
        .collect();
    candidates.sort();
    candidates.dedup();

    if candidates.len() == 1 {
        PathChoice::Unique(candidates.remove(0))
    } else {
        PathChoice::Ambiguous(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade(name: &str, from: &str, to: &str) -> Upgrade {
        Upgrade {
            name: name.to_string(),
            from: from.parse().unwrap(),
            to: Version::parse(to).unwrap(),
            phases: Vec::new(),
            commit: String::new(),
        }
    }

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn linear_chain_has_one_path() {
        let catalog = vec![
            upgrade("A", "1.0.0", "1.1.0"),
            upgrade("B", "1.1.0", "1.2.0"),
        ];
        let paths = find_upgrade_paths(&v("1.0.0"), &v("1.2.0"), &catalog);
        assert_eq!(paths, vec![vec!["A".to_string(), "B".to_string()]]);
    }

    #[test]
    fn same_version_loop_terminates() {
        let catalog = vec![upgrade("A", ">=1.0.0", "1.0.0")];
        assert_eq!(
            find_upgrade_paths(&v("1.0.0"), &v("1.0.0"), &catalog),
            vec![Vec::<String>::new()]
        );
        assert!(find_upgrade_paths(&v("1.0.0"), &v("2.0.0"), &catalog).is_empty());
    }

    #[test]
    fn mutual_loop_terminates() {
        let catalog = vec![
            upgrade("up", "1.0.0", "1.1.0"),
            upgrade("down", "1.1.0", "1.0.0"),
        ];
        assert!(find_upgrade_paths(&v("1.0.0"), &v("3.0.0"), &catalog).is_empty());
    }

    #[test]
    fn prerelease_start_matches_range() {
        let catalog = vec![upgrade("A", ">=1.3.0", "1.7.1")];
        let paths = find_upgrade_paths(&v("1.7.0-rc.0"), &v("1.7.1"), &catalog);
        assert_eq!(paths, vec![vec!["A".to_string()]]);
    }

    #[test]
    fn reaching_target_stops_extension() {
        let catalog = vec![
            upgrade("A", "1.0.0", "2.0.0"),
            upgrade("B", ">=2.0.0", "3.0.0"),
        ];
        let paths = find_upgrade_paths(&v("1.0.0"), &v("2.0.0"), &catalog);
        assert_eq!(paths, vec![vec!["A".to_string()]]);
    }

    #[test]
    fn choose_prefers_shortest_and_flags_ties() {
        let long = vec!["A".to_string(), "B".to_string()];
        let short = vec!["C".to_string()];
        assert_eq!(
            choose_path(&[long.clone(), short.clone()]),
            PathChoice::Unique(short.clone())
        );

        let other = vec!["D".to_string()];
        assert_eq!(
            choose_path(&[long, other.clone(), short.clone()]),
            PathChoice::Ambiguous(vec![short, other])
        );
        assert_eq!(choose_path(&[]), PathChoice::Unreachable);
    }
}
