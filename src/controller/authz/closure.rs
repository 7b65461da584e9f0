//! Cross-issuer path closure.
//!
//! With several JWT rules, a path required under one issuer must not fall
//! into another issuer's residual rule, or that residual would demand the
//! wrong issuer for it. Each issuer therefore inherits the required paths of
//! its siblings that it neither requires nor ignores itself.

use super::matchers::{flatten_on_paths, merge_into, PathMap};
use super::IssuerPolicy;

/// Flattened matchers of one issuer after closure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerMatchers {
    /// Paths the issuer's own rules require
    pub require: PathMap,
    /// Paths the issuer explicitly ignores
    pub ignore: PathMap,
    /// Paths owned by sibling issuers
    pub inherited: PathMap,
}

impl IssuerMatchers {
    fn for_issuer(issuer: &IssuerPolicy) -> Self {
        Self {
            require: flatten_on_paths(issuer.auth_rules.iter().map(|r| &r.matcher)),
            ignore: flatten_on_paths(&issuer.ignore_rules),
            inherited: PathMap::new(),
        }
    }

    /// Whether this issuer names no path at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.ignore.is_empty() && self.inherited.is_empty()
    }

    /// Every path excluded from the residual rule, with methods unioned
    #[must_use]
    pub fn mentioned(&self) -> PathMap {
        let mut all = self.require.clone();
        for (path, methods) in self.ignore.iter().chain(self.inherited.iter()) {
            merge_into(&mut all, path, methods);
        }
        all
    }
}

/// Flatten every issuer's matchers and apply the closure.
#[must_use]
pub fn issuer_matchers(issuers: &[IssuerPolicy]) -> Vec<IssuerMatchers> {
    let mut sets: Vec<IssuerMatchers> = issuers.iter().map(IssuerMatchers::for_issuer).collect();
    close_over_siblings(&mut sets);
    sets
}

/// Back-propagate sibling-required paths into each set's inherited paths.
///
/// Additions are computed against the unmodified sets first and applied
/// afterwards, so the result does not depend on iteration order and a
/// second application changes nothing.
pub fn close_over_siblings(sets: &mut [IssuerMatchers]) {
    let additions: Vec<PathMap> = (0..sets.len())
        .map(|i| {
            let mut add = PathMap::new();
            for (j, sibling) in sets.iter().enumerate() {
                if i == j {
                    continue;
                }
                for (path, methods) in &sibling.require {
                    if !sets[i].require.contains_key(path) && !sets[i].ignore.contains_key(path) {
                        merge_into(&mut add, path, methods);
                    }
                }
            }
            add
        })
        .collect();

    for (set, add) in sets.iter_mut().zip(additions) {
        for (path, methods) in &add {
            merge_into(&mut set.inherited, path, methods);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HttpMethod, RequestAuthRule, RequestMatcher};

    fn issuer(name: &str, require: &[(&str, &[HttpMethod])], ignore: &[&str]) -> IssuerPolicy {
        IssuerPolicy {
            issuer: name.to_string(),
            accepted_resources: vec![],
            auth_rules: require
                .iter()
                .map(|(path, methods)| RequestAuthRule {
                    matcher: RequestMatcher::new([*path], methods),
                    when: vec![],
                    deny_redirect: None,
                })
                .collect(),
            ignore_rules: ignore
                .iter()
                .map(|path| RequestMatcher::new([*path], &[]))
                .collect(),
        }
    }

    #[test]
    fn test_single_issuer_inherits_nothing() {
        let sets = issuer_matchers(&[issuer("a", &[("/admin", &[])], &["/public"])]);
        assert!(sets[0].inherited.is_empty());
    }

    #[test]
    fn test_sibling_required_paths_are_inherited() {
        let sets = issuer_matchers(&[
            issuer("a", &[("/a", &[HttpMethod::Get])], &[]),
            issuer("b", &[("/b", &[HttpMethod::Post])], &["/a"]),
            issuer("c", &[("/a", &[HttpMethod::Put])], &[]),
        ]);
        // a already requires /a itself, so it only inherits /b
        assert_eq!(sets[0].inherited.keys().collect::<Vec<_>>(), vec!["/b"]);
        // b ignores /a explicitly
        assert!(sets[1].inherited.is_empty());
        // c inherits /b; /a is its own
        assert_eq!(sets[2].inherited.keys().collect::<Vec<_>>(), vec!["/b"]);
    }

    #[test]
    fn test_inherited_methods_are_unioned_without_duplicates() {
        let sets = issuer_matchers(&[
            issuer("a", &[("/x", &[HttpMethod::Get])], &[]),
            issuer("b", &[("/x", &[HttpMethod::Post])], &[]),
            issuer("c", &[], &[]),
        ]);
        assert_eq!(sets[2].inherited.len(), 1);
        assert_eq!(sets[2].inherited["/x"].names(), vec!["GET", "POST"]);
    }

    #[test]
    fn test_closure_is_idempotent() {
        let issuers = [
            issuer("a", &[("/a", &[])], &[]),
            issuer("b", &[("/b", &[HttpMethod::Get])], &[]),
        ];
        let mut sets = issuer_matchers(&issuers);
        let once = sets.clone();
        close_over_siblings(&mut sets);
        assert_eq!(sets, once);
    }
}
