//! Path-keyed views of request matchers.

use crate::crd::{HttpMethod, RequestMatcher};
use std::collections::{BTreeMap, BTreeSet};

/// Set of HTTP methods where the empty set means every method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSet(BTreeSet<HttpMethod>);

impl MethodSet {
    #[must_use]
    pub fn any() -> Self {
        Self(BTreeSet::new())
    }

    #[must_use]
    pub fn of(methods: &[HttpMethod]) -> Self {
        Self(methods.iter().copied().collect())
    }

    #[must_use]
    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    /// Union in place. Anything unioned with "any" stays "any".
    pub fn union_with(&mut self, other: &MethodSet) {
        if self.is_any() {
            return;
        }
        if other.is_any() {
            self.0.clear();
        } else {
            self.0.extend(other.0.iter().copied());
        }
    }

    /// Concrete methods, expanding "any" to the full enumeration
    #[must_use]
    pub fn expanded(&self) -> Vec<HttpMethod> {
        if self.is_any() {
            HttpMethod::ALL.to_vec()
        } else {
            self.0.iter().copied().collect()
        }
    }

    /// Methods in `self` not in `other`, as a concrete list
    #[must_use]
    pub fn minus(&self, other: &MethodSet) -> Vec<HttpMethod> {
        if other.is_any() {
            return Vec::new();
        }
        self.expanded()
            .into_iter()
            .filter(|m| !other.0.contains(m))
            .collect()
    }

    #[must_use]
    pub fn overlaps(&self, other: &MethodSet) -> bool {
        self.is_any() || other.is_any() || !self.0.is_disjoint(&other.0)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|m| m.as_str().to_string()).collect()
    }
}

/// Path → methods, one entry per distinct path literal.
pub type PathMap = BTreeMap<String, MethodSet>;

/// Collapse matchers onto their paths, unioning methods of repeated paths.
pub fn flatten_on_paths<'a, I>(matchers: I) -> PathMap
where
    I: IntoIterator<Item = &'a RequestMatcher>,
{
    let mut map = PathMap::new();
    for matcher in matchers {
        let methods = MethodSet::of(&matcher.methods);
        for path in &matcher.paths {
            merge_into(&mut map, path, &methods);
        }
    }
    map
}

pub(crate) fn merge_into(map: &mut PathMap, path: &str, methods: &MethodSet) {
    match map.get_mut(path) {
        Some(existing) => existing.union_with(methods),
        None => {
            map.insert(path.to_string(), methods.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_with_any_is_any() {
        let mut set = MethodSet::of(&[HttpMethod::Get]);
        set.union_with(&MethodSet::of(&[HttpMethod::Post]));
        assert_eq!(set.names(), vec!["GET", "POST"]);
        set.union_with(&MethodSet::any());
        assert!(set.is_any());
        assert_eq!(set.expanded().len(), 9);
    }

    #[test]
    fn test_minus_and_overlap() {
        let all = MethodSet::any();
        let get = MethodSet::of(&[HttpMethod::Get]);
        assert_eq!(all.minus(&get).len(), 8);
        assert!(get.minus(&all).is_empty());
        assert!(get.overlaps(&all));
        assert!(!get.overlaps(&MethodSet::of(&[HttpMethod::Delete])));
    }

    #[test]
    fn test_flatten_on_paths_unions_repeated_paths() {
        let matchers = vec![
            RequestMatcher::new(["/a", "/b"], &[HttpMethod::Get]),
            RequestMatcher::new(["/a"], &[HttpMethod::Post]),
        ];
        let map = flatten_on_paths(&matchers);
        assert_eq!(map.len(), 2);
        assert_eq!(map["/a"].names(), vec!["GET", "POST"]);
        assert_eq!(map["/b"].names(), vec!["GET"]);
    }
}
