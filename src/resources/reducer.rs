//! Filter reduction
//!
//! Remembers what has been asked of the server per resource, so repeated
//! queries only fetch what is new.

use crate::model::{Filter, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Asked {
    got_all: bool,
    fields: HashMap<String, HashSet<Value>>,
    compound: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FilterReducer {
    resources: HashMap<String, Asked>,
}

impl FilterReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The part of `filter` still worth asking for, marked as asked
    ///
    /// `held(field, value)` tells whether a value is already held locally.
    /// Returns `None` when nothing is left to fetch.
    pub fn reduce<F>(&mut self, resource: &str, filter: &Filter, held: F) -> Option<Filter>
    where
        F: Fn(&str, &Value) -> bool,
    {
        let asked = self.resources.entry(resource.to_string()).or_default();
        if asked.got_all {
            return None;
        }
        if filter.is_empty() {
            asked.got_all = true;
            return Some(Filter::new());
        }

        if filter.len() > 1 {
            return asked
                .compound
                .insert(filter.cache_key())
                .then(|| filter.clone());
        }

        let (field, values) = filter.iter().next()?;
        let seen = asked.fields.entry(field.clone()).or_default();
        let remaining: Vec<Value> = values
            .iter()
            .filter(|v| !seen.contains(*v) && !held(field.as_str(), *v))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return None;
        }
        seen.extend(remaining.iter().cloned());
        Some(Filter::new().any_of(field.clone(), remaining))
    }

    /// Undo `reduce` for a filter whose fetch failed
    pub fn forget(&mut self, resource: &str, filter: &Filter) {
        let Some(asked) = self.resources.get_mut(resource) else {
            return;
        };
        if filter.is_empty() {
            asked.got_all = false;
        } else if filter.len() > 1 {
            asked.compound.remove(&filter.cache_key());
        } else {
            for (field, values) in filter.iter() {
                if let Some(seen) = asked.fields.get_mut(field) {
                    for value in values {
                        seen.remove(value);
                    }
                }
            }
        }
    }

    /// Forget everything asked for `resource`
    pub fn reset(&mut self, resource: &str) {
        self.resources.remove(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing_held(_: &str, _: &Value) -> bool {
        false
    }

    #[test]
    fn test_single_field_drops_asked_values() {
        let mut reducer = FilterReducer::new();
        let first = reducer
            .reduce("item", &Filter::new().any_of("id", [1, 2, 3]), nothing_held)
            .unwrap();
        assert_eq!(first.values("id").unwrap().len(), 3);

        let second = reducer
            .reduce("item", &Filter::new().any_of("id", [2, 3, 4]), nothing_held)
            .unwrap();
        assert_eq!(second.values("id").unwrap(), &[Value::from(4)]);

        assert!(reducer
            .reduce("item", &Filter::new().any_of("id", [1, 4]), nothing_held)
            .is_none());
    }

    #[test]
    fn test_held_values_are_skipped() {
        let mut reducer = FilterReducer::new();
        let held = |_: &str, v: &Value| v == &Value::from(1);
        let reduced = reducer
            .reduce("item", &Filter::new().any_of("id", [1, 2]), held)
            .unwrap();
        assert_eq!(reduced.values("id").unwrap(), &[Value::from(2)]);
    }

    #[test]
    fn test_got_all_short_circuits() {
        let mut reducer = FilterReducer::new();
        assert_eq!(reducer.reduce("item", &Filter::new(), nothing_held), Some(Filter::new()));
        assert!(reducer
            .reduce("item", &Filter::new().equals("id", 9), nothing_held)
            .is_none());
        // Other resources are unaffected
        assert!(reducer
            .reduce("tag", &Filter::new().equals("id", 9), nothing_held)
            .is_some());
    }

    #[test]
    fn test_compound_filters_remembered_verbatim() {
        let mut reducer = FilterReducer::new();
        let filter = Filter::new().equals("group", 1).equals("kind", "a");
        assert!(reducer.reduce("item", &filter, nothing_held).is_some());
        assert!(reducer.reduce("item", &filter, nothing_held).is_none());

        let other = Filter::new().equals("group", 2).equals("kind", "a");
        assert!(reducer.reduce("item", &other, nothing_held).is_some());
    }

    #[test]
    fn test_forget_allows_retry() {
        let mut reducer = FilterReducer::new();
        let filter = Filter::new().any_of("id", [1, 2]);
        let reduced = reducer.reduce("item", &filter, nothing_held).unwrap();
        reducer.forget("item", &reduced);
        assert_eq!(reducer.reduce("item", &filter, nothing_held), Some(reduced));

        reducer.reduce("item", &Filter::new(), nothing_held);
        reducer.forget("item", &Filter::new());
        assert!(reducer.reduce("item", &Filter::new(), nothing_held).is_some());
    }
}
