//! Many-to-many link index
//!
//! Maps a local key to the set of related remote keys. Fed only by link /
//! unlink events from the server; it never touches materialized records.

use crate::model::{Reference, Value};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct ManyToMany {
    attribute: String,
    reference: Option<Reference>,
    idx: HashMap<Value, BTreeSet<Value>>,
}

impl ManyToMany {
    pub fn new(attribute: impl Into<String>, reference: Option<Reference>) -> Self {
        let attribute = attribute.into();
        tracing::info!(attribute = %attribute, "Creating many-to-many index");
        Self {
            attribute,
            reference,
            idx: HashMap::new(),
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Union `remotes` into the set of `local`
    pub fn add(&mut self, local: Value, remotes: impl IntoIterator<Item = Value>) {
        self.idx.entry(local).or_default().extend(remotes);
    }

    /// Remove `remotes` from the set of `local`
    pub fn del(&mut self, local: &Value, remotes: impl IntoIterator<Item = Value>) {
        if let Some(set) = self.idx.get_mut(local) {
            for remote in remotes {
                set.remove(&remote);
            }
        }
    }

    /// Links of `local`; `None` when nothing was ever received for it
    pub fn get(&self, local: &Value) -> Option<&BTreeSet<Value>> {
        self.idx.get(local)
    }

    /// Union of the links of every key in `locals`
    pub fn linked<'a>(&self, locals: impl IntoIterator<Item = &'a Value>) -> BTreeSet<Value> {
        locals
            .into_iter()
            .filter_map(|k| self.idx.get(k))
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    /// Register an empty set so later lookups are not treated as misses
    pub fn touch(&mut self, local: Value) {
        self.idx.entry(local).or_default();
    }

    pub fn len(&self) -> usize {
        self.idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: i64) -> Value {
        Value::from(i)
    }

    #[test]
    fn test_add_unions_and_del_removes() {
        let mut m2m = ManyToMany::new("tags", None);
        m2m.add(v(1), [v(10), v(11)]);
        m2m.add(v(1), [v(11), v(12)]);

        assert_eq!(m2m.get(&v(1)).unwrap().len(), 3);

        m2m.del(&v(1), [v(10), v(99)]);
        let links: Vec<_> = m2m.get(&v(1)).unwrap().iter().cloned().collect();
        assert_eq!(links, vec![v(11), v(12)]);

        // del on unknown key is a no-op
        m2m.del(&v(2), [v(10)]);
        assert!(m2m.get(&v(2)).is_none());
    }

    #[test]
    fn test_linked_union() {
        let mut m2m = ManyToMany::new("tags", None);
        m2m.add(v(1), [v(10)]);
        m2m.add(v(2), [v(10), v(20)]);

        let linked = m2m.linked(&[v(1), v(2), v(3)]);
        assert_eq!(linked.into_iter().collect::<Vec<_>>(), vec![v(10), v(20)]);
    }
}
