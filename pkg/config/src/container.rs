//! Config container (component L, §4.L). Holds `{id -> record, ordered
//! list}`; `set_all` republishes both atomically so a reader never observes
//! the map and the list out of sync with each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

/// A type loadable into a [`ConfigContainer`]. `Id` need not be `i64`: some
/// record types key off a string code instead of a numeric id.
pub trait ConfigRecord: Clone + Send + Sync + 'static {
    type Id: Eq + Hash + Clone + Send + Sync;

    fn id(&self) -> Self::Id;
}

struct Snapshot<T: ConfigRecord> {
    by_id: HashMap<T::Id, Arc<T>>,
    ordered: Vec<Arc<T>>,
}

impl<T: ConfigRecord> Snapshot<T> {
    fn empty() -> Self {
        Self { by_id: HashMap::new(), ordered: Vec::new() }
    }

    fn from_records(records: Vec<T>) -> Self {
        let ordered: Vec<Arc<T>> = records.into_iter().map(Arc::new).collect();
        let by_id = ordered.iter().map(|r| (r.id(), r.clone())).collect();
        Self { by_id, ordered }
    }
}

/// Per §5 "Config maps: a single read-write lock guards the swap; reads
/// hold the read lock only briefly" — a read clones an `Arc`, never the
/// underlying collections.
pub struct ConfigContainer<T: ConfigRecord> {
    snapshot: RwLock<Arc<Snapshot<T>>>,
}

impl<T: ConfigRecord> Default for ConfigContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ConfigRecord> ConfigContainer<T> {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(Snapshot::empty())) }
    }

    pub fn get(&self, id: &T::Id) -> Option<Arc<T>> {
        self.snapshot.read().by_id.get(id).cloned()
    }

    /// Enumerates every record in file order.
    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.snapshot.read().ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically replaces both the id map and the ordered list.
    pub fn set_all(&self, records: Vec<T>) {
        let snapshot = Arc::new(Snapshot::from_records(records));
        *self.snapshot.write() = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Item {
        id: i64,
        name: String,
    }

    impl ConfigRecord for Item {
        type Id = i64;

        fn id(&self) -> i64 {
            self.id
        }
    }

    #[test]
    fn lookup_by_id_is_present_after_set_all() {
        let container = ConfigContainer::<Item>::new();
        container.set_all(vec![Item { id: 1, name: "sword".into() }, Item { id: 2, name: "shield".into() }]);
        assert_eq!(container.get(&1).unwrap().name, "sword");
        assert_eq!(container.get(&2).unwrap().name, "shield");
        assert!(container.get(&3).is_none());
    }

    #[test]
    fn get_all_preserves_file_order() {
        let container = ConfigContainer::<Item>::new();
        container.set_all(vec![Item { id: 9, name: "a".into() }, Item { id: 1, name: "b".into() }]);
        let names: Vec<String> = container.get_all().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn set_all_fully_replaces_the_previous_collection() {
        let container = ConfigContainer::<Item>::new();
        container.set_all(vec![Item { id: 1, name: "old".into() }]);
        container.set_all(vec![Item { id: 2, name: "new".into() }]);
        assert!(container.get(&1).is_none());
        assert_eq!(container.get(&2).unwrap().name, "new");
        assert_eq!(container.len(), 1);
    }
}
