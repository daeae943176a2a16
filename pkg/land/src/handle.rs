//! Shared reference to a tracked entity (§3 "Dirty cache": "Values: the
//! live entity reference"). Business code holds one of these per record
//! instead of an owned value, so that a second `submitUpdate` on the same
//! logical row observes the same in-land-queue flag the first submit set.

use std::sync::Arc;

use entity::Entity;
use parking_lot::Mutex;

pub struct EntityHandle<T>(Arc<Mutex<T>>);

impl<T> Clone for EntityHandle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> EntityHandle<T> {
    pub fn new(entity: T) -> Self {
        Self(Arc::new(Mutex::new(entity)))
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.lock())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn inner(&self) -> Arc<Mutex<T>> {
        self.0.clone()
    }
}

impl<T: Entity> EntityHandle<T> {
    pub fn primary_key(&self) -> String {
        self.with(|e| e.primary_key())
    }
}

impl<T: Clone> EntityHandle<T> {
    pub fn snapshot(&self) -> T {
        self.with(|e| e.clone())
    }
}
