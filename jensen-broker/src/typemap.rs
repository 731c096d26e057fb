use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::Instance;

/// Simple type map for storing and retrieving target instances by their type.
///
/// Instance locators that keep instances around between requests store them in this map, so that
/// they can be looked up by the [`TypeId`] of the target that needs them.  At most one instance of
/// each type is stored.
#[derive(Default, Clone)]
pub struct TypeMap {
    map: HashMap<TypeId, Instance>,
}

impl TypeMap {
    /// Create a new empty `TypeMap`.
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Insert a value into the map, replacing any existing value of the same type.
    ///
    /// Returns the replaced instance, if there was one.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<Instance> {
        self.insert_shared(Arc::new(value))
    }

    /// Insert a value that is already shared elsewhere.
    pub fn insert_shared<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> Option<Instance> {
        self.map.insert(TypeId::of::<T>(), value)
    }

    /// Get a reference to a value of type `T` from the map.
    ///
    /// Returns `None` if no value of type `T` is in the map.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|instance| (**instance).downcast_ref())
    }

    /// Get a shared handle to the value of type `T`, if present.
    pub fn get_shared<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|instance| instance.clone().downcast::<T>().ok())
    }

    /// Get the instance stored for the type identified by `type_id`.
    pub fn instance(&self, type_id: TypeId) -> Option<Instance> {
        self.map.get(&type_id).cloned()
    }

    /// Get the instance stored for `type_id`, or store the one produced by `init` and return that.
    ///
    /// `init` must produce an instance whose concrete type is identified by `type_id`; the map
    /// does not check.
    pub fn get_or_insert_with(&mut self, type_id: TypeId, init: impl FnOnce() -> Instance) -> Instance {
        self.map.entry(type_id).or_insert_with(init).clone()
    }

    /// Check if the map contains a value of type `T`.
    pub fn contains<T: 'static>(&self) -> bool {
        self.contains_type_id(TypeId::of::<T>())
    }

    pub fn contains_type_id(&self, type_id: TypeId) -> bool {
        self.map.contains_key(&type_id)
    }

    /// Remove the value of type `T` from the map.
    ///
    /// Returns the removed instance if it existed, or `None` otherwise.
    pub fn remove<T: 'static>(&mut self) -> Option<Instance> {
        self.map.remove(&TypeId::of::<T>())
    }

    /// Clear all values from the map.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMap").field("len", &self.map.len()).finish()
    }
}
