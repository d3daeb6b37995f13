use std::cell::RefCell;
use std::collections::hash_map;
use std::collections::HashMap;
use std::hash::Hash;


/// An insert-only map.
///
/// This map allows only for insertion, but not removal of values. It
/// does so behind an immutable interface. Values are boxed so that
/// references handed out stay valid across later insertions.
#[derive(Debug)]
pub(crate) struct InsertMap<K, V> {
    /// A proxy member used for making sure that we do not borrow `map` mutably
    /// multiple times.
    refcell: RefCell<()>,
    /// The actual map containing key-value pairs.
    map: RefCell<HashMap<K, Box<V>>>,
}

impl<K, V> InsertMap<K, V> {
    /// Create a new, empty `InsertMap` instance.
    pub(crate) fn new() -> Self {
        Self {
            refcell: RefCell::new(()),
            map: RefCell::new(HashMap::new()),
        }
    }

    /// Retrieve the value mapping to a key, if already present, or insert
    /// it and return it then.
    ///
    /// # Panics
    /// The `init` function should not use functionality provided by the
    /// object this method operates on, recursively, or a runtime panic
    /// may be the result.
    pub(crate) fn get_or_insert<F>(&self, key: K, init: F) -> &V
    where
        K: Eq + Hash,
        F: FnOnce() -> V,
    {
        let _borrow = self.refcell.borrow_mut();
        // SAFETY: We are sure to not borrow mutably twice because the `_borrow`
        //         guard protects us. Values are boxed and never removed, so
        //         references to them outlive any rehashing of the map.
        let map = unsafe { self.map.as_ptr().as_mut() }.unwrap();
        let value = match map.entry(key) {
            hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            hash_map::Entry::Vacant(vacancy) => vacancy.insert(Box::new(init())),
        };
        let value = &**value as *const V;
        // SAFETY: The box's contents are heap allocated and stay put for the
        //         lifetime of `self`.
        unsafe { &*value }
    }

}

impl<K, V> Default for InsertMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
