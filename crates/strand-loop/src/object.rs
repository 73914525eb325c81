//! Object identity for registration tables.
//!
//! The event bus and tick manager key their records by *which object* a
//! handler belongs to. An [`ObjectRef`] is a shared pointer that can hand out
//! the object and a stable identity for it.

use std::rc::Rc;
use std::sync::Arc;

/// Identity of a shared object: its address for as long as it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    /// Get the raw key value.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// A shared pointer to a registration target.
pub trait ObjectRef<T: ?Sized>: Clone + 'static {
    fn object(&self) -> &T;
    fn key(&self) -> ObjectKey;
}

impl<T: ?Sized + 'static> ObjectRef<T> for Rc<T> {
    fn object(&self) -> &T {
        self
    }

    fn key(&self) -> ObjectKey {
        ObjectKey(Rc::as_ptr(self).cast::<()>() as usize)
    }
}

impl<T: ?Sized + 'static> ObjectRef<T> for Arc<T> {
    fn object(&self) -> &T {
        self
    }

    fn key(&self) -> ObjectKey {
        ObjectKey(Arc::as_ptr(self).cast::<()>() as usize)
    }
}
