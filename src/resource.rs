//! Reference-counted resources with cleanup callbacks and a live-object registry.
//!
//! Every long-lived object in the client (sessions, tags, requests, data
//! buffers) is allocated through [`ResourceRegistry::make`], which wraps the
//! payload in an atomically counted [`Shared`] handle. When the last strong
//! handle goes away the object is first removed from the registry, then its
//! cleanup callbacks run newest-first, then the payload is dropped.
//!
//! [`WeakShared`] never keeps an object alive. Upgrading succeeds only while
//! at least one strong handle exists; once the count has reached zero an
//! upgrade fails, so a dying object can never be resurrected.

use crate::error::{EipError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

type Cleanup<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Process-wide (or client-wide) table of every live [`Shared`] object.
///
/// Used for diagnostics only; ownership is carried entirely by the handles.
pub struct ResourceRegistry {
    name: String,
    live: Mutex<HashMap<usize, &'static str>>,
}

impl ResourceRegistry {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Allocates `payload` as a tracked, reference-counted object
    pub fn make<T>(self: &Arc<Self>, payload: T) -> Result<Shared<T>>
    where
        T: Send + Sync + 'static,
    {
        self.make_inner(payload, Vec::new())
    }

    /// Allocates `payload` with an initial cleanup callback
    pub fn make_with_cleanup<T, F>(self: &Arc<Self>, payload: T, cleanup: F) -> Result<Shared<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.make_inner(payload, vec![Box::new(cleanup)])
    }

    fn make_inner<T>(self: &Arc<Self>, payload: T, cleanups: Vec<Cleanup<T>>) -> Result<Shared<T>>
    where
        T: Send + Sync + 'static,
    {
        let mut inner = Arc::new(Inner {
            payload,
            cleanups: Mutex::new(cleanups),
            registry: Arc::downgrade(self),
        });
        let addr = Arc::as_ptr(&inner) as usize;

        if let Err(e) = self.track(addr, std::any::type_name::<T>()) {
            // Never tracked, so it must neither untrack nor run cleanups.
            if let Some(inner) = Arc::get_mut(&mut inner) {
                inner.registry = Weak::new();
                inner.cleanups.get_mut().clear();
            }
            return Err(e);
        }

        Ok(Shared { inner })
    }

    fn track(&self, addr: usize, type_name: &'static str) -> Result<()> {
        let mut live = self.live.lock();
        if live.contains_key(&addr) {
            return Err(EipError::Duplicate(format!(
                "{} at 0x{:x} in registry '{}'",
                type_name, addr, self.name
            )));
        }
        live.insert(addr, type_name);
        Ok(())
    }

    fn untrack(&self, addr: usize) {
        self.live.lock().remove(&addr);
    }

    /// Number of objects currently alive
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Snapshot of live objects as `(address, type name)` pairs
    pub fn live_objects(&self) -> Vec<(usize, &'static str)> {
        let mut objects: Vec<_> = self.live.lock().iter().map(|(a, t)| (*a, *t)).collect();
        objects.sort_unstable();
        objects
    }

    /// Final check before the registry goes away. Every object still alive at
    /// this point is a leak; each one is logged and the count returned.
    pub fn shutdown(&self) -> usize {
        let leaked = self.live_objects();
        for (addr, type_name) in &leaked {
            tracing::warn!(
                registry = %self.name,
                addr = format_args!("0x{:x}", addr),
                type_name,
                "resource still alive at registry shutdown"
            );
        }
        if leaked.is_empty() {
            tracing::debug!(registry = %self.name, "resource registry shut down clean");
        }
        leaked.len()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("name", &self.name)
            .field("live", &self.live_count())
            .finish()
    }
}

struct Inner<T> {
    payload: T,
    cleanups: Mutex<Vec<Cleanup<T>>>,
    registry: Weak<ResourceRegistry>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Leave the registry before teardown so diagnostics never see a
        // half-destroyed object.
        if let Some(registry) = self.registry.upgrade() {
            registry.untrack(self as *const Self as usize);
        }

        let mut cleanups = std::mem::take(self.cleanups.get_mut());
        while let Some(cleanup) = cleanups.pop() {
            cleanup(&mut self.payload);
        }
    }
}

/// Strong, counted handle to a registry-tracked object
pub struct Shared<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Shared<T> {
    /// Takes another strong reference. Always succeeds: holding `self`
    /// guarantees the count is above zero.
    pub fn acquire(&self) -> Shared<T> {
        Shared {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Gives up this strong reference. The last release tears the object down
    /// synchronously on the calling thread.
    pub fn release(self) {
        drop(self);
    }

    pub fn downgrade(&self) -> WeakShared<T> {
        WeakShared {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Pushes an extra cleanup; it runs before every previously registered one.
    pub fn register_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.inner.cleanups.lock().push(Box::new(cleanup));
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(a: &Shared<T>, b: &Shared<T>) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Registry key of this object
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        self.acquire()
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.payload
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .field("strong", &self.strong_count())
            .field("payload", &self.inner.payload)
            .finish()
    }
}

/// Non-owning handle; see the module docs for upgrade semantics
pub struct WeakShared<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakShared<T> {
    /// A handle that never upgrades
    pub fn new() -> Self {
        Self { inner: Weak::new() }
    }

    pub fn upgrade(&self) -> Option<Shared<T>> {
        self.inner.upgrade().map(|inner| Shared { inner })
    }

    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// True if `strong` is the object this handle points at
    pub fn points_to(&self, strong: &Shared<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&strong.inner))
    }
}

impl<T> Default for WeakShared<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakShared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakShared")
            .field("live", &self.is_live())
            .finish()
    }
}
