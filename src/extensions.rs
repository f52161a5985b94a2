//! Typed application state threaded into every request context. Written
//! once during startup, read-only while serving; this is the explicit
//! dependency-passing seam for handler collaborators (a pool, a client, a
//! clock) rather than a process-wide singleton.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Debug, Clone)]
pub struct Extensions {
    values: Arc<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self {
            values: Arc::new(HashMap::new()),
        }
    }

    pub(crate) fn insert<T: 'static + Send + Sync>(&mut self, value: T) {
        Arc::get_mut(&mut self.values)
            .expect("Cannot add extensions after the application has started")
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }
}
