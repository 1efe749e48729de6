//! Waiters for images that have not been saved yet.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::domain::entities::{ImageId, LoadToken};

/// A load request parked until its image is saved.
pub struct PendingWaiter<C> {
    /// Handle the requester can cancel with.
    pub token: LoadToken,
    /// Image being waited for.
    pub id: ImageId,
    /// Requested maximum dimension.
    pub size: u32,
    /// Delivery target.
    pub callback: C,
}

impl<C> std::fmt::Debug for PendingWaiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWaiter")
            .field("token", &self.token)
            .field("id", &self.id)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Per-image lists of waiters, each addressable by its token.
///
/// Mutation takes `&mut self`, so `register` and `drain` for one image can
/// never interleave: a waiter is either part of a drain or left for the next one.
pub struct PendingRequestRegistry<C> {
    waiters: HashMap<ImageId, Vec<PendingWaiter<C>>>,
    index: HashMap<LoadToken, ImageId>,
}

impl<C> PendingRequestRegistry<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// Parks a waiter and returns its fresh token.
    pub fn register(&mut self, id: ImageId, size: u32, callback: C) -> LoadToken {
        let token = LoadToken::new();
        self.register_with_token(token, id, size, callback);
        token
    }

    /// Parks a waiter under a token issued elsewhere.
    pub fn register_with_token(&mut self, token: LoadToken, id: ImageId, size: u32, callback: C) {
        trace!(id = %id, size = size, token = %token, "Registering pending waiter");
        self.index.insert(token, id.clone());
        self.waiters
            .entry(id.clone())
            .or_default()
            .push(PendingWaiter {
                token,
                id,
                size,
                callback,
            });
    }

    /// Removes a waiter. Returns false if the token already fired or was cancelled.
    pub fn cancel(&mut self, token: LoadToken) -> bool {
        let Some(id) = self.index.remove(&token) else {
            return false;
        };
        if let Some(list) = self.waiters.get_mut(&id) {
            list.retain(|w| w.token != token);
            if list.is_empty() {
                self.waiters.remove(&id);
            }
        }
        debug!(id = %id, token = %token, "Cancelled pending waiter");
        true
    }

    /// Removes every waiter for an image. Returns how many were removed.
    pub fn cancel_all(&mut self, id: &ImageId) -> usize {
        let removed = self.take(id).len();
        if removed > 0 {
            debug!(id = %id, count = removed, "Cancelled all pending waiters");
        }
        removed
    }

    /// Removes and returns the waiters for an image in registration order.
    pub fn drain(&mut self, id: &ImageId) -> Vec<PendingWaiter<C>> {
        let drained = self.take(id);
        if !drained.is_empty() {
            debug!(id = %id, count = drained.len(), "Drained pending waiters");
        }
        drained
    }

    /// Drops every waiter. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.index.len();
        self.waiters.clear();
        self.index.clear();
        count
    }

    /// Returns true if the token is still waiting.
    #[must_use]
    pub fn contains(&self, token: LoadToken) -> bool {
        self.index.contains_key(&token)
    }

    /// Number of waiters for one image.
    #[must_use]
    pub fn pending_for(&self, id: &ImageId) -> usize {
        self.waiters.get(id).map_or(0, Vec::len)
    }

    /// Total number of waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn take(&mut self, id: &ImageId) -> Vec<PendingWaiter<C>> {
        let list = self.waiters.remove(id).unwrap_or_default();
        for waiter in &list {
            self.index.remove(&waiter.token);
        }
        list
    }
}

impl<C> Default for PendingRequestRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
