//! Bounded FIFO of retired output textures awaiting reuse

use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use tracing::{trace, warn};

use super::stats::Counters;
use super::ConnectionId;
use crate::texture::{OutputTexture, TextureBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    Pooled,
    /// Pool was full; the texture was destroyed
    Destroyed,
}

/// Per-connection texture pool.
///
/// Any pooled texture may be handed out; the strategy's `allocate` step
/// resizes it when the next frame's shape differs.
pub struct ResourcePool {
    /// `None` when the configured depth is zero
    ring: Option<HeapRb<OutputTexture>>,
    depth: usize,
    backend: Arc<dyn TextureBackend>,
    connection: ConnectionId,
    counters: Arc<Counters>,
}

impl ResourcePool {
    pub fn new(
        depth: usize,
        backend: Arc<dyn TextureBackend>,
        connection: ConnectionId,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            ring: (depth > 0).then(|| HeapRb::new(depth)),
            depth,
            backend,
            connection,
            counters,
        }
    }

    /// Oldest pooled texture, if any
    pub fn take_reusable(&mut self) -> Option<OutputTexture> {
        let texture = self.ring.as_mut()?.try_pop()?;
        trace!(connection = %self.connection, texture = %texture.id(), "reusing pooled texture");
        Some(texture)
    }

    pub fn retire(&mut self, mut texture: OutputTexture) -> RetireOutcome {
        texture.detach_native();

        let rejected = match self.ring.as_mut() {
            Some(ring) => ring.try_push(texture).err(),
            None => Some(texture),
        };

        match rejected {
            None => RetireOutcome::Pooled,
            Some(texture) => {
                warn!(
                    connection = %self.connection,
                    texture = %texture.id(),
                    depth = self.depth,
                    "texture pool full, destroying retired texture"
                );
                self.counters.record_pool_eviction();
                self.backend.destroy(texture);
                RetireOutcome::Destroyed
            }
        }
    }

    /// Destroy every pooled texture
    pub fn clear(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            while let Some(texture) = ring.try_pop() {
                self.backend.destroy(texture);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.occupied_len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("connection", &self.connection)
            .field("len", &self.len())
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{HostBackend, TextureDesc};

    fn pool(depth: usize) -> (ResourcePool, Arc<HostBackend>) {
        let backend = Arc::new(HostBackend::new());
        let pool = ResourcePool::new(
            depth,
            backend.clone(),
            ConnectionId::from("cam"),
            Arc::new(Counters::default()),
        );
        (pool, backend)
    }

    #[test]
    fn hands_textures_back_in_fifo_order() {
        let (mut pool, backend) = pool(3);
        let a = backend.create(TextureDesc::rgba(2, 2)).unwrap();
        let b = backend.create(TextureDesc::rgba(2, 2)).unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        assert_eq!(pool.retire(a), RetireOutcome::Pooled);
        assert_eq!(pool.retire(b), RetireOutcome::Pooled);
        assert_eq!(pool.take_reusable().map(|t| t.id()), Some(a_id));
        assert_eq!(pool.take_reusable().map(|t| t.id()), Some(b_id));
        assert!(pool.take_reusable().is_none());
    }

    #[test]
    fn destroys_past_the_bound() {
        let (mut pool, backend) = pool(2);
        let outcomes: Vec<_> = (0..4)
            .map(|_| pool.retire(backend.create(TextureDesc::rgba(1, 1)).unwrap()))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                RetireOutcome::Pooled,
                RetireOutcome::Pooled,
                RetireOutcome::Destroyed,
                RetireOutcome::Destroyed
            ]
        );
        assert_eq!(pool.len(), 2);
        assert_eq!(backend.live(), 2);
        assert_eq!(pool.counters.snapshot().pool_evictions, 2);
    }

    #[test]
    fn zero_depth_never_pools() {
        let (mut pool, backend) = pool(0);
        let tex = backend.create(TextureDesc::rgba(1, 1)).unwrap();
        assert_eq!(pool.retire(tex), RetireOutcome::Destroyed);
        assert!(pool.take_reusable().is_none());
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn clear_and_drop_release_everything() {
        let (mut pool, backend) = pool(3);
        for _ in 0..3 {
            pool.retire(backend.create(TextureDesc::rgba(1, 1)).unwrap());
        }
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(backend.live(), 0);

        pool.retire(backend.create(TextureDesc::rgba(1, 1)).unwrap());
        drop(pool);
        assert_eq!(backend.live(), 0);
    }
}
