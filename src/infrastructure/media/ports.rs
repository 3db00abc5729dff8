//! Local media port allocation

use super::channel::MediaError;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

struct PortPool {
    next: u16,
    in_use: HashSet<u16>,
}

struct AllocatorInner {
    name: &'static str,
    base: u16,
    count: u16,
    step: u16,
    pool: Mutex<PortPool>,
}

/// Hands out non-colliding ports from a fixed range, round robin
#[derive(Clone)]
pub struct PortAllocator {
    inner: Arc<AllocatorInner>,
}

impl PortAllocator {
    /// `step` is 2 for RTP so that RTCP keeps the odd port
    pub fn new(name: &'static str, base: u16, count: u16, step: u16) -> Self {
        let step = step.max(1);
        Self {
            inner: Arc::new(AllocatorInner {
                name,
                base,
                count: count.max(step),
                step,
                pool: Mutex::new(PortPool {
                    next: 0,
                    in_use: HashSet::new(),
                }),
            }),
        }
    }

    pub fn msrp(base: u16, count: u16) -> Self {
        Self::new("msrp", base, count, 1)
    }

    pub fn rtp(base: u16, count: u16) -> Self {
        Self::new("rtp", base, count, 2)
    }

    /// Reserve a port; it goes back to the pool when the reservation is dropped
    pub fn allocate(&self) -> Result<PortReservation, MediaError> {
        let inner = &self.inner;
        let slots = inner.count / inner.step;
        let mut pool = inner.pool.lock().unwrap_or_else(|e| e.into_inner());

        for _ in 0..slots {
            let slot = pool.next;
            pool.next = (pool.next + 1) % slots;
            let port = u32::from(inner.base) + u32::from(slot) * u32::from(inner.step);
            let Ok(port) = u16::try_from(port) else {
                continue;
            };
            if pool.in_use.insert(port) {
                debug!("Allocated {} port {}", inner.name, port);
                return Ok(PortReservation {
                    port,
                    allocator: self.inner.clone(),
                });
            }
        }

        Err(MediaError::NoPortAvailable(format!(
            "{} range {}+{}",
            inner.name, inner.base, inner.count
        )))
    }

    pub fn in_use(&self) -> usize {
        self.inner
            .pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .in_use
            .len()
    }
}

impl fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortAllocator")
            .field("name", &self.inner.name)
            .field("base", &self.inner.base)
            .field("count", &self.inner.count)
            .finish()
    }
}

/// A port held by one session
pub struct PortReservation {
    port: u16,
    allocator: Arc<AllocatorInner>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for PortReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortReservation({} {})", self.allocator.name, self.port)
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let mut pool = self.allocator.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.in_use.remove(&self.port);
        debug!("Released {} port {}", self.allocator.name, self.port);
    }
}
