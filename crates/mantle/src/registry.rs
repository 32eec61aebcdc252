use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Counts generation engines sharing the process so maintenance can split
/// the capacity limit between them.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    active: Arc<AtomicUsize>,
}

impl EngineRegistry {
    /// An isolated registry, mostly for tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every engine in the process.
    pub fn global() -> &'static EngineRegistry {
        static GLOBAL: OnceLock<EngineRegistry> = OnceLock::new();
        GLOBAL.get_or_init(EngineRegistry::new)
    }

    /// Count one more engine until the returned lease is dropped.
    pub fn register(&self) -> EngineLease {
        self.active.fetch_add(1, Ordering::AcqRel);
        EngineLease {
            active: Arc::clone(&self.active),
        }
    }

    /// Engines currently holding a lease.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Registration of one engine; unregisters on drop.
#[derive(Debug)]
pub struct EngineLease {
    active: Arc<AtomicUsize>,
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_track_active_engines() {
        let registry = EngineRegistry::new();
        assert_eq!(registry.active(), 0);
        let a = registry.register();
        let b = registry.clone().register();
        assert_eq!(registry.active(), 2);
        drop(a);
        assert_eq!(registry.active(), 1);
        drop(b);
        assert_eq!(registry.active(), 0);
    }
}
