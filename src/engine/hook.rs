use std::sync::{Arc, RwLock};

/// One "N of Total units" report emitted by an engine.
///
/// `depth` is 0 for the outermost loop of an invocation. Engines that run
/// nested loops report the inner ones with a greater depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTick {
    pub completed: u64,
    pub total: u64,
    pub depth: u32,
}

impl ProgressTick {
    pub fn outer(completed: u64, total: u64) -> Self {
        Self {
            completed,
            total,
            depth: 0,
        }
    }

    pub fn nested(completed: u64, total: u64, depth: u32) -> Self {
        Self {
            completed,
            total,
            depth,
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 0
    }

    /// `completed / total` clamped to [0, 1]; `None` when total is zero.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.completed as f64 / self.total as f64).clamp(0.0, 1.0))
    }
}

pub type ProgressHook = Arc<dyn Fn(&ProgressTick) + Send + Sync>;

pub fn noop_hook() -> ProgressHook {
    Arc::new(|_: &ProgressTick| {})
}

/// Replaceable progress callback an engine reports through.
///
/// Hooks are cloned out of the slot before being called, so a hook may itself
/// read or replace the slot without deadlocking.
pub struct ProgressSlot {
    hook: RwLock<ProgressHook>,
}

impl ProgressSlot {
    pub fn new() -> Self {
        Self {
            hook: RwLock::new(noop_hook()),
        }
    }

    pub fn current(&self) -> ProgressHook {
        self.hook
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Installs `hook` and returns the one it replaced.
    pub fn replace(&self, hook: ProgressHook) -> ProgressHook {
        let mut slot = self
            .hook
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, hook)
    }

    pub fn emit(&self, tick: ProgressTick) {
        let hook = self.current();
        hook(&tick);
    }
}

impl Default for ProgressSlot {
    fn default() -> Self {
        Self::new()
    }
}
