//! Live GPU object accounting.
//!
//! Every RAII wrapper in this crate registers itself with the owning device's
//! [`ResourceTracker`] when created and deregisters when dropped. The counts
//! make "teardown releases exactly what setup created" checkable, including
//! after a setup that failed halfway through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Kinds of GPU objects the tracker counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ResourceKind {
    Swapchain,
    ImageView,
    Buffer,
    Image,
    ShaderModule,
    DescriptorSetLayout,
    DescriptorPool,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    CommandPool,
    Semaphore,
    Fence,
}

impl ResourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Swapchain,
        ResourceKind::ImageView,
        ResourceKind::Buffer,
        ResourceKind::Image,
        ResourceKind::ShaderModule,
        ResourceKind::DescriptorSetLayout,
        ResourceKind::DescriptorPool,
        ResourceKind::PipelineLayout,
        ResourceKind::Pipeline,
        ResourceKind::RenderPass,
        ResourceKind::Framebuffer,
        ResourceKind::CommandPool,
        ResourceKind::Semaphore,
        ResourceKind::Fence,
    ];

    const COUNT: usize = Self::ALL.len();
}

/// Thread-safe created/destroyed counters per [`ResourceKind`].
#[derive(Debug, Default)]
pub struct ResourceTracker {
    created: [AtomicU64; ResourceKind::COUNT],
    destroyed: [AtomicU64; ResourceKind::COUNT],
}

impl ResourceTracker {
    /// Create an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one new object and return the token that deregisters it on drop.
    pub fn track(self: &Arc<Self>, kind: ResourceKind) -> TrackedResource {
        self.created[kind as usize].fetch_add(1, Ordering::Relaxed);
        TrackedResource {
            tracker: Arc::clone(self),
            kind,
        }
    }

    fn release(&self, kind: ResourceKind) {
        self.destroyed[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut snapshot = ResourceSnapshot::default();
        for kind in ResourceKind::ALL {
            snapshot.created[kind as usize] = self.created[kind as usize].load(Ordering::Relaxed);
            snapshot.destroyed[kind as usize] = self.destroyed[kind as usize].load(Ordering::Relaxed);
        }
        snapshot
    }

    /// Total objects currently alive.
    pub fn live_total(&self) -> u64 {
        self.snapshot().live_total()
    }

    /// Log a warning per kind that still has live objects. Returns the live total.
    pub fn report_leaks(&self) -> u64 {
        let snapshot = self.snapshot();
        for kind in ResourceKind::ALL {
            let live = snapshot.live(kind);
            if live > 0 {
                warn!("{live} {kind:?} object(s) still alive");
            }
        }
        snapshot.live_total()
    }
}

/// Counter values captured by [`ResourceTracker::snapshot`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    created: [u64; ResourceKind::COUNT],
    destroyed: [u64; ResourceKind::COUNT],
}

impl ResourceSnapshot {
    /// Objects of `kind` created so far.
    pub fn created(&self, kind: ResourceKind) -> u64 {
        self.created[kind as usize]
    }

    /// Objects of `kind` destroyed so far.
    pub fn destroyed(&self, kind: ResourceKind) -> u64 {
        self.destroyed[kind as usize]
    }

    /// Objects of `kind` still alive.
    pub fn live(&self, kind: ResourceKind) -> u64 {
        self.created(kind).saturating_sub(self.destroyed(kind))
    }

    /// Objects of every kind created so far.
    pub fn created_total(&self) -> u64 {
        self.created.iter().sum()
    }

    /// Objects of every kind still alive.
    pub fn live_total(&self) -> u64 {
        ResourceKind::ALL.iter().map(|&k| self.live(k)).sum()
    }
}

/// RAII registration held by each wrapper. Dropping it counts one destruction.
#[derive(Debug)]
pub struct TrackedResource {
    tracker: Arc<ResourceTracker>,
    kind: ResourceKind,
}

impl TrackedResource {
    /// Kind this token was registered as.
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for TrackedResource {
    fn drop(&mut self) {
        self.tracker.release(self.kind);
    }
}
