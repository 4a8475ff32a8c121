//! GPU event bridge - lifecycle events between the emulated CPU and the GE core
//!
//! The emulated-CPU thread posts frame lifecycle events here and the render
//! thread drains them strictly between opcodes. The queue preserves total
//! order and is single-producer single-consumer: exactly one sender handle
//! exists per bridge.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Maximum number of events buffered before the producer starts dropping
pub const BRIDGE_QUEUE_CAPACITY: usize = 4096;

/// Texture/framebuffer cache invalidation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationKind {
    /// Invalidate everything.
    All,
    /// The range is known to have changed.
    Safe,
    /// The range may have changed.
    Hint,
    /// Force reload of the range.
    Force,
}

/// Frame lifecycle events consumed by the render thread
#[derive(Debug, Clone, Copy)]
pub enum GpuEvent {
    /// Bind the default viewport and clear in non-buffered mode.
    InitClear,
    /// A new display frame has started.
    BeginFrame,
    /// Copy the current virtual framebuffer to the output surface.
    CopyDisplayToOutput,
    /// Invalidate cached data overlapping a guest memory range.
    InvalidateCache {
        addr: u32,
        size: i32,
        kind: InvalidationKind,
    },
}

struct Shared {
    queue: Mutex<VecDeque<GpuEvent>>,
    /// Signalled by the consumer whenever it drains the queue empty.
    drained: Condvar,
    /// Cheap pending check for the hot interpreter loop.
    nonempty: AtomicBool,
    connected: AtomicBool,
    /// Frame limiter is off; read by BeginFrame to reconcile vsync.
    unthrottled: AtomicBool,
}

/// The producer side of the bridge (emulated-CPU thread)
pub struct GpuEventSender {
    shared: Arc<Shared>,
}

impl GpuEventSender {
    /// Post an event. Returns false if the consumer is not connected or the
    /// queue is full (the event is dropped with a log in that case).
    pub fn post(&self, event: GpuEvent) -> bool {
        if !self.shared.connected.load(Ordering::Acquire) {
            return false;
        }

        let mut queue = self.shared.queue.lock();
        if queue.len() >= BRIDGE_QUEUE_CAPACITY {
            tracing::warn!("GPU event queue full, dropping {:?}", event);
            return false;
        }
        queue.push_back(event);
        self.shared.nonempty.store(true, Ordering::Release);
        true
    }

    /// Block until the consumer has drained every event posted so far.
    ///
    /// Used by framebuffer-dirty queries in separate-thread mode so the
    /// answer reflects a fully processed stream.
    pub fn sync(&self) {
        if !self.shared.connected.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.shared.queue.lock();
        while !queue.is_empty() {
            self.shared.drained.wait(&mut queue);
        }
    }

    /// Flag the frame limiter state for the next BeginFrame.
    pub fn set_unthrottled(&self, unthrottled: bool) {
        self.shared.unthrottled.store(unthrottled, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

/// The consumer side of the bridge (render thread)
pub struct GpuEventReceiver {
    shared: Arc<Shared>,
}

impl GpuEventReceiver {
    /// Non-blocking receive of the oldest pending event.
    pub fn try_recv(&self) -> Option<GpuEvent> {
        let mut queue = self.shared.queue.lock();
        let event = queue.pop_front();
        if queue.is_empty() {
            self.shared.nonempty.store(false, Ordering::Release);
            self.shared.drained.notify_all();
        }
        event
    }

    /// Drain all pending events in posting order.
    pub fn drain(&self) -> Vec<GpuEvent> {
        let mut queue = self.shared.queue.lock();
        let events: Vec<GpuEvent> = queue.drain(..).collect();
        self.shared.nonempty.store(false, Ordering::Release);
        self.shared.drained.notify_all();
        events
    }

    /// Lock-free pending check, suitable for the per-opcode fast path.
    pub fn has_pending(&self) -> bool {
        self.shared.nonempty.load(Ordering::Acquire)
    }

    /// Frame limiter state as last flagged by the producer.
    pub fn unthrottled(&self) -> bool {
        self.shared.unthrottled.load(Ordering::Acquire)
    }

    /// Mark the bridge as connected.
    pub fn connect(&self) {
        self.shared.connected.store(true, Ordering::Release);
        tracing::info!("GPU event bridge connected");
    }

    /// Mark the bridge as disconnected.
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);
        // Release anyone parked in sync().
        let _queue = self.shared.queue.lock();
        self.shared.drained.notify_all();
        tracing::info!("GPU event bridge disconnected");
    }
}

/// Create a new GPU event bridge pair (sender, receiver)
pub fn create_gpu_bridge() -> (GpuEventSender, GpuEventReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(BRIDGE_QUEUE_CAPACITY)),
        drained: Condvar::new(),
        nonempty: AtomicBool::new(false),
        connected: AtomicBool::new(false),
        unthrottled: AtomicBool::new(false),
    });

    (
        GpuEventSender {
            shared: Arc::clone(&shared),
        },
        GpuEventReceiver { shared },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_creation() {
        let (sender, receiver) = create_gpu_bridge();
        assert!(!sender.is_connected());
        receiver.connect();
        assert!(sender.is_connected());
    }

    #[test]
    fn test_post_requires_connection() {
        let (sender, receiver) = create_gpu_bridge();
        assert!(!sender.post(GpuEvent::BeginFrame));
        receiver.connect();
        assert!(sender.post(GpuEvent::BeginFrame));
    }

    #[test]
    fn test_events_drain_in_order() {
        let (sender, receiver) = create_gpu_bridge();
        receiver.connect();

        sender.post(GpuEvent::InitClear);
        sender.post(GpuEvent::BeginFrame);
        sender.post(GpuEvent::InvalidateCache {
            addr: 0x0880_0000,
            size: 0x100,
            kind: InvalidationKind::Hint,
        });

        assert!(receiver.has_pending());
        let events = receiver.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], GpuEvent::InitClear));
        assert!(matches!(events[1], GpuEvent::BeginFrame));
        assert!(matches!(
            events[2],
            GpuEvent::InvalidateCache {
                addr: 0x0880_0000,
                ..
            }
        ));
        assert!(!receiver.has_pending());
    }

    #[test]
    fn test_sync_returns_once_drained() {
        let (sender, receiver) = create_gpu_bridge();
        receiver.connect();
        sender.post(GpuEvent::CopyDisplayToOutput);

        let handle = std::thread::spawn(move || {
            // Simulated render thread: drain after a short delay.
            std::thread::sleep(std::time::Duration::from_millis(10));
            receiver.drain();
        });

        sender.sync();
        handle.join().unwrap();
    }

    #[test]
    fn test_unthrottled_flag() {
        let (sender, receiver) = create_gpu_bridge();
        receiver.connect();
        assert!(!receiver.unthrottled());
        sender.set_unthrottled(true);
        assert!(receiver.unthrottled());
    }
}
