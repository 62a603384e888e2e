// Frame relay
// Single-slot mailbox between the decoder thread and the UI thread

use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::VideoFrame;

/// Scheduler seam for posting one asynchronous render callback onto the UI
/// thread. The viewer window implements this over its command channel.
pub trait RenderScheduler: Send + Sync {
    fn schedule_render(&self);
}

/// Single-entry frame holder. Overwrite-on-arrival, never a queue; the
/// pending flag coalesces render requests across bursts of pushes.
struct FrameSlot {
    frame: Option<Arc<VideoFrame>>,
    pending: bool,
}

/// Thread-safe mailbox holding the most recent decoded frame.
///
/// `push` runs on the producer thread at arbitrary rate and never waits for
/// a render. `take` runs only on the UI thread. Across any burst of pushes
/// with no intervening `take`, only the latest pushed frame is ever
/// rendered; earlier frames are discarded - latest-wins.
pub struct FrameRelay {
    slot: Mutex<FrameSlot>,
    scheduler: Arc<dyn RenderScheduler>,
}

impl FrameRelay {
    pub fn new(scheduler: Arc<dyn RenderScheduler>) -> Self {
        Self {
            slot: Mutex::new(FrameSlot {
                frame: None,
                pending: false,
            }),
            scheduler,
        }
    }

    /// Overwrite the slot with `frame`. Schedules one render callback when
    /// no render is already pending; returns immediately either way.
    pub fn push(&self, frame: Arc<VideoFrame>) {
        if frame.is_degenerate() {
            log::debug!("Dropping degenerate frame {}x{}", frame.width(), frame.height());
            return;
        }

        let schedule = {
            let mut slot = self.slot.lock();
            slot.frame = Some(frame);
            let was_pending = slot.pending;
            slot.pending = true;
            !was_pending
        };
        // Invoked outside the lock so the producer never blocks on the
        // scheduler, and the slot lock never covers UI work.
        if schedule {
            self.scheduler.schedule_render();
        }
    }

    /// Move the held frame out and clear the pending flag. Returns `None`
    /// when no frame is held.
    pub fn take(&self) -> Option<Arc<VideoFrame>> {
        let mut slot = self.slot.lock();
        slot.pending = false;
        slot.frame.take()
    }
}

/// Clonable producer-side handle; the decoder's frame callback delivers
/// through this.
#[derive(Clone)]
pub struct FrameSink {
    relay: Arc<FrameRelay>,
}

impl FrameSink {
    pub fn new(relay: Arc<FrameRelay>) -> Self {
        Self { relay }
    }

    pub fn push(&self, frame: Arc<VideoFrame>) {
        self.relay.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingScheduler {
        calls: AtomicUsize,
    }

    impl CountingScheduler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RenderScheduler for CountingScheduler {
        fn schedule_render(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tagged_frame(tag: i64) -> Arc<VideoFrame> {
        Arc::new(VideoFrame::bgra(
            2,
            2,
            Some(tag),
            Plane::new(vec![0u8; 16], 8),
        ))
    }

    #[test]
    fn test_latest_wins() {
        let scheduler = CountingScheduler::new();
        let relay = FrameRelay::new(scheduler.clone());

        for tag in 0..10 {
            relay.push(tagged_frame(tag));
        }

        let taken = relay.take().expect("a frame should be held");
        assert_eq!(taken.pts(), Some(9));
        assert!(relay.take().is_none());
    }

    #[test]
    fn test_push_coalesces_to_one_schedule() {
        let scheduler = CountingScheduler::new();
        let relay = FrameRelay::new(scheduler.clone());

        for tag in 0..5 {
            relay.push(tagged_frame(tag));
        }
        assert_eq!(scheduler.count(), 1);

        // A take re-arms the relay; the next push schedules again.
        relay.take();
        relay.push(tagged_frame(99));
        assert_eq!(scheduler.count(), 2);
    }

    #[test]
    fn test_take_on_empty() {
        let scheduler = CountingScheduler::new();
        let relay = FrameRelay::new(scheduler.clone());
        assert!(relay.take().is_none());
    }

    #[test]
    fn test_degenerate_push_is_noop() {
        let scheduler = CountingScheduler::new();
        let relay = FrameRelay::new(scheduler.clone());

        relay.push(Arc::new(VideoFrame::bgra(
            0,
            0,
            None,
            Plane::new(vec![], 0),
        )));
        assert_eq!(scheduler.count(), 0);
        assert!(relay.take().is_none());
    }

    #[test]
    fn test_cross_thread_push() {
        let scheduler = CountingScheduler::new();
        let relay = Arc::new(FrameRelay::new(scheduler.clone()));
        let sink = FrameSink::new(relay.clone());

        let producer = std::thread::spawn(move || {
            for tag in 0..100 {
                sink.push(tagged_frame(tag));
            }
        });
        producer.join().unwrap();

        let taken = relay.take().expect("a frame should be held");
        assert_eq!(taken.pts(), Some(99));
    }
}
