use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type Frame = [f32; 2];

/// Single-producer / single-consumer ring of stereo f32 frames between the
/// render thread and the audio device callback.
///
/// Pushing into a full queue drops the newest frames. The renderer checks
/// [`SampleProducer::free_frames`] first and only pushes whole driver ticks,
/// so in practice nothing is dropped.
pub struct SampleConsumer {
    inner: Arc<Inner>,
}

pub struct SampleProducer {
    inner: Arc<Inner>,
}

struct Inner {
    // One extra slot so head==tail is unambiguously empty.
    buf: Box<[UnsafeCell<MaybeUninit<Frame>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Only the producer writes `buf[head]`, only the consumer reads `buf[tail]`,
// and ownership of a slot is handed over through the atomics.
unsafe impl Sync for Inner {}

impl Inner {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            (self.cap - tail) + head
        }
    }

    fn capacity_frames(&self) -> usize {
        self.cap - 1
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap { 0 } else { next }
    }
}

pub fn sample_queue(capacity_frames: usize) -> (SampleProducer, SampleConsumer) {
    let cap = capacity_frames.saturating_add(1).max(2);
    let buf = (0..cap)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let inner = Arc::new(Inner {
        buf,
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        SampleProducer {
            inner: Arc::clone(&inner),
        },
        SampleConsumer { inner },
    )
}

impl SampleProducer {
    #[inline]
    pub fn push(&self, frame: Frame) -> bool {
        let head = self.inner.head.load(Ordering::Relaxed);
        let next = self.inner.next_index(head);
        let tail = self.inner.tail.load(Ordering::Acquire);
        if next == tail {
            return false;
        }

        unsafe {
            (*self.inner.buf[head].get()).write(frame);
        }
        self.inner.head.store(next, Ordering::Release);
        true
    }

    /// Push interleaved stereo samples. Returns the number of frames queued.
    pub fn push_interleaved(&self, samples: &[f32]) -> usize {
        samples
            .chunks_exact(2)
            .take_while(|lr| self.push([lr[0], lr[1]]))
            .count()
    }

    pub fn free_frames(&self) -> usize {
        self.inner.capacity_frames() - self.inner.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.capacity_frames()
    }
}

impl SampleConsumer {
    #[inline]
    pub fn pop(&self) -> Option<Frame> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let frame = unsafe { (*self.inner.buf[tail].get()).assume_init_read() };
        let next = self.inner.next_index(tail);
        self.inner.tail.store(next, Ordering::Release);
        Some(frame)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.inner.capacity_frames()
    }
}
