//! Shared Processed State: written by the processing boundary on the capture
//! context, read by the render stage on the render context.
//!
//! The writer always fills a back buffer that the reader cannot see and then
//! publishes it with one atomic pointer swap, so a draw only ever observes a
//! completely written state. Every publication carries a generation number;
//! generation 0 is the state produced by `initialize`, before any frame.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, Guard};

/// One published version of the processed state.
#[derive(Debug, Clone)]
pub struct Processed<T> {
    generation: u64,
    state: T,
}

impl<T> Processed<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True until the first frame has been processed.
    pub fn is_initial(&self) -> bool {
        self.generation == 0
    }

    pub fn state(&self) -> &T {
        &self.state
    }
}

impl<T> Deref for Processed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

struct Shared<T> {
    current: ArcSwap<Processed<T>>,
    reads: AtomicU64,
}

/// Create the double-buffered state seeded with `initial`.
pub fn shared_state<T: Clone>(initial: T) -> (StateWriter<T>, StateReader<T>) {
    let shared = Arc::new(Shared {
        current: ArcSwap::from_pointee(Processed {
            generation: 0,
            state: initial,
        }),
        reads: AtomicU64::new(0),
    });
    (
        StateWriter {
            shared: Arc::clone(&shared),
            spare: None,
            generation: 0,
        },
        StateReader { shared },
    )
}

/// The single writer. Not `Clone`: exactly one capture context owns it.
pub struct StateWriter<T> {
    shared: Arc<Shared<T>>,
    spare: Option<Processed<T>>,
    generation: u64,
}

impl<T: Clone> StateWriter<T> {
    /// Fill the back buffer with `f`, then publish it as the current state.
    ///
    /// `f` always starts from the current state. The back buffer reuses the
    /// storage of the previously displaced publication when no reader still
    /// holds it, otherwise it is a fresh copy.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let current = self.shared.current.load();
        let mut back = match self.spare.take() {
            Some(mut spare) => {
                spare.state.clone_from(&current.state);
                spare
            }
            None => Processed::clone(&current),
        };
        drop(current);
        let out = f(&mut back.state);
        self.publish(back);
        out
    }

    fn publish(&mut self, mut back: Processed<T>) {
        self.generation += 1;
        back.generation = self.generation;
        // `swap` settles outstanding reader guards on the old value, so a
        // unique count afterwards means no draw is still reading it.
        let old = self.shared.current.swap(Arc::new(back));
        self.spare = Arc::try_unwrap(old).ok();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A read handle for the render context.
pub struct StateReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StateReader<T> {
    fn clone(&self) -> Self {
        StateReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StateReader<T> {
    /// Load the most recently published state.
    pub fn load(&self) -> Guard<Arc<Processed<T>>> {
        self.shared.reads.fetch_add(1, Ordering::Relaxed);
        self.shared.current.load()
    }

    /// Generation of the current publication, without counting as a read.
    pub fn generation(&self) -> u64 {
        self.shared.current.load().generation
    }

    /// Number of [`load`](Self::load) calls made through any reader.
    pub fn read_count(&self) -> u64 {
        self.shared.reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publication_advances_generation() {
        let (mut writer, reader) = shared_state(vec![0u8; 4]);
        assert!(reader.load().is_initial());

        writer.write(|buf| buf.fill(7));
        let current = reader.load();
        assert_eq!(current.generation(), 1);
        assert_eq!(current.state(), &vec![7u8; 4]);
        assert_eq!(reader.read_count(), 2);
    }

    #[test]
    fn held_snapshot_is_not_overwritten() {
        let (mut writer, reader) = shared_state(0u32);
        writer.write(|v| *v = 1);

        let held = reader.load();
        writer.write(|v| *v = 2);
        writer.write(|v| *v = 3);

        assert_eq!(*held.state(), 1);
        assert_eq!(held.generation(), 1);
        drop(held);
        assert_eq!(*reader.load().state(), 3);
        assert_eq!(reader.generation(), 3);
    }

    #[test]
    fn in_place_updates_accumulate() {
        let (mut writer, reader) = shared_state(0u64);
        for _ in 0..4 {
            writer.write(|count| *count += 1);
        }
        assert_eq!(*reader.load().state(), 4);

        let held = reader.load();
        writer.write(|count| *count += 1);
        assert_eq!(*held.state(), 4);
        drop(held);
        writer.write(|count| *count += 1);
        assert_eq!(*reader.load().state(), 6);
    }

    #[test]
    fn unread_buffer_is_recycled() {
        let (mut writer, _reader) = shared_state(vec![0u8; 16]);
        writer.write(|buf| buf[0] = 1);
        writer.write(|buf| buf[0] = 2);
        assert!(writer.spare.is_some());
        let spare_ptr = writer.spare.as_ref().map(|p| p.state.as_ptr());
        writer.write(|buf| assert_eq!(Some(buf.as_ptr()), spare_ptr));
    }
}
