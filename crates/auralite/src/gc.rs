//! RT-safe deferred deallocation for buffer payloads and source blocks.
//!
//! Dropping a `basedrop::Shared<T>` on the mixer thread just enqueues a
//! pointer (~50ns); the actual `free`/`munmap` happens later on a dedicated
//! GC thread where latency doesn't matter. This matters here because
//! `DeleteBuffers` can run on an API thread concurrently with the mixer
//! holding a live reference to the same buffer for one in-flight callback,
//! and because buffer payloads can be tens of megabytes.
//!
//! Retirement is bursty: a handful of `DeleteBuffers` calls land together
//! when a level unloads, then nothing for a while. Rather than poll on a
//! fixed tick, the thread mostly blocks on a channel and wakes early
//! whenever a caller reports something was just retired, falling back to
//! `SWEEP_INTERVAL` so a collector nobody nudges still makes progress.

use basedrop::{Collector, Handle};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Upper bound on how long a retirement can sit uncollected if nothing
/// calls `notify_retirement`.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

struct GcThread {
    handle: Handle,
    wake: Sender<()>,
}

static GC_THREAD: OnceLock<GcThread> = OnceLock::new();

fn spawn_gc_thread() -> GcThread {
    let (handle_tx, handle_rx) = mpsc::channel();
    let (wake_tx, wake_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("auralite-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            handle_tx.send(collector.handle()).expect("failed to send GC handle");

            log::debug!("auralite GC thread started, sweep interval {:?}", SWEEP_INTERVAL);

            loop {
                match wake_rx.recv_timeout(SWEEP_INTERVAL) {
                    Ok(()) => {
                        // Coalesce the rest of this burst into one sweep.
                        while wake_rx.try_recv().is_ok() {}
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
                collector.collect();
            }
        })
        .expect("failed to spawn auralite GC thread");

    GcThread { handle: handle_rx.recv().expect("failed to receive GC handle"), wake: wake_tx }
}

fn gc_thread() -> &'static GcThread {
    GC_THREAD.get_or_init(spawn_gc_thread)
}

/// Get a handle for creating `Shared<T>` allocations.
pub fn gc_handle() -> Handle {
    gc_thread().handle.clone()
}

/// Nudge the collector to sweep soon instead of waiting out the full
/// `SWEEP_INTERVAL`. Call this right after retiring something large (e.g.
/// `BufferStore::delete`) so a multi-megabyte payload doesn't sit
/// freed-but-unreclaimed for the whole interval.
pub fn notify_retirement() {
    // A full channel or a dead receiver both just mean the sweep happens on
    // the next timeout instead; neither is worth surfacing as an error.
    let _ = gc_thread().wake.send(());
}
