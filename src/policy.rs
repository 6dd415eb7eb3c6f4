//! `NeuralPackingPolicy` (spec §4.11/§5): an optional, batched oracle that
//! hands `UCTSearch` per-edge prior weights. The model itself is external —
//! this module only owns the worker pool, the batching queue, and the
//! per-node completion signaling.
//!
//! `VectorPack`/`OperandPack` graphs never cross the worker boundary (spec
//! §5: "the context itself is single threaded") — only the plain feature
//! vectors `search::mcts::encode_features` produces do. Concurrency is
//! built from `std::sync::{mpsc, Mutex, Condvar}` + `std::thread`, matching
//! the teacher's own preference for hand-rolled std primitives over an
//! async runtime for anything this small (see DESIGN.md).

use crate::error::{PackerError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Forward pass over a batch of feature vectors: one row of per-child
/// softmax weights back per request, in the same order. This is the only
/// seam a host needs to fill in — everything else in this module is queue
/// and thread plumbing around it.
pub trait BatchForward: Send + Sync {
    fn batch_forward(&self, features: &[Vec<f32>]) -> Vec<Vec<f32>>;
}

struct PendingSlot {
    weights: Mutex<Option<Vec<f32>>>,
    ready: Condvar,
}

impl PendingSlot {
    fn new() -> Self {
        Self { weights: Mutex::new(None), ready: Condvar::new() }
    }

    fn fulfill(&self, weights: Vec<f32>) {
        let mut guard = self.weights.lock().unwrap();
        *guard = Some(weights);
        self.ready.notify_all();
    }

    /// Blocks until a result is set or `cancel()` fires. Spec §4.11: "a
    /// waiter observes completion with empty weights and must treat that
    /// as no prior" on cancellation — so a `None` return means exactly
    /// that, not "still pending."
    fn wait(&self, shutdown: &AtomicBool) -> Option<Vec<f32>> {
        let mut guard = self.weights.lock().unwrap();
        loop {
            if guard.is_some() {
                return guard.take();
            }
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            let (g, timeout) = self.ready.wait_timeout(guard, Duration::from_millis(50)).unwrap();
            guard = g;
            let _ = timeout;
        }
    }
}

struct Request {
    id: u64,
    features: Vec<f32>,
    slot: Arc<PendingSlot>,
}

/// Batched policy pool (spec §4.11). Cloning is cheap: every clone shares
/// the same queue and worker pool, so a node's `predictAsync` can be
/// issued from any thread that holds a handle.
#[derive(Clone)]
pub struct NeuralPackingPolicy {
    inner: Arc<PolicyInner>,
}

struct PolicyInner {
    sender: SyncSender<Request>,
    shutdown: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: Mutex<std::collections::HashMap<u64, Arc<PendingSlot>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NeuralPackingPolicy {
    /// `batch_size` caps how many requests one worker forwards together;
    /// `num_threads` is the worker pool size; `inflight_cap` is the
    /// backpressure bound on outstanding, not-yet-dequeued requests.
    pub fn new(model: Arc<dyn BatchForward>, batch_size: usize, num_threads: usize, inflight_cap: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PackerError::InvalidBatchSize);
        }
        if num_threads == 0 {
            return Err(PackerError::InvalidThreadCount);
        }
        let (sender, receiver) = sync_channel::<Request>(inflight_cap.max(batch_size));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending: Arc<Mutex<std::collections::HashMap<u64, Arc<PendingSlot>>>> = Arc::new(Mutex::new(std::collections::HashMap::new()));

        let mut workers = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            let pending = pending.clone();
            let model = model.clone();
            let handle = std::thread::Builder::new()
                .name(format!("slp-policy-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, shutdown, pending, model, batch_size))
                .expect("failed to spawn policy worker thread");
            workers.push(handle);
        }

        Ok(Self {
            inner: Arc::new(PolicyInner {
                sender,
                shutdown,
                next_id: AtomicU64::new(0),
                pending,
                workers: Mutex::new(workers),
            }),
        })
    }

    /// Fire-and-forget enqueue (spec §4.11 `predictAsync`). Retries on a
    /// full queue instead of blocking forever, so `cancel()` can still
    /// unblock a producer stuck on backpressure (spec §5: "cancellation
    /// must unblock both producers ... and consumers").
    pub fn predict_async(&self, features: Vec<f32>) -> PendingPrediction {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(PendingSlot::new());
        self.inner.pending.lock().unwrap().insert(id, slot.clone());

        let mut request = Request { id, features, slot: slot.clone() };
        loop {
            if self.inner.shutdown.load(Ordering::Acquire) {
                slot.fulfill(Vec::new());
                break;
            }
            match self.inner.sender.try_send(request) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    request = back;
                    std::thread::yield_now();
                }
                Err(TrySendError::Disconnected(_)) => {
                    slot.fulfill(Vec::new());
                    break;
                }
            }
        }

        PendingPrediction { id, slot, shutdown: self.inner.shutdown.clone() }
    }

    /// Synchronous `predict` (spec §4.11): enqueue and block for the
    /// result. `None` on cancellation or an empty softmax — both mean "no
    /// prior."
    pub fn predict(&self, features: Vec<f32>) -> Option<Vec<f32>> {
        self.predict_async(features).wait()
    }

    /// Sets the shutdown flag and wakes every waiter; does not join
    /// workers (that happens on drop, mirroring spec §5's "destruction of
    /// the policy joins all workers").
    pub fn cancel(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let pending = self.inner.pending.lock().unwrap();
        for slot in pending.values() {
            slot.ready.notify_all();
        }
    }
}

impl Drop for PolicyInner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// A handle to an in-flight `predictAsync` request.
pub struct PendingPrediction {
    id: u64,
    slot: Arc<PendingSlot>,
    shutdown: Arc<AtomicBool>,
}

impl PendingPrediction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wait(&self) -> Option<Vec<f32>> {
        self.slot.wait(&self.shutdown)
    }
}

fn worker_loop(
    _worker_id: usize,
    receiver: Arc<Mutex<Receiver<Request>>>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<Mutex<std::collections::HashMap<u64, Arc<PendingSlot>>>>,
    model: Arc<dyn BatchForward>,
    batch_size: usize,
) {
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        {
            let rx = receiver.lock().unwrap();
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(req) => batch.push(req),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
            }
            while batch.len() < batch_size {
                match rx.try_recv() {
                    Ok(req) => batch.push(req),
                    Err(_) => break,
                }
            }
        }

        let features: Vec<Vec<f32>> = batch.iter().map(|r| r.features.clone()).collect();
        let outputs = model.batch_forward(&features);
        for (req, weights) in batch.into_iter().zip(outputs.into_iter()) {
            pending.lock().unwrap().remove(&req.id);
            req.slot.fulfill(weights);
        }

        if shutdown.load(Ordering::Acquire) {
            return;
        }
    }
}
