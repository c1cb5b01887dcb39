//! Bounded, multi-level priority queue for inbound chat requests.
//!
//! Grounded on the original `request_queue.py`: three priority levels,
//! FIFO within a level (ties broken by enqueue timestamp), a worker
//! pool pulling from a single shared queue, and both a per-tenant and a
//! global depth cap to keep one noisy tenant from starving the rest.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lucy_domain::Error;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

/// Classify a chat message's queue priority from the model tier the
/// route classifier picked for it: fast-path-eligible traffic jumps the
/// line, frontier-tier (heavy) traffic waits behind everything else.
pub fn classify_priority(_message: &str, route_tier: &str) -> Priority {
    if route_tier == "frontier" {
        return Priority::Low;
    }
    if route_tier == "fast" {
        return Priority::High;
    }
    Priority::Normal
}

pub struct QueuedRequest {
    pub id: String,
    pub tenant_id: String,
    pub priority: Priority,
    pub enqueue_time: Instant,
    pub payload: serde_json::Value,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueue_time == other.enqueue_time
    }
}
impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the lowest (priority, enqueue_time)
        // pair to come out first, so invert the comparison.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueue_time.cmp(&self.enqueue_time))
    }
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: QueuedRequest);
}

pub const MAX_QUEUE_DEPTH_PER_TENANT: usize = 50;
pub const MAX_TOTAL_QUEUE_DEPTH: usize = 200;
pub const NUM_WORKERS: usize = 10;

struct Shared {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    per_tenant_depth: Mutex<HashMap<String, usize>>,
    notify: Notify,
    busy_workers: AtomicU64,
    total_enqueued: AtomicU64,
    total_wait_ms: Mutex<Vec<u64>>,
}

/// Multi-worker priority queue. `start` spawns `num_workers` tasks that
/// pull the highest-priority request and hand it to `handler`.
pub struct RequestQueue {
    shared: Arc<Shared>,
    num_workers: usize,
    max_per_tenant: usize,
    max_total: usize,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RequestQueue {
    pub fn new(num_workers: usize, max_per_tenant: usize, max_total: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                heap: Mutex::new(BinaryHeap::new()),
                per_tenant_depth: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                busy_workers: AtomicU64::new(0),
                total_enqueued: AtomicU64::new(0),
                total_wait_ms: Mutex::new(Vec::new()),
            }),
            num_workers,
            max_per_tenant,
            max_total,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, request: QueuedRequest) -> Result<(), Error> {
        let mut depth = self.shared.per_tenant_depth.lock();
        let tenant_depth = depth.entry(request.tenant_id.clone()).or_insert(0);
        if *tenant_depth >= self.max_per_tenant {
            return Err(Error::RateLimited {
                resource: format!("queue:tenant:{}", request.tenant_id),
            });
        }
        let total: usize = depth.values().sum();
        if total >= self.max_total {
            return Err(Error::RateLimited {
                resource: "queue:total".into(),
            });
        }
        *tenant_depth += 1;
        drop(depth);

        self.shared.heap.lock().push(request);
        self.shared.total_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn start(&self, handler: Arc<dyn RequestHandler>) {
        let mut handles = self.handles.lock();
        for _ in 0..self.num_workers {
            let shared = self.shared.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(Self::worker_loop(shared, handler)));
        }
    }

    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    async fn worker_loop(shared: Arc<Shared>, handler: Arc<dyn RequestHandler>) {
        loop {
            let next = shared.heap.lock().pop();
            let request = match next {
                Some(r) => r,
                None => {
                    tokio::select! {
                        _ = shared.notify.notified() => continue,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    }
                }
            };

            let wait_ms = request.enqueue_time.elapsed().as_millis() as u64;
            shared.total_wait_ms.lock().push(wait_ms);
            shared.busy_workers.fetch_add(1, AtomicOrdering::Relaxed);

            let tenant_id = request.tenant_id.clone();
            handler.handle(request).await;

            if let Some(depth) = shared.per_tenant_depth.lock().get_mut(&tenant_id) {
                *depth = depth.saturating_sub(1);
            }
            shared.busy_workers.fetch_sub(1, AtomicOrdering::Relaxed);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy_workers.load(AtomicOrdering::Relaxed) >= self.num_workers as u64
    }

    pub fn metrics(&self) -> QueueMetrics {
        let depth = self.shared.per_tenant_depth.lock();
        QueueMetrics {
            total_depth: depth.values().sum(),
            total_enqueued: self.shared.total_enqueued.load(AtomicOrdering::Relaxed),
            busy_workers: self.shared.busy_workers.load(AtomicOrdering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueMetrics {
    pub total_depth: usize,
    pub total_enqueued: u64,
    pub busy_workers: u64,
}
