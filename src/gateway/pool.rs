//! Blocking worker lanes, one per server.
//!
//! Each lane is a semaphore with `workers_per_server` permits. A gateway call
//! holds a permit for as long as its blocking transport call runs, including
//! after the caller has given up on it, so a hung server only exhausts its own lane.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;

#[derive(Debug)]
pub struct WorkerPool {
    per_server: usize,
    lanes: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl WorkerPool {
    pub fn new(per_server: usize) -> Self {
        Self {
            per_server: per_server.max(1),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn lane(&self, server_id: &str) -> Arc<Semaphore> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_server)))
            .clone()
    }

    /// Free permits on a lane; `per_server` for a lane never used.
    pub fn available(&self, server_id: &str) -> usize {
        let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        lanes
            .get(server_id)
            .map(|s| s.available_permits())
            .unwrap_or(self.per_server)
    }
}
