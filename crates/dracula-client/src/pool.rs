//! Health-tracked UDP server pool
//!
//! Keeps the configured endpoints partitioned into healthy and unhealthy
//! lists. The pool itself never probes anything; the client's health loop
//! runs the probes and publishes each round's result here. Every endpoint
//! is always in exactly one of the two lists.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use dracula_common::Endpoint;

/// UDP endpoint pool with health partitioning.
#[derive(Debug)]
pub struct ServerPool {
    servers: Vec<Endpoint>,
    healthy: Mutex<Vec<Endpoint>>,
    unhealthy: Mutex<Vec<Endpoint>>,
    disposed: AtomicBool,
}

impl ServerPool {
    pub fn new(servers: Vec<Endpoint>) -> Self {
        Self {
            servers,
            healthy: Mutex::new(Vec::new()),
            unhealthy: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// All configured endpoints, regardless of health.
    pub fn servers(&self) -> &[Endpoint] {
        &self.servers
    }

    /// Publish one health round's verdict.
    pub fn set_health(&self, healthy: Vec<Endpoint>, unhealthy: Vec<Endpoint>) {
        *self.healthy.lock() = healthy;
        *self.unhealthy.lock() = unhealthy;
    }

    /// A uniformly random healthy endpoint, or `None` when all are down.
    pub fn choose(&self) -> Option<Endpoint> {
        let healthy = self.healthy.lock();
        match healthy.len() {
            0 => None,
            1 => Some(healthy[0]),
            n => Some(healthy[rand::thread_rng().gen_range(0..n)]),
        }
    }

    pub fn list_healthy(&self) -> Vec<Endpoint> {
        self.healthy.lock().clone()
    }

    pub fn list_unhealthy(&self) -> Vec<Endpoint> {
        self.unhealthy.lock().clone()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
