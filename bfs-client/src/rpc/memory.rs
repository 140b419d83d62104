//! In-process transport: addresses map to `Service` objects, no sockets involved.
//! Every call is counted so tests can assert that an operation stayed local.

use super::proto::Message;
use super::{Channel, Service, Transport};
use crate::error::RpcError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Routes {
    services: HashMap<String, Arc<dyn Service>>,
    calls: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<Mutex<Routes>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: impl Into<String>, service: Arc<dyn Service>) {
        self.lock().services.insert(addr.into(), service);
    }

    /// Make `addr` unreachable, as if its process died.
    pub fn unregister(&self, addr: &str) {
        self.lock().services.remove(addr);
    }

    /// Total calls issued through this transport, reachable or not.
    pub fn calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn calls_to(&self, addr: &str) -> usize {
        self.lock().calls.get(addr).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn channel(&self, addr: &str) -> Arc<dyn Channel> {
        Arc::new(MemoryChannel {
            addr: addr.to_string(),
            transport: self.clone(),
        })
    }
}

struct MemoryChannel {
    addr: String,
    transport: MemoryTransport,
}

#[async_trait]
impl Channel for MemoryChannel {
    fn address(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: Message) -> Result<Message, RpcError> {
        let service = {
            let mut routes = self.transport.lock();
            *routes.calls.entry(self.addr.clone()).or_default() += 1;
            routes.services.get(&self.addr).cloned()
        };
        match service {
            Some(service) => Ok(service.handle(request).await),
            None => Err(RpcError::Unreachable {
                addr: self.addr.clone(),
            }),
        }
    }
}
