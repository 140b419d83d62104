//! Request/response plumbing shared by the name server and chunk server clients.
//!
//! Responsibilities:
//! - Define the wire messages (`proto`) and the `Channel`/`Transport`/`Service`
//!   seams that concrete transports plug into.
//! - Cache channels by address so every handle talking to the same chunk server
//!   reuses one endpoint.
//! - Bound every call by a per-attempt timeout and an attempt budget.
//!
//! Submodules:
//! - `proto`: message types and status codes
//! - `tcp`: length-delimited bincode frames over TCP
//! - `server`: accept loop dispatching frames to a `Service`
//! - `memory`: in-process transport routing addresses to services

pub mod memory;
pub mod proto;
pub mod server;
pub mod tcp;

use crate::config::CallPolicy;
use crate::error::RpcError;
use async_trait::async_trait;
use proto::Message;
use rand::{RngCore, rng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A lazily established endpoint to one remote address. One call is one attempt.
#[async_trait]
pub trait Channel: Send + Sync {
    fn address(&self) -> &str;

    async fn call(&self, request: Message) -> Result<Message, RpcError>;
}

/// Builds channels. Construction must not touch the network.
pub trait Transport: Send + Sync {
    fn channel(&self, addr: &str) -> Arc<dyn Channel>;
}

/// Server side of a channel.
#[async_trait]
pub trait Service: Send + Sync {
    async fn handle(&self, request: Message) -> Message;
}

const CHANNEL_CACHE_CAPACITY: u64 = 1024;

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    channels: moka::future::Cache<String, Arc<dyn Channel>>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            channels: moka::future::Cache::new(CHANNEL_CACHE_CAPACITY),
        }
    }

    /// Channel for `addr`, shared with every other caller asking for the same address.
    pub async fn get_stub(&self, addr: &str) -> Arc<dyn Channel> {
        self.channels
            .get_with(addr.to_string(), async { self.transport.channel(addr) })
            .await
    }

    /// Send `request`, retrying transport failures until the attempt budget runs out.
    pub async fn send_request(
        &self,
        channel: &dyn Channel,
        request: Message,
        policy: CallPolicy,
    ) -> Result<Message, RpcError> {
        let attempts = policy.attempts.max(1);
        let name = request.name();
        for attempt in 1..attempts {
            match Self::attempt(channel, request.clone(), policy.timeout()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    warn!(
                        addr = channel.address(),
                        request = name,
                        attempt,
                        attempts,
                        "rpc attempt failed: {e}"
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Self::attempt(channel, request, policy.timeout()).await
    }

    async fn attempt(
        channel: &dyn Channel,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, RpcError> {
        debug!(addr = channel.address(), request = request.name(), "rpc call");
        match tokio::time::timeout(timeout, channel.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                addr: channel.address().to_string(),
                timeout,
            }),
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let random_delta = rng().next_u64() % 20;
    Duration::from_millis(20 + (1u64 << attempt.min(10)) + random_delta)
}
