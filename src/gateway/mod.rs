//! # Command Gateway
//!
//! Executes one console command against one server under a bounded timeout.
//!
//! - The registry lock is held only to copy the server's [`Endpoint`]; it is
//!   released before any network work starts.
//! - The blocking transport call runs on `spawn_blocking`, gated by the
//!   server's lane in the [`WorkerPool`].
//! - The outer deadline is the server's inner timeout plus a grace period. On
//!   expiry the caller gets [`GatewayError::TimedOut`]; the blocking call is
//!   left to finish on its own and its result is dropped.
//! - No retries.

pub mod pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::logutil::escape_log;
use crate::metrics;
use crate::rcon::{RconTransport, TransportError};
use crate::registry::ServerRegistry;

pub use pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub workers_per_server: usize,
    /// Added to the per-server inner timeout to form the outer deadline.
    pub outer_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            workers_per_server: 2,
            outer_grace: Duration::from_millis(1000),
        }
    }
}

pub struct CommandGateway {
    registry: Arc<RwLock<ServerRegistry>>,
    transport: Option<Arc<dyn RconTransport>>,
    pool: WorkerPool,
    grace: Duration,
}

impl CommandGateway {
    pub fn new(
        registry: Arc<RwLock<ServerRegistry>>,
        transport: Option<Arc<dyn RconTransport>>,
        cfg: &GatewayConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            pool: WorkerPool::new(cfg.workers_per_server),
            grace: cfg.outer_grace,
        }
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Run `command` on `server_id` and return the raw response text.
    pub async fn execute(&self, server_id: &str, command: &str) -> Result<String, GatewayError> {
        let endpoint = {
            let reg = self.registry.read().await;
            reg.endpoint(server_id)?
        };
        let transport = self
            .transport
            .clone()
            .ok_or(GatewayError::ProtocolUnavailable)?;

        let inner = endpoint.timeout;
        let outer = inner.saturating_add(self.grace);
        let lane = self.pool.lane(server_id);
        let cmd = command.to_string();
        metrics::inc_commands_sent();
        let started = Instant::now();

        let call = async move {
            let permit = lane
                .acquire_owned()
                .await
                .map_err(|_| GatewayError::ConnectionFailed("worker pool closed".into()))?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                transport.execute(&endpoint, &cmd)
            });
            handle
                .await
                .map_err(|e| GatewayError::ConnectionFailed(format!("worker failed: {}", e)))
        };

        let result = match tokio::time::timeout(outer, call).await {
            Err(_) => {
                metrics::inc_commands_timed_out();
                warn!(
                    "rcon timeout on {} after {:.1}s: {}",
                    server_id,
                    outer.as_secs_f64(),
                    escape_log(command)
                );
                return Err(GatewayError::TimedOut(outer));
            }
            Ok(Err(e)) => {
                metrics::inc_commands_failed();
                return Err(e);
            }
            Ok(Ok(r)) => r,
        };

        let elapsed = started.elapsed();
        match result {
            Ok(text) => {
                metrics::observe_command_ok(elapsed);
                info!(
                    "rcon command sent to {}: {} ({:.2}s)",
                    server_id,
                    escape_log(command),
                    elapsed.as_secs_f64()
                );
                debug!("rcon response from {}: {}", server_id, escape_log(&text));
                Ok(text)
            }
            Err(TransportError::Timeout) => {
                metrics::inc_commands_timed_out();
                warn!("rcon socket timeout on {} after {:.1}s", server_id, inner.as_secs_f64());
                Err(GatewayError::TimedOut(inner))
            }
            Err(e) => {
                metrics::inc_commands_failed();
                warn!("rcon connection to {} failed: {}", server_id, e);
                Err(GatewayError::ConnectionFailed(e.to_string()))
            }
        }
    }
}
