//! Redis list-backed [`EventQueue`].
//!
//! Producers `RPUSH` serialized events onto one list key; the single consumer
//! `BLPOP`s from the head. The consumer holds a dedicated connection so that a
//! blocked `BLPOP` never delays pushes issued from the same process.

use std::time::Duration;

use async_trait::async_trait;
use fred::interfaces::ListInterface;
use fred::prelude::{Client, ClientLike, EventInterface, Pool, ReconnectPolicy, Server, ServerConfig, TcpConfig};
use fred::types::config::UnresponsiveConfig;
use fred::types::Builder;
use pipeline::{ChangeEvent, EventQueue, QueueError};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

/// Connection settings for [`RedisQueue`].
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// ACL user name.
    pub username: Option<String>,
    /// ACL password.
    pub password: Option<String>,
    /// List key holding the queue.
    pub key: String,
    /// Connections used for pushes.
    pub pool_size: usize,
    /// Upper bound on any single command, including a blocking pop.
    pub command_timeout: Duration,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            username: None,
            password: None,
            key: "pr_queue".to_string(),
            pool_size: 4,
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// FIFO queue stored in a Redis list.
#[derive(Clone)]
pub struct RedisQueue {
    producer: Pool,
    consumer: Client,
    key: String,
}

impl RedisQueue {
    /// Connects the producer pool and the consumer connection.
    ///
    /// Fails if the broker cannot be reached; later outages are reported per
    /// command as [`QueueError::Unavailable`] while the client reconnects.
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, QueueError> {
        let mut builder = Builder::default_centralized();
        let command_timeout = config.command_timeout;
        builder
            .with_config(|redis_config| {
                redis_config.username = config.username.clone();
                redis_config.password = config.password.clone();
                redis_config.server = ServerConfig::Centralized {
                    server: Server::new(config.host.clone(), config.port),
                };
            })
            .with_connection_config(|connection| {
                connection.internal_command_timeout = Duration::from_secs(5);
                connection.reconnect_on_auth_error = true;
                connection.tcp = TcpConfig {
                    #[cfg(target_os = "linux")]
                    user_timeout: Some(Duration::from_secs(5)),
                    ..Default::default()
                };
                connection.unresponsive = UnresponsiveConfig {
                    max_timeout: Some(command_timeout + Duration::from_secs(5)),
                    interval: Duration::from_secs(3),
                };
            })
            .with_performance_config(|performance| {
                performance.default_command_timeout = command_timeout;
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 5_000, 2));

        let producer = builder
            .build_pool(config.pool_size.max(1))
            .map_err(QueueError::unavailable)?;
        let consumer = builder.build().map_err(QueueError::unavailable)?;

        for client in producer.clients() {
            spawn_error_logger(client);
        }
        spawn_error_logger(&consumer);

        let _pool_handles = producer.connect_pool();
        let _consumer_handle = consumer.connect();
        producer
            .wait_for_connect()
            .await
            .map_err(QueueError::unavailable)?;
        consumer
            .wait_for_connect()
            .await
            .map_err(QueueError::unavailable)?;
        debug!(host = %config.host, port = config.port, key = %config.key, "Connected to Redis");

        Ok(Self {
            producer,
            consumer,
            key: config.key,
        })
    }
}

fn spawn_error_logger(client: &Client) {
    let mut error_rx = client.error_rx();
    tokio::spawn(async move {
        loop {
            match error_rx.recv().await {
                Ok((error, Some(server))) => {
                    error!("Redis client ({server:?}) error: {error:?}");
                }
                Ok((error, None)) => {
                    error!("Redis client error: {error:?}");
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[async_trait]
impl EventQueue for RedisQueue {
    async fn push(&self, event: &ChangeEvent) -> Result<(), QueueError> {
        let payload = event.to_wire()?;
        let length: i64 = self
            .producer
            .next_connected()
            .rpush(self.key.as_str(), payload)
            .await
            .map_err(QueueError::unavailable)?;
        debug!(source_id = %event.source_id(), length, "Pushed change event");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ChangeEvent>, QueueError> {
        // A zero BLPOP timeout blocks forever.
        let seconds = timeout.as_secs_f64().max(0.001);
        let popped: Option<(String, String)> = self
            .consumer
            .blpop(self.key.as_str(), seconds)
            .await
            .map_err(QueueError::unavailable)?;

        match popped {
            Some((_key, payload)) => ChangeEvent::from_wire(&payload).map(Some),
            None => Ok(None),
        }
    }
}
