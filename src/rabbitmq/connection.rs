// src/rabbitmq/connection.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use lapin::{options::BasicQosOptions, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use super::amqp_client::{AmqpChannel, LapinChannel};
use super::errors::{AmqpError, ConnectStage, Operation, Result};
use super::uri::ConnectionConfig;

const REPLY_SUCCESS: u16 = 200;

type ConnectionPool = Mutex<HashMap<String, Arc<Connection>>>;

fn connection_pool() -> &'static ConnectionPool {
    static POOL: OnceLock<ConnectionPool> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Owns the physical connection and the one channel opened on it.
pub struct ConnectionManager<C = LapinChannel> {
    uri: String,
    config: ConnectionConfig,
    connection: Option<Arc<Connection>>,
    channel: C,
}

impl ConnectionManager<LapinChannel> {
    /// Open the connection (reusing a pooled one if `persistent` is set) and its channel,
    /// then apply the configured prefetch.
    pub async fn connect(uri: &str, config: ConnectionConfig) -> Result<Self> {
        let redacted = super::uri::redact(uri);
        let connection_error = |stage: ConnectStage, reason: String| AmqpError::Connection {
            uri: redacted.clone(),
            stage,
            reason,
        };

        info!(uri = %redacted, persistent = config.persistent, "Connecting to AMQP broker");
        let opened = if config.persistent {
            Self::pooled_connection(&config).await
        } else {
            Self::open_connection(&config).await.map(Arc::new)
        };
        let connection =
            opened.map_err(|e| connection_error(ConnectStage::Connect, e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| connection_error(ConnectStage::OpenChannel, e.to_string()))?;
        debug!(channel_id = channel.id(), "Channel opened");

        let manager = ConnectionManager {
            uri: redacted,
            config,
            connection: Some(connection),
            channel: LapinChannel::new(channel),
        };
        manager.finish_setup().await
    }

    async fn open_connection(config: &ConnectionConfig) -> lapin::Result<Connection> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &config.connection_name {
            properties = properties.with_connection_name(name.clone().into());
        }
        Connection::connect_uri(config.to_amqp_uri(), properties).await
    }

    async fn pooled_connection(config: &ConnectionConfig) -> lapin::Result<Arc<Connection>> {
        let key = config.pool_key();

        let existing = connection_pool()
            .lock()
            .ok()
            .and_then(|pool| pool.get(&key).cloned())
            .filter(|conn| conn.status().connected());
        if let Some(connection) = existing {
            debug!("Reusing pooled connection");
            return Ok(connection);
        }

        let connection = Arc::new(Self::open_connection(config).await?);
        if let Ok(mut pool) = connection_pool().lock() {
            pool.insert(key, connection.clone());
        }
        Ok(connection)
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |conn| conn.status().connected())
            && self.channel.is_connected()
    }
}

impl<C: AmqpChannel> ConnectionManager<C> {
    /// Wrap an already opened channel; no physical connection is owned.
    pub async fn with_channel(uri: &str, config: ConnectionConfig, channel: C) -> Result<Self> {
        let manager = ConnectionManager {
            uri: super::uri::redact(uri),
            config,
            connection: None,
            channel,
        };
        manager.finish_setup().await
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connection string with the password redacted.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Limit the unacknowledged deliveries the channel may hold.
    ///
    /// The broker only supports a `prefetch_size` of 0 (no byte limit); any other
    /// value is refused before reaching the broker.
    pub async fn set_qos(&self, prefetch_count: u16, prefetch_size: u32) -> Result<()> {
        let qos_error = |reason: String| AmqpError::Qos {
            prefetch_count,
            prefetch_size,
            reason,
        };

        if prefetch_size != 0 {
            return Err(qos_error("prefetch_size limits are not supported".to_string()));
        }

        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| qos_error(e.to_string()))?;

        debug!(prefetch_count, "Channel QoS applied");
        Ok(())
    }

    /// Apply the configured prefetch; on failure the channel and any owned
    /// connection are released before the error is returned.
    async fn finish_setup(self) -> Result<Self> {
        let applied = match self.config.prefetch_count {
            Some(prefetch_count) => self.set_qos(prefetch_count, 0).await,
            None => Ok(()),
        };

        match applied {
            Ok(()) => Ok(self),
            Err(e) => {
                self.abandon().await;
                Err(e)
            }
        }
    }

    /// Best-effort teardown after construction failed part way.
    async fn abandon(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "client setup failed").await {
            warn!(error = %e, "Failed to close channel after setup failure");
        }

        if let Some(connection) = self.connection {
            if !self.config.persistent {
                if let Err(e) = connection.close(REPLY_SUCCESS, "client setup failed").await {
                    warn!(error = %e, "Failed to close connection after setup failure");
                }
            }
        }
    }

    /// Close the channel, then the connection unless it belongs to the persistent pool.
    pub async fn close(self) -> Result<()> {
        info!(uri = %self.uri, "Closing AMQP channel");
        self.channel
            .close(REPLY_SUCCESS, "client closing")
            .await
            .map_err(|e| AmqpError::broker(Operation::Close, self.uri.as_str(), e))?;

        if let Some(connection) = self.connection {
            if self.config.persistent {
                debug!("Leaving pooled connection open");
            } else if let Err(e) = connection.close(REPLY_SUCCESS, "client closing").await {
                warn!(error = %e, "Failed to close connection");
                return Err(AmqpError::Connection {
                    uri: self.uri,
                    stage: ConnectStage::Connect,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}
