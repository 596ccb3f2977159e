// src/rabbitmq/client.rs

use lapin::{
    options::{ExchangeDeclareOptions, ExchangeDeleteOptions, QueueDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
    ExchangeKind,
};

use super::amqp_client::{AmqpChannel, LapinChannel};
use super::connection::ConnectionManager;
use super::errors::Result;
use super::exchange::{ExchangeHandle, ExchangeRegistry};
use super::queue::{QueueHandle, QueueRegistry};
use super::uri::ConnectionConfig;

/// A broker client: one connection, one channel, and the exchanges and queues
/// declared through it.
///
/// The channel is not safe for interleaved use; share a client between tasks only
/// behind a lock, or give each task its own client.
pub struct AmqpClient<C = LapinChannel> {
    pub(crate) manager: ConnectionManager<C>,
    pub(crate) exchanges: ExchangeRegistry,
    pub(crate) queues: QueueRegistry,
}

impl AmqpClient<LapinChannel> {
    /// Parse `uri`, connect, open the channel and apply `prefetch_count` if given.
    pub async fn connect(uri: &str) -> Result<Self> {
        let config = ConnectionConfig::parse(uri)?;
        let manager = ConnectionManager::connect(uri, config).await?;
        Ok(Self::from_manager(manager))
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }
}

impl<C: AmqpChannel> AmqpClient<C> {
    /// Build a client over an already opened channel.
    pub async fn with_channel(uri: &str, channel: C) -> Result<Self> {
        let config = ConnectionConfig::parse(uri)?;
        let manager = ConnectionManager::with_channel(uri, config, channel).await?;
        Ok(Self::from_manager(manager))
    }

    fn from_manager(manager: ConnectionManager<C>) -> Self {
        Self {
            manager,
            exchanges: ExchangeRegistry::new(),
            queues: QueueRegistry::new(),
        }
    }

    pub fn channel(&self) -> &C {
        self.manager.channel()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.manager.config()
    }

    pub async fn set_qos(&self, prefetch_count: u16, prefetch_size: u32) -> Result<()> {
        self.manager.set_qos(prefetch_count, prefetch_size).await
    }

    pub async fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<&ExchangeHandle> {
        self.declare_exchange_with_arguments(name, kind, options, FieldTable::default())
            .await
    }

    pub async fn declare_exchange_with_arguments(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<&ExchangeHandle> {
        self.exchanges
            .declare(self.manager.channel(), name, kind, options, arguments)
            .await
    }

    pub async fn delete_exchange(&mut self, name: &str, options: ExchangeDeleteOptions) -> Result<()> {
        self.exchanges.delete(self.manager.channel(), name, options).await
    }

    pub fn exchanges(&self) -> &ExchangeRegistry {
        &self.exchanges
    }

    pub fn exchange_names(&self) -> Vec<&str> {
        self.exchanges.names()
    }

    pub async fn declare_queue(&mut self, name: &str, options: QueueDeclareOptions) -> Result<&QueueHandle> {
        self.declare_queue_with_arguments(name, options, FieldTable::default())
            .await
    }

    pub async fn declare_queue_with_arguments(
        &mut self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<&QueueHandle> {
        self.queues
            .declare(self.manager.channel(), name, options, arguments)
            .await
    }

    pub async fn delete_queue(&mut self, name: &str, options: QueueDeleteOptions) -> Result<u32> {
        self.queues.delete(self.manager.channel(), name, options).await
    }

    pub async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> Result<()> {
        self.bind_queue_with_arguments(queue, exchange, binding_key, FieldTable::default())
            .await
    }

    pub async fn bind_queue_with_arguments(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        self.queues
            .bind(
                self.manager.channel(),
                &self.exchanges,
                queue,
                exchange,
                binding_key,
                arguments,
            )
            .await
    }

    pub async fn purge_queue(&self, name: &str) -> Result<u32> {
        self.queues.purge(self.manager.channel(), name).await
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.names()
    }

    /// Close the channel and, unless it is pooled, the connection.
    pub async fn close(self) -> Result<()> {
        self.manager.close().await
    }
}
