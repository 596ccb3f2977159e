// src/rabbitmq/queue.rs

use std::collections::BTreeMap;

use lapin::{
    options::{QueueDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
};
use tracing::{debug, info, warn};

use super::amqp_client::AmqpChannel;
use super::errors::{AmqpError, Operation, Resource, Result};
use super::exchange::ExchangeRegistry;

/// A queue declared through this client.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    pub name: String,
    pub options: QueueDeclareOptions,
    /// Ready messages reported by the broker when the queue was declared.
    pub message_count: u32,
    /// Consumers reported by the broker when the queue was declared.
    pub consumer_count: u32,
}

/// Queues known to this client, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: BTreeMap<String, QueueHandle>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&QueueHandle> {
        self.queues.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.queues.keys().map(String::as_str).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &QueueHandle> {
        self.queues.values()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub(crate) fn require(&self, operation: Operation, name: &str) -> Result<&QueueHandle> {
        self.queues
            .get(name)
            .ok_or_else(|| AmqpError::not_found(operation, Resource::Queue, name))
    }

    /// Declare a queue. An empty name asks the broker to generate one; the queue
    /// is then registered under the generated name.
    pub async fn declare<C: AmqpChannel>(
        &mut self,
        channel: &C,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<&QueueHandle> {
        if self.queues.contains_key(name) {
            return Err(AmqpError::AlreadyDeclared {
                kind: Resource::Queue,
                name: name.to_string(),
            });
        }

        let declared = channel
            .queue_declare(name, options.clone(), arguments)
            .await
            .map_err(|e| {
                warn!(queue = %name, error = %e, "Queue declaration rejected");
                AmqpError::broker(Operation::QueueDeclare, name, e)
            })?;

        if self.queues.contains_key(&declared.name) {
            return Err(AmqpError::AlreadyDeclared {
                kind: Resource::Queue,
                name: declared.name,
            });
        }

        info!(
            queue = %declared.name,
            messages = declared.message_count,
            consumers = declared.consumer_count,
            "Queue declared"
        );
        let handle = QueueHandle {
            name: declared.name.clone(),
            options,
            message_count: declared.message_count,
            consumer_count: declared.consumer_count,
        };
        Ok(self.queues.entry(declared.name).or_insert(handle))
    }

    /// Delete a queue, returning the number of messages it still held.
    pub async fn delete<C: AmqpChannel>(
        &mut self,
        channel: &C,
        name: &str,
        options: QueueDeleteOptions,
    ) -> Result<u32> {
        self.require(Operation::QueueDelete, name)?;

        let dropped = channel
            .queue_delete(name, options)
            .await
            .map_err(|e| AmqpError::broker(Operation::QueueDelete, name, e))?;

        self.queues.remove(name);
        info!(queue = %name, dropped, "Queue deleted");
        Ok(dropped)
    }

    /// Bind a registered queue to a registered exchange.
    ///
    /// Both names are checked locally before anything is sent to the broker.
    pub async fn bind<C: AmqpChannel>(
        &self,
        channel: &C,
        exchanges: &ExchangeRegistry,
        queue: &str,
        exchange: &str,
        binding_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        self.require(Operation::QueueBind, queue)?;
        exchanges.require(Operation::QueueBind, exchange)?;

        channel
            .queue_bind(queue, exchange, binding_key, arguments)
            .await
            .map_err(|e| {
                AmqpError::broker(
                    Operation::QueueBind,
                    format!("{} -> {} ({})", queue, exchange, binding_key),
                    e,
                )
            })?;

        debug!(queue = %queue, exchange = %exchange, binding_key = %binding_key, "Queue bound");
        Ok(())
    }

    /// Drop all ready messages, returning how many were removed.
    pub async fn purge<C: AmqpChannel>(&self, channel: &C, name: &str) -> Result<u32> {
        self.require(Operation::QueuePurge, name)?;

        let purged = channel
            .queue_purge(name)
            .await
            .map_err(|e| AmqpError::broker(Operation::QueuePurge, name, e))?;

        info!(queue = %name, purged, "Queue purged");
        Ok(purged)
    }
}
