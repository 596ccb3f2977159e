// src/rabbitmq/exchange.rs

use std::collections::BTreeMap;

use lapin::{
    options::{ExchangeDeclareOptions, ExchangeDeleteOptions},
    types::FieldTable,
    ExchangeKind,
};
use tracing::{info, warn};

use super::amqp_client::AmqpChannel;
use super::errors::{AmqpError, Operation, Resource, Result};

/// Name of the broker's default exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// An exchange declared through this client.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    pub name: String,
    pub kind: ExchangeKind,
    pub options: ExchangeDeclareOptions,
}

impl ExchangeHandle {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_EXCHANGE
    }
}

/// Exchanges known to this client, keyed by name.
///
/// Membership is what publishing and binding check against; an exchange that
/// exists on the broker but was not declared here is unknown to the client.
#[derive(Debug, Clone)]
pub struct ExchangeRegistry {
    exchanges: BTreeMap<String, ExchangeHandle>,
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeRegistry {
    /// A registry holding only the default exchange.
    pub fn new() -> Self {
        let mut exchanges = BTreeMap::new();
        exchanges.insert(
            DEFAULT_EXCHANGE.to_string(),
            ExchangeHandle {
                name: DEFAULT_EXCHANGE.to_string(),
                kind: ExchangeKind::Direct,
                options: ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
            },
        );
        Self { exchanges }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ExchangeHandle> {
        self.exchanges.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.exchanges.keys().map(String::as_str).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ExchangeHandle> {
        self.exchanges.values()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub(crate) fn require(&self, operation: Operation, name: &str) -> Result<&ExchangeHandle> {
        self.exchanges
            .get(name)
            .ok_or_else(|| AmqpError::not_found(operation, Resource::Exchange, name))
    }

    pub async fn declare<C: AmqpChannel>(
        &mut self,
        channel: &C,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<&ExchangeHandle> {
        if self.exchanges.contains_key(name) {
            return Err(AmqpError::AlreadyDeclared {
                kind: Resource::Exchange,
                name: name.to_string(),
            });
        }

        channel
            .exchange_declare(name, kind.clone(), options.clone(), arguments)
            .await
            .map_err(|e| {
                warn!(exchange = %name, error = %e, "Exchange declaration rejected");
                AmqpError::broker(Operation::ExchangeDeclare, name, e)
            })?;

        info!(exchange = %name, kind = ?kind, "Exchange declared");
        let handle = ExchangeHandle {
            name: name.to_string(),
            kind,
            options,
        };
        Ok(self.exchanges.entry(name.to_string()).or_insert(handle))
    }

    pub async fn delete<C: AmqpChannel>(
        &mut self,
        channel: &C,
        name: &str,
        options: ExchangeDeleteOptions,
    ) -> Result<()> {
        self.require(Operation::ExchangeDelete, name)?;
        if name == DEFAULT_EXCHANGE {
            return Err(AmqpError::usage("the default exchange cannot be deleted"));
        }

        channel
            .exchange_delete(name, options)
            .await
            .map_err(|e| AmqpError::broker(Operation::ExchangeDelete, name, e))?;

        self.exchanges.remove(name);
        info!(exchange = %name, "Exchange deleted");
        Ok(())
    }
}
