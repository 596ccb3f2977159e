// src/rabbitmq/mod.rs
// AMQP client: connection, topology registries, publishing, consuming and acknowledgement

pub mod errors;
pub mod amqp_client;
pub mod connection;
pub mod uri;
pub mod message;
pub mod exchange;
pub mod queue;
pub mod client;

mod ack;
mod consumer;
mod publisher;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{AmqpChannel, DeliveryStream, LapinChannel, QueueInfo};
pub use client::AmqpClient;
pub use connection::ConnectionManager;
pub use consumer::{ConsumerFlow, Subscription};
pub use errors::{AmqpError, DriverError, DriverResult, ErrorKind, Operation, Resource, Result};
pub use exchange::{ExchangeHandle, ExchangeRegistry, DEFAULT_EXCHANGE};
pub use message::{AckTarget, Envelope, Message, MessageMetadata, MESSAGE_METADATA};
pub use publisher::JSON_CONTENT_TYPE;
pub use queue::{QueueHandle, QueueRegistry};
pub use uri::ConnectionConfig;
