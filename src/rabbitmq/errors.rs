// src/rabbitmq/errors.rs

use std::error::Error as StdError;
use std::fmt;

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use thiserror::Error;

use super::message::MessageMetadata;

/// A failure reported by the underlying AMQP driver, flattened to its diagnostic text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(String);

impl DriverError {
    pub fn new(reason: impl Into<String>) -> Self {
        DriverError(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl From<LapinError> for DriverError {
    fn from(error: LapinError) -> Self {
        DriverError(error.to_string())
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// The broker-side resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Exchange,
    Queue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Exchange => f.write_str("exchange"),
            Resource::Queue => f.write_str("queue"),
        }
    }
}

/// AMQP method that was being performed when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ExchangeDeclare,
    ExchangeDelete,
    QueueDeclare,
    QueueDelete,
    QueueBind,
    QueuePurge,
    Publish,
    Get,
    Consume,
    Cancel,
    Ack,
    Nack,
    Qos,
    Close,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ExchangeDeclare => "exchange.declare",
            Operation::ExchangeDelete => "exchange.delete",
            Operation::QueueDeclare => "queue.declare",
            Operation::QueueDelete => "queue.delete",
            Operation::QueueBind => "queue.bind",
            Operation::QueuePurge => "queue.purge",
            Operation::Publish => "basic.publish",
            Operation::Get => "basic.get",
            Operation::Consume => "basic.consume",
            Operation::Cancel => "basic.cancel",
            Operation::Ack => "basic.ack",
            Operation::Nack => "basic.nack",
            Operation::Qos => "basic.qos",
            Operation::Close => "channel.close",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of client construction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connect,
    OpenChannel,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Connect => f.write_str("connect to"),
            ConnectStage::OpenChannel => f.write_str("open channel on"),
        }
    }
}

/// Coarse classification of an [`AmqpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Conflict,
    NotFound,
    Broker,
    Decode,
    Usage,
    Handler,
}

#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("invalid broker URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("failed to set QoS (prefetch_count={prefetch_count}, prefetch_size={prefetch_size}): {reason}")]
    Qos {
        prefetch_count: u16,
        prefetch_size: u32,
        reason: String,
    },

    #[error("{stage} `{uri}` amqp broker failed: {reason}")]
    Connection {
        uri: String,
        stage: ConnectStage,
        reason: String,
    },

    #[error("declare `{name}` {kind} failed: it is declared already")]
    AlreadyDeclared { kind: Resource, name: String },

    #[error("{operation} failed: `{name}` {kind} does not exist")]
    NotFound {
        operation: Operation,
        kind: Resource,
        name: String,
    },

    #[error("{operation} on `{target}` failed: {reason}")]
    Broker {
        operation: Operation,
        target: String,
        reason: String,
    },

    #[error("failed to encode message body: {0}")]
    Encode(#[from] SerdeError),

    #[error(
        "failed to decode message {} from `{}` queue: {reason} (body: {body})",
        .metadata.delivery_tag,
        .metadata.queue
    )]
    Decode {
        metadata: MessageMetadata,
        body: String,
        reason: String,
    },

    #[error("{0}")]
    Usage(String),

    #[error("consumer handler for `{queue}` queue failed: {source}")]
    Handler {
        queue: String,
        source: Box<dyn StdError + Send + Sync>,
    },
}

// Custom Result type for client operations
pub type Result<T> = std::result::Result<T, AmqpError>;

impl AmqpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::InvalidUri { .. } | AmqpError::Qos { .. } => ErrorKind::Configuration,
            AmqpError::Connection { .. } => ErrorKind::Connection,
            AmqpError::AlreadyDeclared { .. } => ErrorKind::Conflict,
            AmqpError::NotFound { .. } => ErrorKind::NotFound,
            AmqpError::Broker { .. } => ErrorKind::Broker,
            AmqpError::Decode { .. } => ErrorKind::Decode,
            AmqpError::Encode(_) | AmqpError::Usage(_) => ErrorKind::Usage,
            AmqpError::Handler { .. } => ErrorKind::Handler,
        }
    }

    pub(crate) fn not_found(operation: Operation, kind: Resource, name: &str) -> Self {
        AmqpError::NotFound {
            operation,
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn broker(operation: Operation, target: impl Into<String>, error: DriverError) -> Self {
        AmqpError::Broker {
            operation,
            target: target.into(),
            reason: error.0,
        }
    }

    pub(crate) fn usage(reason: impl Into<String>) -> Self {
        AmqpError::Usage(reason.into())
    }
}
