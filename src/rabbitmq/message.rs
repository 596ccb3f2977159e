// src/rabbitmq/message.rs

use lapin::{message::Delivery, BasicProperties};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{AmqpError, Result};

/// Reserved key under which delivery metadata is embedded into decoded JSON payloads.
pub const MESSAGE_METADATA: &str = "_metadata_";

/// A delivery as handed over by the driver, independent of the queue it came from.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
}

impl From<Delivery> for Envelope {
    fn from(delivery: Delivery) -> Self {
        Envelope {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            body: delivery.data,
        }
    }
}

/// A message retrieved from a registered queue.
#[derive(Debug, Clone)]
pub struct Message {
    queue: String,
    envelope: Envelope,
}

impl Message {
    pub fn new(queue: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            queue: queue.into(),
            envelope,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn delivery_tag(&self) -> u64 {
        self.envelope.delivery_tag
    }

    pub fn is_redelivery(&self) -> bool {
        self.envelope.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.envelope.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.envelope.routing_key
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.envelope.properties
    }

    pub fn content_type(&self) -> Option<&str> {
        self.envelope
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.envelope.body
    }

    /// Decode the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.envelope.body).map_err(|e| self.decode_error(e.to_string()))
    }

    pub fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            queue: self.queue.clone(),
            delivery_tag: self.envelope.delivery_tag,
            is_redelivery: self.envelope.redelivered,
        }
    }

    /// Decode the body into a JSON object and embed the delivery metadata under
    /// [`MESSAGE_METADATA`], so the object alone can later be acknowledged.
    pub fn into_json_object(self) -> Result<Map<String, Value>> {
        let value: Value = serde_json::from_slice(&self.envelope.body)
            .map_err(|e| self.decode_error(e.to_string()))?;

        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(self.decode_error(format!(
                    "expected a JSON object, found {}",
                    json_type(&other)
                )))
            }
        };

        if object.contains_key(MESSAGE_METADATA) {
            return Err(self.decode_error(format!(
                "payload already contains the reserved `{}` key",
                MESSAGE_METADATA
            )));
        }

        object.insert(MESSAGE_METADATA.to_string(), self.metadata().to_value());
        Ok(object)
    }

    fn decode_error(&self, reason: String) -> AmqpError {
        AmqpError::Decode {
            metadata: self.metadata(),
            body: String::from_utf8_lossy(&self.envelope.body).into_owned(),
            reason,
        }
    }
}

/// Delivery identity that survives a JSON round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub queue: String,
    pub delivery_tag: u64,
    pub is_redelivery: bool,
}

impl MessageMetadata {
    /// Read the sidecar embedded in a decoded payload.
    pub fn from_object(object: &Map<String, Value>) -> Result<Self> {
        let sidecar = object.get(MESSAGE_METADATA).ok_or_else(|| {
            AmqpError::usage(format!(
                "message does not contain `{}` metadata; it was not retrieved with get_json_message",
                MESSAGE_METADATA
            ))
        })?;

        serde_json::from_value(sidecar.clone()).map_err(|e| {
            AmqpError::usage(format!("`{}` metadata is malformed: {}", MESSAGE_METADATA, e))
        })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(object) => Self::from_object(object),
            other => Err(AmqpError::usage(format!(
                "message does not contain `{}` metadata: payload is {}",
                MESSAGE_METADATA,
                json_type(other)
            ))),
        }
    }

    /// Remove the sidecar from a decoded payload, leaving the original payload behind.
    pub fn detach(object: &mut Map<String, Value>) -> Result<Self> {
        let metadata = Self::from_object(object)?;
        object.shift_remove(MESSAGE_METADATA);
        Ok(metadata)
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "queue": self.queue,
            "delivery_tag": self.delivery_tag,
            "is_redelivery": self.is_redelivery,
        })
    }
}

/// What an acknowledgement refers to: a live message, or the detached identity
/// recovered from a decoded JSON payload.
#[derive(Debug, Clone)]
pub enum AckTarget<'a> {
    Live(&'a Message),
    Detached(MessageMetadata),
}

impl AckTarget<'_> {
    pub fn queue(&self) -> &str {
        match self {
            AckTarget::Live(message) => message.queue(),
            AckTarget::Detached(metadata) => &metadata.queue,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        match self {
            AckTarget::Live(message) => message.delivery_tag(),
            AckTarget::Detached(metadata) => metadata.delivery_tag,
        }
    }
}

impl<'a> TryFrom<&'a Message> for AckTarget<'a> {
    type Error = AmqpError;

    fn try_from(message: &'a Message) -> Result<Self> {
        Ok(AckTarget::Live(message))
    }
}

impl<'a> TryFrom<&'a Map<String, Value>> for AckTarget<'a> {
    type Error = AmqpError;

    fn try_from(object: &'a Map<String, Value>) -> Result<Self> {
        MessageMetadata::from_object(object).map(AckTarget::Detached)
    }
}

impl<'a> TryFrom<&'a Value> for AckTarget<'a> {
    type Error = AmqpError;

    fn try_from(value: &'a Value) -> Result<Self> {
        MessageMetadata::from_json(value).map(AckTarget::Detached)
    }
}

impl<'a> TryFrom<MessageMetadata> for AckTarget<'a> {
    type Error = AmqpError;

    fn try_from(metadata: MessageMetadata) -> Result<Self> {
        Ok(AckTarget::Detached(metadata))
    }
}

impl<'a> TryFrom<&'a MessageMetadata> for AckTarget<'a> {
    type Error = AmqpError;

    fn try_from(metadata: &'a MessageMetadata) -> Result<Self> {
        Ok(AckTarget::Detached(metadata.clone()))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
