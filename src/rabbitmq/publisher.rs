// src/rabbitmq/publisher.rs

use lapin::{options::BasicPublishOptions, BasicProperties};
use serde::Serialize;
use tracing::{debug, error};

use super::amqp_client::AmqpChannel;
use super::client::AmqpClient;
use super::errors::{AmqpError, Operation, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";

impl<C: AmqpChannel> AmqpClient<C> {
    /// Publish raw bytes through a registered exchange.
    ///
    /// Returns once the frames are handed to the broker; routing is not confirmed.
    pub async fn publish(
        &self,
        body: &[u8],
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        properties: BasicProperties,
    ) -> Result<()> {
        self.exchanges.require(Operation::Publish, exchange)?;

        self.manager
            .channel()
            .basic_publish(exchange, routing_key, options, body, properties)
            .await
            .map_err(|e| {
                error!(exchange = %exchange, routing_key = %routing_key, error = %e, "Publish failed");
                AmqpError::broker(
                    Operation::Publish,
                    format!("{} with routing key `{}`", exchange, routing_key),
                    e,
                )
            })?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            bytes = body.len(),
            "Published message"
        );
        Ok(())
    }

    /// Encode `message` as JSON and publish it with an `application/json` content type.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        message: &T,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        properties: BasicProperties,
    ) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let properties = properties.with_content_type(JSON_CONTENT_TYPE.into());
        self.publish(&payload, exchange, routing_key, options, properties)
            .await
    }
}
