// src/rabbitmq/consumer.rs

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use lapin::options::{BasicConsumeOptions, BasicGetOptions};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::amqp_client::{AmqpChannel, DeliveryStream};
use super::client::AmqpClient;
use super::errors::{AmqpError, Operation, Result};
use super::message::Message;

/// What a push-mode handler wants to happen after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerFlow {
    Continue,
    Stop,
}

impl<C: AmqpChannel> AmqpClient<C> {
    /// Poll one message from a registered queue; `Ok(None)` when it is empty.
    ///
    /// With `auto_ack` the broker settles the delivery immediately and it must not
    /// be acknowledged again.
    pub async fn get_message(&self, queue: &str, auto_ack: bool) -> Result<Option<Message>> {
        self.queues.require(Operation::Get, queue)?;

        let envelope = self
            .manager
            .channel()
            .basic_get(queue, BasicGetOptions { no_ack: auto_ack })
            .await
            .map_err(|e| AmqpError::broker(Operation::Get, queue, e))?;

        Ok(envelope.map(|envelope| {
            debug!(queue = %queue, delivery_tag = envelope.delivery_tag, "Retrieved message");
            Message::new(queue, envelope)
        }))
    }

    /// Poll one message and decode it as a JSON object carrying its delivery metadata
    /// under [`MESSAGE_METADATA`](super::message::MESSAGE_METADATA).
    pub async fn get_json_message(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Option<Map<String, Value>>> {
        match self.get_message(queue, auto_ack).await? {
            Some(message) => message.into_json_object().map(Some).map_err(|e| {
                warn!(queue = %queue, error = %e, "Failed to decode JSON message");
                e
            }),
            None => Ok(None),
        }
    }

    /// Start a push-mode subscription on a registered queue.
    pub async fn subscribe(&self, queue: &str, options: BasicConsumeOptions) -> Result<Subscription<'_, C>> {
        self.queues.require(Operation::Consume, queue)?;

        let consumer_tag = format!("consumer-{}", Uuid::new_v4());
        let deliveries = self
            .manager
            .channel()
            .basic_consume(queue, &consumer_tag, options)
            .await
            .map_err(|e| AmqpError::broker(Operation::Consume, queue, e))?;

        info!(queue = %queue, consumer_tag = %consumer_tag, "Started consuming");
        Ok(Subscription {
            channel: self.manager.channel(),
            queue: queue.to_string(),
            consumer_tag,
            deliveries,
        })
    }

    /// Hand every delivery on `queue` to `handler`, in delivery order, until the
    /// handler returns [`ConsumerFlow::Stop`], the handler fails, or the broker
    /// ends the subscription.
    ///
    /// Acknowledgement is explicit: the handler settles messages with
    /// [`ack`](AmqpClient::ack) / [`nack`](AmqpClient::nack) unless `no_ack` was set.
    pub async fn consume<F, Fut, E>(
        &self,
        queue: &str,
        mut handler: F,
        options: BasicConsumeOptions,
    ) -> Result<()>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = std::result::Result<ConsumerFlow, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let mut subscription = self.subscribe(queue, options).await?;

        while let Some(delivery) = subscription.next().await {
            let message = match delivery {
                Ok(message) => message,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Subscription interrupted");
                    return Err(e);
                }
            };

            match handler(message).await {
                Ok(ConsumerFlow::Continue) => {}
                Ok(ConsumerFlow::Stop) => {
                    debug!(queue = %queue, "Handler requested stop");
                    return subscription.cancel().await;
                }
                Err(e) => {
                    let source: Box<dyn StdError + Send + Sync> = e.into();
                    error!(queue = %queue, error = %source, "Handler failed, cancelling subscription");
                    if let Err(cancel_error) = subscription.cancel().await {
                        warn!(queue = %queue, error = %cancel_error, "Failed to cancel subscription");
                    }
                    return Err(AmqpError::Handler {
                        queue: queue.to_string(),
                        source,
                    });
                }
            }
        }

        info!(queue = %queue, "Subscription ended by broker");
        Ok(())
    }
}

/// A live consumer on one queue; yields each delivery as a [`Message`].
pub struct Subscription<'a, C> {
    channel: &'a C,
    queue: String,
    consumer_tag: String,
    deliveries: DeliveryStream,
}

impl<C: AmqpChannel> Subscription<'_, C> {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Ask the broker to stop delivering to this consumer.
    pub async fn cancel(self) -> Result<()> {
        self.channel
            .basic_cancel(&self.consumer_tag)
            .await
            .map_err(|e| AmqpError::broker(Operation::Cancel, self.consumer_tag.as_str(), e))?;

        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Subscription cancelled");
        Ok(())
    }
}

impl<C> Stream for Subscription<'_, C> {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.deliveries.poll_next_unpin(cx).map(|delivery| {
            delivery.map(|result| {
                result
                    .map(|envelope| Message::new(this.queue.as_str(), envelope))
                    .map_err(|e| AmqpError::broker(Operation::Consume, this.queue.as_str(), e))
            })
        })
    }
}
