// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
        BasicNackOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
        QueuePurgeOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ExchangeKind,
};

use super::errors::{DriverError, DriverResult};
use super::message::Envelope;

/// Deliveries pushed by the broker for one consumer.
pub type DeliveryStream = BoxStream<'static, DriverResult<Envelope>>;

/// Broker-side view of a queue right after it was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// The AMQP methods the client issues, all on a single channel.
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn basic_qos(&self, prefetch_count: u16, options: BasicQosOptions) -> DriverResult<()>;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> DriverResult<()>;

    async fn exchange_delete(&self, exchange: &str, options: ExchangeDeleteOptions) -> DriverResult<()>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> DriverResult<QueueInfo>;

    async fn queue_delete(&self, queue: &str, options: QueueDeleteOptions) -> DriverResult<u32>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> DriverResult<()>;

    async fn queue_purge(&self, queue: &str) -> DriverResult<u32>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> DriverResult<()>;

    /// Poll a single delivery, `None` when the queue is empty.
    async fn basic_get(&self, queue: &str, options: BasicGetOptions) -> DriverResult<Option<Envelope>>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> DriverResult<DeliveryStream>;

    async fn basic_cancel(&self, consumer_tag: &str) -> DriverResult<()>;

    async fn basic_ack(&self, delivery_tag: u64, options: BasicAckOptions) -> DriverResult<()>;

    async fn basic_nack(&self, delivery_tag: u64, options: BasicNackOptions) -> DriverResult<()>;

    async fn close(&self, reply_code: u16, reply_text: &str) -> DriverResult<()>;
}

/// [`AmqpChannel`] backed by a lapin channel.
#[derive(Clone)]
pub struct LapinChannel {
    channel: Channel,
}

impl LapinChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn inner(&self) -> &Channel {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn basic_qos(&self, prefetch_count: u16, options: BasicQosOptions) -> DriverResult<()> {
        Ok(self.channel.basic_qos(prefetch_count, options).await?)
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> DriverResult<()> {
        Ok(self
            .channel
            .exchange_declare(exchange, kind, options, arguments)
            .await?)
    }

    async fn exchange_delete(&self, exchange: &str, options: ExchangeDeleteOptions) -> DriverResult<()> {
        Ok(self.channel.exchange_delete(exchange, options).await?)
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> DriverResult<QueueInfo> {
        let declared = self.channel.queue_declare(queue, options, arguments).await?;
        Ok(QueueInfo {
            name: declared.name().as_str().to_string(),
            message_count: declared.message_count(),
            consumer_count: declared.consumer_count(),
        })
    }

    async fn queue_delete(&self, queue: &str, options: QueueDeleteOptions) -> DriverResult<u32> {
        Ok(self.channel.queue_delete(queue, options).await?)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> DriverResult<()> {
        Ok(self
            .channel
            .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), arguments)
            .await?)
    }

    async fn queue_purge(&self, queue: &str) -> DriverResult<u32> {
        Ok(self
            .channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await?)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> DriverResult<()> {
        // The returned confirm is only meaningful with publisher confirms enabled.
        self.channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?;
        Ok(())
    }

    async fn basic_get(&self, queue: &str, options: BasicGetOptions) -> DriverResult<Option<Envelope>> {
        let message = self.channel.basic_get(queue, options).await?;
        Ok(message.map(|m| Envelope::from(m.delivery)))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> DriverResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await?;

        Ok(consumer
            .map(|delivery| delivery.map(Envelope::from).map_err(DriverError::from))
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> DriverResult<()> {
        Ok(self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?)
    }

    async fn basic_ack(&self, delivery_tag: u64, options: BasicAckOptions) -> DriverResult<()> {
        Ok(self.channel.basic_ack(delivery_tag, options).await?)
    }

    async fn basic_nack(&self, delivery_tag: u64, options: BasicNackOptions) -> DriverResult<()> {
        Ok(self.channel.basic_nack(delivery_tag, options).await?)
    }

    async fn close(&self, reply_code: u16, reply_text: &str) -> DriverResult<()> {
        Ok(self.channel.close(reply_code, reply_text).await?)
    }
}
