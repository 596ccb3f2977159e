// src/rabbitmq/ack.rs

use lapin::options::{BasicAckOptions, BasicNackOptions};
use tracing::debug;

use super::amqp_client::AmqpChannel;
use super::client::AmqpClient;
use super::errors::{AmqpError, Operation, Result};
use super::message::AckTarget;

impl<C: AmqpChannel> AmqpClient<C> {
    /// Acknowledge a delivery, given either the [`Message`](super::message::Message)
    /// or a JSON object returned by [`get_json_message`](AmqpClient::get_json_message).
    ///
    /// With `multiple`, every outstanding delivery up to and including this one is
    /// acknowledged.
    pub async fn ack<'a, T>(&self, target: T, multiple: bool) -> Result<()>
    where
        T: TryInto<AckTarget<'a>, Error = AmqpError>,
    {
        let target = self.resolve(target, Operation::Ack)?;

        self.manager
            .channel()
            .basic_ack(target.delivery_tag(), BasicAckOptions { multiple })
            .await
            .map_err(|e| AmqpError::broker(Operation::Ack, target.queue(), e))?;

        debug!(queue = %target.queue(), delivery_tag = target.delivery_tag(), multiple, "Acked");
        Ok(())
    }

    /// Reject a delivery without requeueing it; the broker drops or dead-letters it.
    pub async fn nack<'a, T>(&self, target: T, multiple: bool) -> Result<()>
    where
        T: TryInto<AckTarget<'a>, Error = AmqpError>,
    {
        self.reject(target, multiple, false).await
    }

    /// Reject a delivery and put it back on its queue.
    pub async fn requeue<'a, T>(&self, target: T, multiple: bool) -> Result<()>
    where
        T: TryInto<AckTarget<'a>, Error = AmqpError>,
    {
        self.reject(target, multiple, true).await
    }

    async fn reject<'a, T>(&self, target: T, multiple: bool, requeue: bool) -> Result<()>
    where
        T: TryInto<AckTarget<'a>, Error = AmqpError>,
    {
        let target = self.resolve(target, Operation::Nack)?;

        self.manager
            .channel()
            .basic_nack(target.delivery_tag(), BasicNackOptions { multiple, requeue })
            .await
            .map_err(|e| AmqpError::broker(Operation::Nack, target.queue(), e))?;

        debug!(
            queue = %target.queue(),
            delivery_tag = target.delivery_tag(),
            multiple,
            requeue,
            "Nacked"
        );
        Ok(())
    }

    fn resolve<'a, T>(&self, target: T, operation: Operation) -> Result<AckTarget<'a>>
    where
        T: TryInto<AckTarget<'a>, Error = AmqpError>,
    {
        let target = target.try_into()?;
        self.queues.require(operation, target.queue())?;
        Ok(target)
    }
}
