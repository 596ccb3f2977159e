// In-memory broker standing in for a lapin channel
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
        QueueDeclareOptions, QueueDeleteOptions,
    },
    types::FieldTable,
    BasicProperties, ExchangeKind,
};
use rust_amqp::rabbitmq::{
    AmqpChannel, AmqpClient, DeliveryStream, DriverError, DriverResult, Envelope, QueueInfo,
};

struct Consumer {
    queue: String,
    no_ack: bool,
    sender: UnboundedSender<DriverResult<Envelope>>,
}

struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Default)]
pub struct Broker {
    exchanges: HashMap<String, String>,
    queues: HashMap<String, VecDeque<Envelope>>,
    bindings: Vec<Binding>,
    consumers: HashMap<String, Consumer>,
    unacked: BTreeMap<u64, (String, Envelope)>,
    last_delivery_tag: u64,
    generated_names: u32,
    failures: HashMap<String, String>,
    calls: Vec<String>,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
    prefetch_count: Option<u16>,
    closed: bool,
}

impl Broker {
    fn next_delivery_tag(&mut self) -> u64 {
        self.last_delivery_tag += 1;
        self.last_delivery_tag
    }

    fn route(&self, exchange: &str, routing_key: &str) -> DriverResult<Vec<String>> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default());
        }

        let kind = self.exchanges.get(exchange).ok_or_else(|| {
            DriverError::new(format!("NOT_FOUND - no exchange '{}' in vhost '/'", exchange))
        })?;

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind.as_str() {
                "fanout" | "headers" => true,
                "topic" => topic_matches(&b.routing_key, routing_key),
                _ => b.routing_key == routing_key,
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();
        Ok(targets)
    }

    fn deliver(&mut self, queue: &str, mut envelope: Envelope) {
        // Consumers whose stream was dropped without a cancel.
        self.consumers.retain(|_, c| !c.sender.is_closed());

        let consumer = self
            .consumers
            .values()
            .find(|c| c.queue == queue)
            .map(|c| (c.no_ack, c.sender.clone()));

        match consumer {
            Some((no_ack, sender)) => {
                envelope.delivery_tag = self.next_delivery_tag();
                match sender.unbounded_send(Ok(envelope.clone())) {
                    Ok(()) if !no_ack => {
                        self.unacked
                            .insert(envelope.delivery_tag, (queue.to_string(), envelope));
                    }
                    Ok(()) => {}
                    Err(_) => {
                        if let Some(ready) = self.queues.get_mut(queue) {
                            ready.push_back(envelope);
                        }
                    }
                }
            }
            None => {
                if let Some(ready) = self.queues.get_mut(queue) {
                    ready.push_back(envelope);
                }
            }
        }
    }

    fn settle(&mut self, delivery_tag: u64, multiple: bool) -> DriverResult<Vec<(String, Envelope)>> {
        let tags: Vec<u64> = if multiple {
            let upper = if delivery_tag == 0 { u64::MAX } else { delivery_tag };
            self.unacked.range(..=upper).map(|(tag, _)| *tag).collect()
        } else if self.unacked.contains_key(&delivery_tag) {
            vec![delivery_tag]
        } else {
            Vec::new()
        };

        if tags.is_empty() {
            return Err(DriverError::new(format!(
                "PRECONDITION_FAILED - unknown delivery tag {}",
                delivery_tag
            )));
        }

        Ok(tags
            .into_iter()
            .filter_map(|tag| self.unacked.remove(&tag))
            .collect())
    }
}

fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|i| matches(rest, &key[i..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[allow(unreachable_patterns)]
fn kind_name(kind: &ExchangeKind) -> String {
    match kind {
        ExchangeKind::Custom(name) => name.clone(),
        ExchangeKind::Direct => "direct".to_string(),
        ExchangeKind::Fanout => "fanout".to_string(),
        ExchangeKind::Headers => "headers".to_string(),
        ExchangeKind::Topic => "topic".to_string(),
        _ => "custom".to_string(),
    }
}

/// Shared handle on an in-memory broker; clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    broker: Arc<Mutex<Broker>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().expect("broker lock poisoned")
    }

    fn begin(&self, operation: &str) -> DriverResult<MutexGuard<'_, Broker>> {
        let mut broker = self.state();
        broker.calls.push(operation.to_string());
        if broker.closed {
            return Err(DriverError::new("invalid channel state: Closed"));
        }
        if let Some(reason) = broker.failures.remove(operation) {
            return Err(DriverError::new(reason));
        }
        Ok(broker)
    }

    /// Make the next call of `operation` fail with `reason`.
    pub fn fail_next(&self, operation: &str, reason: &str) {
        self.state()
            .failures
            .insert(operation.to_string(), reason.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == operation).count()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn unacked_tags(&self) -> Vec<u64> {
        self.state().unacked.keys().copied().collect()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state().acked.clone()
    }

    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.state().nacked.clone()
    }

    pub fn prefetch_count(&self) -> Option<u16> {
        self.state().prefetch_count
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// An exchange that exists on the broker but was declared by someone else.
    pub fn add_exchange(&self, name: &str, kind: &str) {
        self.state()
            .exchanges
            .insert(name.to_string(), kind.to_string());
    }

    /// A queue that exists on the broker but was declared by someone else.
    pub fn add_queue(&self, name: &str) {
        self.state()
            .queues
            .insert(name.to_string(), VecDeque::new());
    }

    /// Put a message straight onto a queue, as if routed from elsewhere.
    pub fn push(&self, queue: &str, body: &[u8]) {
        let envelope = Envelope {
            routing_key: queue.to_string(),
            body: body.to_vec(),
            ..Envelope::default()
        };
        self.state().deliver(queue, envelope);
    }

    /// Broker-initiated cancel of every consumer on `queue`.
    pub fn cancel_consumers(&self, queue: &str) {
        self.state().consumers.retain(|_, c| c.queue != queue);
    }

    /// Push a driver failure into every consumer stream on `queue`.
    pub fn fail_consumers(&self, queue: &str, reason: &str) {
        for consumer in self.state().consumers.values().filter(|c| c.queue == queue) {
            let _ = consumer
                .sender
                .unbounded_send(Err(DriverError::new(reason)));
        }
    }
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    async fn basic_qos(&self, prefetch_count: u16, _options: BasicQosOptions) -> DriverResult<()> {
        let mut broker = self.begin("basic.qos")?;
        broker.prefetch_count = Some(prefetch_count);
        Ok(())
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> DriverResult<()> {
        let mut broker = self.begin("exchange.declare")?;
        let kind = kind_name(&kind);

        match broker.exchanges.get(exchange) {
            Some(existing) if *existing != kind => Err(DriverError::new(format!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}': received '{}' but current is '{}'",
                exchange, kind, existing
            ))),
            Some(_) => Ok(()),
            None if options.passive => Err(DriverError::new(format!(
                "NOT_FOUND - no exchange '{}' in vhost '/'",
                exchange
            ))),
            None => {
                broker.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn exchange_delete(&self, exchange: &str, options: ExchangeDeleteOptions) -> DriverResult<()> {
        let mut broker = self.begin("exchange.delete")?;
        if !broker.exchanges.contains_key(exchange) {
            return Err(DriverError::new(format!(
                "NOT_FOUND - no exchange '{}' in vhost '/'",
                exchange
            )));
        }
        if options.if_unused && broker.bindings.iter().any(|b| b.exchange == exchange) {
            return Err(DriverError::new(format!(
                "PRECONDITION_FAILED - exchange '{}' in use",
                exchange
            )));
        }

        broker.exchanges.remove(exchange);
        broker.bindings.retain(|b| b.exchange != exchange);
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        _arguments: FieldTable,
    ) -> DriverResult<QueueInfo> {
        let mut broker = self.begin("queue.declare")?;

        let name = if queue.is_empty() {
            broker.generated_names += 1;
            format!("amq.gen-{}", broker.generated_names)
        } else {
            queue.to_string()
        };

        if !broker.queues.contains_key(&name) {
            if options.passive {
                return Err(DriverError::new(format!(
                    "NOT_FOUND - no queue '{}' in vhost '/'",
                    name
                )));
            }
            broker.queues.insert(name.clone(), VecDeque::new());
        }

        let message_count = broker.queues[&name].len() as u32;
        let consumer_count = broker.consumers.values().filter(|c| c.queue == name).count() as u32;
        Ok(QueueInfo {
            name,
            message_count,
            consumer_count,
        })
    }

    async fn queue_delete(&self, queue: &str, _options: QueueDeleteOptions) -> DriverResult<u32> {
        let mut broker = self.begin("queue.delete")?;
        let ready = broker.queues.remove(queue).ok_or_else(|| {
            DriverError::new(format!("NOT_FOUND - no queue '{}' in vhost '/'", queue))
        })?;

        broker.bindings.retain(|b| b.queue != queue);
        broker.consumers.retain(|_, c| c.queue != queue);
        Ok(ready.len() as u32)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: FieldTable,
    ) -> DriverResult<()> {
        let mut broker = self.begin("queue.bind")?;
        if exchange.is_empty() {
            return Err(DriverError::new(
                "ACCESS_REFUSED - operation not permitted on the default exchange",
            ));
        }
        if !broker.exchanges.contains_key(exchange) {
            return Err(DriverError::new(format!(
                "NOT_FOUND - no exchange '{}' in vhost '/'",
                exchange
            )));
        }
        if !broker.queues.contains_key(queue) {
            return Err(DriverError::new(format!(
                "NOT_FOUND - no queue '{}' in vhost '/'",
                queue
            )));
        }

        broker.bindings.push(Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn queue_purge(&self, queue: &str) -> DriverResult<u32> {
        let mut broker = self.begin("queue.purge")?;
        let ready = broker.queues.get_mut(queue).ok_or_else(|| {
            DriverError::new(format!("NOT_FOUND - no queue '{}' in vhost '/'", queue))
        })?;

        let purged = ready.len() as u32;
        ready.clear();
        Ok(purged)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> DriverResult<()> {
        let mut broker = self.begin("basic.publish")?;
        for queue in broker.route(exchange, routing_key)? {
            let envelope = Envelope {
                delivery_tag: 0,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                redelivered: false,
                properties: properties.clone(),
                body: payload.to_vec(),
            };
            broker.deliver(&queue, envelope);
        }
        Ok(())
    }

    async fn basic_get(&self, queue: &str, options: BasicGetOptions) -> DriverResult<Option<Envelope>> {
        let mut broker = self.begin("basic.get")?;
        let ready = broker.queues.get_mut(queue).ok_or_else(|| {
            DriverError::new(format!("NOT_FOUND - no queue '{}' in vhost '/'", queue))
        })?;

        let Some(mut envelope) = ready.pop_front() else {
            return Ok(None);
        };
        envelope.delivery_tag = broker.next_delivery_tag();
        if !options.no_ack {
            broker
                .unacked
                .insert(envelope.delivery_tag, (queue.to_string(), envelope.clone()));
        }
        Ok(Some(envelope))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> DriverResult<DeliveryStream> {
        let mut broker = self.begin("basic.consume")?;
        let ready: Vec<Envelope> = broker
            .queues
            .get_mut(queue)
            .ok_or_else(|| {
                DriverError::new(format!("NOT_FOUND - no queue '{}' in vhost '/'", queue))
            })?
            .drain(..)
            .collect();

        let (sender, receiver) = unbounded();
        broker.consumers.insert(
            consumer_tag.to_string(),
            Consumer {
                queue: queue.to_string(),
                no_ack: options.no_ack,
                sender,
            },
        );
        for envelope in ready {
            broker.deliver(queue, envelope);
        }
        Ok(receiver.boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> DriverResult<()> {
        let mut broker = self.begin("basic.cancel")?;
        broker.consumers.remove(consumer_tag);
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64, options: BasicAckOptions) -> DriverResult<()> {
        let mut broker = self.begin("basic.ack")?;
        let settled = broker.settle(delivery_tag, options.multiple)?;
        for (_, envelope) in settled {
            broker.acked.push(envelope.delivery_tag);
        }
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, options: BasicNackOptions) -> DriverResult<()> {
        let mut broker = self.begin("basic.nack")?;
        let settled = broker.settle(delivery_tag, options.multiple)?;
        for (queue, mut envelope) in settled.into_iter().rev() {
            broker.nacked.push((envelope.delivery_tag, options.requeue));
            if options.requeue {
                envelope.redelivered = true;
                if let Some(ready) = broker.queues.get_mut(&queue) {
                    ready.push_front(envelope);
                }
            }
        }
        Ok(())
    }

    async fn close(&self, _reply_code: u16, _reply_text: &str) -> DriverResult<()> {
        let mut broker = self.begin("channel.close")?;
        broker.closed = true;
        broker.consumers.clear();
        Ok(())
    }
}

/// A client over a fresh in-memory broker, plus a handle to inspect that broker.
pub async fn memory_client(uri: &str) -> (AmqpClient<MemoryChannel>, MemoryChannel) {
    let channel = MemoryChannel::new();
    let client = AmqpClient::with_channel(uri, channel.clone())
        .await
        .expect("in-memory client");
    (client, channel)
}

#[test]
fn topic_patterns() {
    assert!(topic_matches("orders.*", "orders.created"));
    assert!(!topic_matches("orders.*", "orders.created.eu"));
    assert!(topic_matches("orders.#", "orders.created.eu"));
    assert!(topic_matches("#", "anything.at.all"));
    assert!(!topic_matches("orders.created", "orders.deleted"));
}
