//! AMQP broker adapter
//!
//! Declarative topology: every exchange gets a primary queue, a paired
//! dead-letter exchange `<name>.dlx` whose queue holds quarantined messages
//! for a configurable number of days, and a delay queue whose per-message TTL
//! dead-letters expired messages back into the primary exchange. Consumer
//! rejection with a retryable error republishes to the delay queue with
//! `expiration = unit * 2^attempt`, so redelivery backs off exponentially
//! without any scheduler process.
//!
//! Delivery is at-least-once; handlers are expected to be idempotent.

use crate::config::CoreConfig;
use crate::error::{EngineError, Result};
use crate::types::{ProjectId, SessionId, TaskId};
use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Exchange names.
pub mod exchanges {
    pub const SESSION_PENDING: &str = "session-pending";
    pub const LEARNING_SKILL: &str = "learning-skill";
    /// Declared for topology parity with existing deployments; no consumer.
    pub const SOP_COMPLETE: &str = "sop-complete";
}

/// Routing keys.
pub mod routing_keys {
    pub const SESSION_PENDING_PROCESS: &str = "session-pending.process";
    pub const LEARNING_SKILL_PROCESS: &str = "learning-skill.process";
    pub const SOP_COMPLETE_PROCESS: &str = "sop-complete.process";
}

const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Envelope published when a session has pending messages to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPendingEvent {
    pub project_id: ProjectId,
    pub session_id: SessionId,
}

/// Envelope published for every task that terminated during an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillLearnEvent {
    pub project_id: ProjectId,
    pub session_id: SessionId,
    pub task_id: TaskId,
}

/// One exchange/queue binding in the declarative topology.
#[derive(Debug, Clone)]
pub struct Binding {
    pub exchange: &'static str,
    pub routing_key: &'static str,
}

impl Binding {
    pub fn queue(&self) -> String {
        format!("{}.q", self.exchange)
    }

    pub fn delay_queue(&self) -> String {
        format!("{}.delay.q", self.exchange)
    }

    pub fn dlx_exchange(&self) -> String {
        format!("{}.dlx", self.exchange)
    }

    pub fn dlx_queue(&self) -> String {
        format!("{}.dlx.q", self.exchange)
    }
}

/// The full topology this engine declares at startup.
pub fn topology() -> Vec<Binding> {
    vec![
        Binding {
            exchange: exchanges::SESSION_PENDING,
            routing_key: routing_keys::SESSION_PENDING_PROCESS,
        },
        Binding {
            exchange: exchanges::LEARNING_SKILL,
            routing_key: routing_keys::LEARNING_SKILL_PROCESS,
        },
        Binding {
            exchange: exchanges::SOP_COMPLETE,
            routing_key: routing_keys::SOP_COMPLETE_PROCESS,
        },
    ]
}

/// Consumer registration parameters.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub binding: Binding,
    pub max_retries: u32,
    pub retry_delay_unit: Duration,
    pub handler_timeout: Duration,
}

/// Boxed async message handler. Receives the raw JSON payload.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// AMQP broker handle: topology owner, publisher, consumer registrar.
pub struct Broker {
    _connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect, declare the full topology, and enable publisher confirms.
    pub async fn connect(config: &CoreConfig) -> Result<Self> {
        let properties = ConnectionProperties::default()
            .with_connection_name(config.mq_connection_name.clone().into());
        let connection = Connection::connect(&config.mq_url, properties).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .basic_qos(config.mq_global_qos, BasicQosOptions::default())
            .await?;

        let broker = Self {
            _connection: connection,
            channel,
        };
        broker
            .declare_topology(config.mq_dlx_ttl_days as u64 * 24 * 60 * 60 * 1000)
            .await?;
        info!(url = %config.mq_url, "broker connected, topology declared");
        Ok(broker)
    }

    async fn declare_topology(&self, dlx_ttl_ms: u64) -> Result<()> {
        let durable = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };

        for binding in topology() {
            // Primary exchange
            self.channel
                .exchange_declare(
                    binding.exchange,
                    ExchangeKind::Direct,
                    durable_exchange,
                    FieldTable::default(),
                )
                .await?;

            // Dead-letter exchange + quarantine queue (fanout so any routing
            // key lands in the one queue)
            self.channel
                .exchange_declare(
                    &binding.dlx_exchange(),
                    ExchangeKind::Fanout,
                    durable_exchange,
                    FieldTable::default(),
                )
                .await?;
            let mut dlx_args = FieldTable::default();
            dlx_args.insert(
                "x-message-ttl".into(),
                AMQPValue::LongLongInt(dlx_ttl_ms as i64),
            );
            self.channel
                .queue_declare(&binding.dlx_queue(), durable, dlx_args)
                .await?;
            self.channel
                .queue_bind(
                    &binding.dlx_queue(),
                    &binding.dlx_exchange(),
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            // Primary queue, dead-lettering into the DLX
            let mut queue_args = FieldTable::default();
            queue_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(binding.dlx_exchange().into()),
            );
            self.channel
                .queue_declare(&binding.queue(), durable, queue_args)
                .await?;
            self.channel
                .queue_bind(
                    &binding.queue(),
                    binding.exchange,
                    binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            // Delay queue: TTL expiry dead-letters back into the primary
            // exchange under the original routing key
            let mut delay_args = FieldTable::default();
            delay_args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(binding.exchange.into()),
            );
            delay_args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(binding.routing_key.into()),
            );
            self.channel
                .queue_declare(&binding.delay_queue(), durable, delay_args)
                .await?;

            debug!(exchange = binding.exchange, "declared binding");
        }
        Ok(())
    }

    /// Publish a typed envelope as JSON, waiting for the broker confirm.
    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &T,
    ) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await?
            .await?;
        debug!(exchange, routing_key, bytes = payload.len(), "published");
        Ok(())
    }

    /// Publish a typed envelope onto a binding's delay queue; TTL expiry
    /// routes it back into the primary exchange. Used to park work briefly
    /// (e.g. a session whose ingest lock is held).
    pub async fn publish_delayed<T: Serialize>(
        &self,
        binding: &Binding,
        envelope: &T,
        delay: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_expiration(delay.as_millis().to_string().into());
        self.channel
            .basic_publish(
                "",
                &binding.delay_queue(),
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;
        debug!(queue = %binding.delay_queue(), ?delay, "published delayed");
        Ok(())
    }

    /// Register a consumer. Spawns a task that drives deliveries through
    /// `handler` under the spec's timeout, acking / delaying / quarantining
    /// per the retry contract.
    pub async fn register_consumer(&self, spec: ConsumerSpec, handler: Handler) -> Result<()> {
        let queue = spec.binding.queue();
        let consumer_tag = format!("lore.{queue}");
        let mut consumer = self
            .channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let channel = self.channel.clone();
        info!(queue = %queue, max_retries = spec.max_retries, "consumer registered");

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "delivery stream error");
                        continue;
                    }
                };
                let retry_count = read_retry_count(delivery.properties.headers());
                let payload = delivery.data.clone();

                let outcome =
                    match tokio::time::timeout(spec.handler_timeout, handler(payload)).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::timeout(format!(
                            "handler exceeded {:?}",
                            spec.handler_timeout
                        ))),
                    };

                let decision = match &outcome {
                    Ok(()) => Decision::Ack,
                    Err(e) if e.is_retryable() && retry_count < spec.max_retries => {
                        Decision::Delay
                    }
                    Err(_) => Decision::Quarantine,
                };

                match decision {
                    Decision::Ack => {}
                    Decision::Delay => {
                        let delay_ms = spec.retry_delay_unit.as_millis() as u64
                            * 2u64.saturating_pow(retry_count);
                        let mut headers = FieldTable::default();
                        headers.insert(
                            RETRY_COUNT_HEADER.into(),
                            AMQPValue::LongInt((retry_count + 1) as i32),
                        );
                        let properties = BasicProperties::default()
                            .with_headers(headers)
                            .with_expiration(delay_ms.to_string().into());
                        let republish = channel
                            .basic_publish(
                                "",
                                &spec.binding.delay_queue(),
                                BasicPublishOptions::default(),
                                &delivery.data,
                                properties,
                            )
                            .await;
                        match republish {
                            Ok(confirm) => {
                                if let Err(e) = confirm.await {
                                    error!(queue = %queue, error = %e, "delay republish unconfirmed");
                                }
                                warn!(
                                    queue = %queue,
                                    attempt = retry_count + 1,
                                    delay_ms,
                                    error = %outcome.as_ref().unwrap_err(),
                                    "handler failed, delaying redelivery"
                                );
                            }
                            Err(e) => {
                                error!(queue = %queue, error = %e, "delay republish failed");
                            }
                        }
                    }
                    Decision::Quarantine => {
                        let republish = channel
                            .basic_publish(
                                &spec.binding.dlx_exchange(),
                                spec.binding.routing_key,
                                BasicPublishOptions::default(),
                                &delivery.data,
                                BasicProperties::default(),
                            )
                            .await;
                        if let Err(e) = republish {
                            error!(queue = %queue, error = %e, "quarantine publish failed");
                        }
                        error!(
                            queue = %queue,
                            retry_count,
                            error = %outcome.as_ref().unwrap_err(),
                            "handler failed, quarantined to DLX"
                        );
                    }
                }

                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(queue = %queue, error = %e, "ack failed");
                }
            }
            warn!(queue = %queue, "consumer stream ended");
        });

        Ok(())
    }
}

enum Decision {
    Ack,
    Delay,
    Quarantine,
}

fn read_retry_count(headers: &Option<FieldTable>) -> u32 {
    let Some(table) = headers.as_ref() else {
        return 0;
    };
    match table.inner().get(RETRY_COUNT_HEADER) {
        Some(AMQPValue::LongInt(n)) => (*n).max(0) as u32,
        Some(AMQPValue::LongLongInt(n)) => (*n).max(0) as u32,
        Some(AMQPValue::ShortInt(n)) => (*n).max(0) as u32,
        Some(AMQPValue::ShortShortInt(n)) => (*n).max(0) as u32,
        _ => 0,
    }
}

/// The retry-delay schedule for a given unit: `unit * 2^attempt`.
pub fn retry_delay(unit: Duration, attempt: u32) -> Duration {
    Duration::from_millis(unit.as_millis() as u64 * 2u64.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_names() {
        let binding = Binding {
            exchange: exchanges::SESSION_PENDING,
            routing_key: routing_keys::SESSION_PENDING_PROCESS,
        };
        assert_eq!(binding.queue(), "session-pending.q");
        assert_eq!(binding.delay_queue(), "session-pending.delay.q");
        assert_eq!(binding.dlx_exchange(), "session-pending.dlx");
        assert_eq!(binding.dlx_queue(), "session-pending.dlx.q");
    }

    #[test]
    fn test_topology_covers_all_exchanges() {
        let names: Vec<&str> = topology().iter().map(|b| b.exchange).collect();
        assert_eq!(
            names,
            vec!["session-pending", "learning-skill", "sop-complete"]
        );
    }

    #[test]
    fn test_retry_delay_is_exponential() {
        let unit = Duration::from_millis(1000);
        assert_eq!(retry_delay(unit, 0), Duration::from_millis(1000));
        assert_eq!(retry_delay(unit, 1), Duration::from_millis(2000));
        assert_eq!(retry_delay(unit, 3), Duration::from_millis(8000));
    }

    #[test]
    fn test_read_retry_count_defaults_to_zero() {
        assert_eq!(read_retry_count(&None), 0);
        assert_eq!(read_retry_count(&Some(FieldTable::default())), 0);

        let mut table = FieldTable::default();
        table.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(3));
        assert_eq!(read_retry_count(&Some(table)), 3);
    }

    #[test]
    fn test_envelope_round_trip() {
        let event = SkillLearnEvent {
            project_id: ProjectId::new(),
            session_id: SessionId::new(),
            task_id: TaskId::new(),
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let back: SkillLearnEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event, back);
    }
}
