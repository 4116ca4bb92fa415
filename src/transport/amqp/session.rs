//! Impure I/O: AMQP 0-9-1 sessions backed by lapin
//!
//! [`AmqpConnector`] dials the broker, opens one channel and forwards
//! connection and channel errors to the fault channel handed in by the
//! connection manager.

use super::connection::{AmqpError, BrokerEndpoint};
use crate::transport::{
    BrokerConnector, BrokerFault, BrokerSession, ConsumeOptions, DeliveryStream, ExchangeKind,
    ExchangeOptions, FaultSender, MessageProperties, QueueOptions,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REPLY_SUCCESS: u16 = 200;

/// Production connector speaking native AMQP
#[derive(Debug, Default, Clone)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn open(
        &self,
        endpoint: &BrokerEndpoint,
        faults: FaultSender,
    ) -> Result<Arc<dyn BrokerSession>, AmqpError> {
        info!(
            relay = %endpoint.websocket_url(),
            host = %endpoint.host,
            secure = endpoint.secure,
            "Connecting to broker"
        );

        let connection = Connection::connect(&endpoint.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| AmqpError::ConnectionFailed(Box::new(e)))?;

        let connection_faults = faults.clone();
        connection.on_error(move |error| {
            warn!("AMQP connection error: {}", error);
            let _ = connection_faults.send(BrokerFault::Transport(error.to_string()));
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel open failed").await;
                return Err(AmqpError::ChannelFailed(Box::new(e)));
            }
        };

        // The broker may close the channel alone (404/403/406) and leave the connection up
        channel.on_error(move |error| {
            warn!("AMQP channel error: {}", error);
            let _ = faults.send(BrokerFault::Channel(error.to_string()));
        });

        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Arc::new(AmqpSession {
            connection,
            channel,
        }))
    }
}

/// Open AMQP connection with its single channel
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

fn lapin_exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), AmqpError> {
        let declare_options = ExchangeDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: false,
            ..Default::default()
        };

        self.channel
            .exchange_declare(
                name,
                lapin_exchange_kind(kind),
                declare_options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| AmqpError::DeclareFailed {
                object: format!("exchange {name}"),
                source: Box::new(e),
            })
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, AmqpError> {
        let declare_options = QueueDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            exclusive: options.exclusive,
            ..Default::default()
        };

        let queue = self
            .channel
            .queue_declare(name, declare_options, FieldTable::default())
            .await
            .map_err(|e| AmqpError::DeclareFailed {
                object: format!("queue '{name}'"),
                source: Box::new(e),
            })?;

        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AmqpError::BindFailed {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                source: Box::new(e),
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError> {
        let basic_properties = BasicProperties::default()
            .with_content_type(properties.content_type.into())
            .with_correlation_id(properties.correlation_id.into())
            .with_reply_to(properties.reply_to.into());

        // The returned confirm is dropped: publishes are fire-and-forget
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                basic_properties,
            )
            .await
            .map_err(|e| AmqpError::PublishFailed(Box::new(e)))?;

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consume_options = BasicConsumeOptions {
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            ..Default::default()
        };

        let consumer = self
            .channel
            .basic_consume(queue, "", consume_options, FieldTable::default())
            .await
            .map_err(|e| AmqpError::ConsumeFailed {
                queue: queue.to_string(),
                source: Box::new(e),
            })?;

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(|delivery| delivery.data)
                .map_err(|e| AmqpError::DeliveryFailed(Box::new(e)))
        });

        Ok(deliveries.boxed())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "client disconnect")
                .await
                .map_err(|e| AmqpError::CloseFailed(Box::new(e)))?;
            debug!("AMQP channel closed");
        }

        if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "client disconnect")
                .await
                .map_err(|e| AmqpError::CloseFailed(Box::new(e)))?;
            debug!("AMQP connection closed");
        }

        Ok(())
    }
}
