//! Event stream access
//!
//! [`EventStream`] is the consumer-group protocol the consumer loop needs: make
//! sure the group exists, read a batch for this consumer, acknowledge a message,
//! reconnect after a failure. [`RedisEventStream`] implements it on Redis Streams.

use std::collections::HashMap;

use async_trait::async_trait;
use crmsync_core::{AppError, ConsumerConfig};
use redis::aio::MultiplexedConnection;
use redis::Client;

/// One stream entry: its id and the flat `[field, value, field, value, ..]` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: Vec<String>,
}

impl StreamMessage {
    pub fn new(id: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            fields: fields
                .iter()
                .flat_map(|(k, v)| [k.to_string(), v.to_string()])
                .collect(),
        }
    }
}

/// Turn a flat field list into a map. A trailing field without a value is dropped;
/// on duplicate names the last value wins.
pub fn decode_fields(fields: &[String]) -> HashMap<String, String> {
    if fields.len() % 2 != 0 {
        tracing::warn!(len = fields.len(), "Stream entry has an odd number of field items");
    }
    fields
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

#[async_trait]
pub trait EventStream: Send {
    /// Create the consumer group (and the stream) unless it already exists.
    async fn ensure_group(&mut self) -> Result<(), AppError>;

    /// Block until new messages arrive for this consumer or the block timeout
    /// passes; an empty batch is not an error.
    async fn read_batch(&mut self) -> Result<Vec<StreamMessage>, AppError>;

    async fn ack(&mut self, message_id: &str) -> Result<(), AppError>;

    async fn reconnect(&mut self) -> Result<(), AppError>;
}

fn broker_error(err: redis::RedisError) -> AppError {
    let code = if err.is_timeout() {
        Some("ETIMEDOUT".to_string())
    } else if err.is_connection_refusal() {
        Some("ECONNREFUSED".to_string())
    } else {
        None
    };
    AppError::Network {
        code,
        message: format!("Redis error: {}", err),
    }
}

type ReadGroupReply = Option<Vec<(String, Vec<(String, Vec<String>)>)>>;

/// Redis Streams consumer-group reader.
pub struct RedisEventStream {
    client: Client,
    connection: Option<MultiplexedConnection>,
    stream_key: String,
    group_name: String,
    consumer_name: String,
    block_ms: u64,
    batch_size: usize,
}

impl RedisEventStream {
    pub fn new(config: &ConsumerConfig) -> Result<Self, AppError> {
        let client = Client::open(config.redis_url.as_str()).map_err(broker_error)?;
        Ok(Self {
            client,
            connection: None,
            stream_key: config.stream_key.clone(),
            group_name: config.group_name.clone(),
            consumer_name: config.consumer_name.clone(),
            block_ms: config.block_ms,
            batch_size: config.batch_size,
        })
    }

    async fn connection(&mut self) -> Result<&mut MultiplexedConnection, AppError> {
        if self.connection.is_none() {
            let connection = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(broker_error)?;
            tracing::info!(stream = %self.stream_key, "Connected to Redis");
            self.connection = Some(connection);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| AppError::Internal("Redis connection unavailable".to_string()))
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn ensure_group(&mut self) -> Result<(), AppError> {
        let key = self.stream_key.clone();
        let group = self.group_name.clone();
        let conn = self.connection().await?;

        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %key, group = %group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(stream = %key, group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(broker_error(e)),
        }
    }

    async fn read_batch(&mut self) -> Result<Vec<StreamMessage>, AppError> {
        let key = self.stream_key.clone();
        let group = self.group_name.clone();
        let consumer = self.consumer_name.clone();
        let (count, block) = (self.batch_size, self.block_ms);
        let conn = self.connection().await?;

        let reply: ReadGroupReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&group)
            .arg(&consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block)
            .arg("STREAMS")
            .arg(&key)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(broker_error)?;

        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_stream, entries)| entries)
            .map(|(id, fields)| StreamMessage { id, fields })
            .collect())
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), AppError> {
        let key = self.stream_key.clone();
        let group = self.group_name.clone();
        let conn = self.connection().await?;

        let _acked: i64 = redis::cmd("XACK")
            .arg(&key)
            .arg(&group)
            .arg(message_id)
            .query_async(conn)
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), AppError> {
        self.connection = None;
        self.connection().await?;
        self.ensure_group().await
    }
}
