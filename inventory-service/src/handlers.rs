use crate::error::{InventoryError, Result};
use crate::reservation::{ReleaseTarget, ReservationOutcome};
use crate::retry::RetryPolicy;
use crate::stock::StockMutationOutcome;
use crate::store::StoredReply;
use crate::Inventory;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::*;
use std::time::Duration;
use tracing::{error, info, warn};

/// Executes inventory commands with idempotency-key replay protection.
#[derive(Clone)]
pub struct CommandProcessor {
    inventory: Inventory,
    convert_retry: RetryPolicy,
}

impl CommandProcessor {
    pub fn new(inventory: Inventory) -> Self {
        let attempts = inventory.config().convert_attempts;
        Self {
            inventory,
            convert_retry: RetryPolicy::new(attempts, Duration::from_millis(100)),
        }
    }

    pub fn with_convert_retry(mut self, policy: RetryPolicy) -> Self {
        self.convert_retry = policy;
        self
    }

    /// Replies to `command`, replaying the stored reply for a repeated
    /// idempotency key.
    ///
    /// Storage failures, including a failed idempotency lookup, produce a
    /// failed `INTERNAL` reply that is not recorded. The sender may resend
    /// under the same key and the command runs again.
    pub async fn process(&self, command: &Command) -> anyhow::Result<CommandReply> {
        let store = &self.inventory.context().store;

        match store.find_processed_command(&command.idempotency_key).await {
            Ok(Some(existing)) => {
                info!(idempotency_key = %command.idempotency_key, first_command_id = %existing.command_id, "command already processed, returning cached result");
                let reply: CommandReply = serde_json::from_value(existing.reply)?;
                return Ok(reply.replayed_for(command.id));
            }
            Ok(None) => {}
            Err(e) => {
                error!(idempotency_key = %command.idempotency_key, error = %e, "idempotency lookup failed");
                return Ok(CommandReply::failed(command.id, e.kind(), e.to_string(), None));
            }
        }

        let reply = match self.dispatch(command).await {
            Ok(reply) => reply,
            Err(e) if e.is_retryable() => {
                error!(command_id = %command.id, command_type = ?command.command_type, error = %e, "command failed on storage");
                return Ok(CommandReply::failed(command.id, e.kind(), e.to_string(), None));
            }
            Err(e) => {
                info!(command_id = %command.id, command_type = ?command.command_type, kind = %e.kind(), error = %e, "command rejected");
                CommandReply::failed(command.id, e.kind(), e.to_string(), None)
            }
        };

        let stored = StoredReply {
            command_id: command.id,
            reply: serde_json::to_value(&reply)?,
        };
        let now = self.inventory.context().now();
        if let Err(e) = store.record_processed_command(&command.idempotency_key, stored, now).await {
            error!(idempotency_key = %command.idempotency_key, error = %e, "failed to record processed command");
        }

        Ok(reply)
    }

    async fn dispatch(&self, command: &Command) -> Result<CommandReply> {
        let inv = &self.inventory;
        let id = command.id;

        match command.command_type {
            CommandType::Reserve => {
                let data: ReserveData = payload(command)?;
                let outcome = match &data.reason {
                    Some(reason) => {
                        inv.reservations
                            .reserve_with_reason(data.product_id, data.quantity, &data.owner_key, data.ttl_minutes, reason)
                            .await?
                    }
                    None => {
                        inv.reservations
                            .reserve(data.product_id, data.quantity, &data.owner_key, data.ttl_minutes)
                            .await?
                    }
                };
                match outcome {
                    ReservationOutcome::Reserved(receipt) => success(id, &receipt),
                    ReservationOutcome::Rejected(rejection) => {
                        rejected(id, rejection.kind, rejection.message.clone(), &rejection)
                    }
                }
            }
            CommandType::BulkReserve => {
                let data: BulkReserveData = payload(command)?;
                let result = inv
                    .reservations
                    .bulk_reserve(&data.owner_key, &data.items, data.ttl_minutes, data.mode)
                    .await;
                match result.failed_items.first() {
                    None => success(id, &result),
                    Some(first) => {
                        let message = format!("{} of {} items could not be reserved", result.failed_items.len(), data.items.len());
                        rejected(id, first.kind, message, &result)
                    }
                }
            }
            CommandType::Release => {
                let data: ReleaseData = payload(command)?;
                let result = match (data.reservation_id, data.owner_key, data.product_id) {
                    (Some(reservation_id), _, _) => {
                        inv.reservations.release(ReleaseTarget::Reservation(reservation_id)).await?
                    }
                    (None, Some(owner_key), Some(product_id)) => {
                        inv.reservations
                            .release(ReleaseTarget::OwnerProduct { owner_key, product_id })
                            .await?
                    }
                    (None, Some(owner_key), None) => inv.reservations.release_all(&owner_key).await?,
                    (None, None, _) => {
                        return Err(InventoryError::Validation("release needs a reservation_id or owner_key".into()));
                    }
                };
                success(id, &result)
            }
            CommandType::ReleaseAll => {
                let data: OwnerData = payload(command)?;
                success(id, &inv.reservations.release_all(&data.owner_key).await?)
            }
            CommandType::Extend => {
                let data: ExtendData = payload(command)?;
                success(id, &inv.reservations.extend(data.reservation_id, data.minutes).await?)
            }
            CommandType::ConvertToSale => {
                let data: OwnerData = payload(command)?;
                let reservations = &inv.reservations;
                let owner_key = &data.owner_key;
                let report = self
                    .convert_retry
                    .run(move || reservations.convert_to_sale(owner_key))
                    .await?;
                success(id, &report)
            }
            CommandType::IncreaseStock => {
                let data: StockChangeData = payload(command)?;
                let outcome = inv
                    .stock
                    .increase(data.product_id, data.quantity, &data.reason, data.reference)
                    .await?;
                stock_reply(id, outcome)
            }
            CommandType::DecreaseStock => {
                let data: StockChangeData = payload(command)?;
                let outcome = inv
                    .stock
                    .decrease(data.product_id, data.quantity, &data.reason, data.reference)
                    .await?;
                stock_reply(id, outcome)
            }
            CommandType::AdjustStock => {
                let data: StockChangeData = payload(command)?;
                let outcome = inv
                    .stock
                    .adjust(data.product_id, data.quantity, &data.reason, data.reference)
                    .await?;
                stock_reply(id, outcome)
            }
        }
    }
}

fn payload<T: DeserializeOwned>(command: &Command) -> Result<T> {
    serde_json::from_value(command.payload.clone())
        .map_err(|e| InventoryError::Validation(format!("invalid {:?} payload: {}", command.command_type, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| InventoryError::Internal(e.to_string()))
}

fn success<T: Serialize>(command_id: uuid::Uuid, value: &T) -> Result<CommandReply> {
    Ok(CommandReply::success(command_id, Some(to_json(value)?)))
}

fn rejected<T: Serialize>(command_id: uuid::Uuid, kind: ErrorKind, message: String, value: &T) -> Result<CommandReply> {
    Ok(CommandReply::failed(command_id, kind, message, Some(to_json(value)?)))
}

fn stock_reply(command_id: uuid::Uuid, outcome: StockMutationOutcome) -> Result<CommandReply> {
    match outcome {
        StockMutationOutcome::Applied { .. } => success(command_id, &outcome),
        StockMutationOutcome::Rejected(ref rejection) => {
            rejected(command_id, rejection.kind, rejection.message.clone(), &outcome)
        }
    }
}

/// Consumes the command topic and publishes a reply per command.
pub struct CommandHandler {
    processor: CommandProcessor,
    producer: FutureProducer,
    reply_topic: String,
}

impl CommandHandler {
    pub fn new(processor: CommandProcessor, producer: FutureProducer, reply_topic: String) -> Self {
        Self { processor, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<Command>(json_str) {
                                Ok(command) => {
                                    if let Err(e) = self.handle_command(command).await {
                                        error!("Error handling command: {}", e);
                                    }
                                }
                                Err(e) => warn!("Skipping malformed command: {}", e),
                            },
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, rdkafka::consumer::CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    async fn handle_command(&self, command: Command) -> anyhow::Result<()> {
        let reply = self.processor.process(&command).await?;
        self.send_reply(reply).await
    }

    async fn send_reply(&self, reply: CommandReply) -> anyhow::Result<()> {
        let json = serde_json::to_string(&reply)?;
        let key = reply.command_id.to_string();
        let record = FutureRecord::to(&self.reply_topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send reply: {}", e))?;

        Ok(())
    }
}
