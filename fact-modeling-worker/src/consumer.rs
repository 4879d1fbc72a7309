use std::sync::Arc;

use health::HealthHandle;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::runs::{Discriminator, LaunchRequest, Launcher, RunIdentity};
use crate::types::{IngestionEvent, INGESTION_COMPLETE, INGESTION_FAILED};

/// Decide what an ingestion event means for us. Only a well-formed
/// completion event starts a run; everything else is logged and dropped, so
/// one bad event never wedges the partition.
pub fn handle_event(launcher: &Launcher, event: IngestionEvent) -> Option<RunIdentity> {
    match event.event_type.as_str() {
        INGESTION_COMPLETE => {
            let (Some(bank_id), Some(batch_id)) = (event.bank_id, event.batch_id) else {
                warn!(
                    event_id = ?event.event_id,
                    "ingestion completion event without bank or batch id, skipping"
                );
                metrics::counter!("modeling_events_skipped").increment(1);
                return None;
            };

            let request = LaunchRequest {
                bank_id,
                discriminator: Discriminator::Batch(batch_id),
                data_location: event.data_location_uri,
            };
            match launcher.launch(request) {
                Ok(run) => Some(run),
                Err(e) => {
                    warn!(event_id = ?event.event_id, error = %e, "trigger rejected, skipping");
                    metrics::counter!("modeling_events_skipped").increment(1);
                    None
                }
            }
        }
        INGESTION_FAILED => {
            warn!(
                bank_id = ?event.bank_id,
                batch_id = ?event.batch_id,
                error = ?event.error_message,
                "upstream ingestion failed, nothing to model"
            );
            None
        }
        other => {
            debug!(event_type = other, "ignoring unrelated event type");
            None
        }
    }
}

/// Consumes the ingestion event topic and hands triggers to the launcher.
/// Offsets are stored manually after each message is handled; poison pills
/// (empty or undecodable payloads) are stored too so they are never redelivered.
pub struct EventConsumerLoop {
    consumer: StreamConsumer,
    topic: String,
    launcher: Arc<Launcher>,
    liveness: HealthHandle,
}

impl EventConsumerLoop {
    pub fn new(
        config: &Config,
        launcher: Arc<Launcher>,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.offset.store", "false");

        if config.kafka.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[config.kafka_consumer_topic.as_str()])?;

        info!(
            topic = config.kafka_consumer_topic,
            group_id = config.kafka_consumer_group,
            "subscribed to ingestion event topic"
        );

        Ok(Self {
            consumer,
            topic: config.kafka_consumer_topic.clone(),
            launcher,
            liveness,
        })
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("starting event consumer loop");

        loop {
            self.liveness.report_healthy();

            let message = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, stopping event consumer");
                        return;
                    }
                    continue;
                }
                result = self.consumer.recv() => match result {
                    Ok(message) => message,
                    Err(e) => {
                        error!(error = %e, "kafka receive failed, will retry");
                        metrics::counter!("modeling_consumer_errors").increment(1);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let (partition, offset) = (message.partition(), message.offset());

            match message.payload() {
                None => {
                    warn!(partition, offset, "empty payload, storing offset and skipping");
                    metrics::counter!("modeling_events_poison").increment(1);
                }
                Some(payload) => match serde_json::from_slice::<IngestionEvent>(payload) {
                    Ok(event) => {
                        metrics::counter!("modeling_events_received").increment(1);
                        handle_event(&self.launcher, event);
                    }
                    Err(e) => {
                        warn!(partition, offset, error = %e, "undecodable event, storing offset and skipping");
                        metrics::counter!("modeling_events_poison").increment(1);
                    }
                },
            }

            if let Err(e) = self.consumer.store_offset(&self.topic, partition, offset) {
                error!(partition, offset, error = %e, "failed to store offset");
            }
        }
    }
}
