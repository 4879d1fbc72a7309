use std::time::Duration;

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::info;

use crate::config::KafkaConfig;
use crate::runs::{PipelineExecutionState, RunStatus};
use crate::types::{ModelingEvent, MODELING_COMPLETE, MODELING_FAILED};

/// Called exactly once per run, after the terminal transition is recorded.
/// A notifier failure is logged by the caller and does not re-open the run.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn run_finished(&self, state: &PipelineExecutionState) -> Result<(), Error>;
}

/// Publishes the terminal-state event to Kafka, keyed by bank id so all
/// events for one bank land on the same partition.
pub struct KafkaCompletionNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaCompletionNotifier {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

pub fn create_kafka_producer(config: &KafkaConfig) -> Result<FutureProducer, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec);

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    client_config.create()
}

#[async_trait]
impl CompletionNotifier for KafkaCompletionNotifier {
    async fn run_finished(&self, state: &PipelineExecutionState) -> Result<(), Error> {
        let event = modeling_event(state);
        let payload = serde_json::to_string(&event)?;

        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(&state.run.bank_id)
                    .payload(&payload),
                Duration::from_secs(10),
            )
            .await
            .map_err(|(e, _)| anyhow!("failed to produce completion event: {e}"))?;

        info!(
            run_id = %state.run.run_id,
            event_type = %event.event_type,
            topic = %self.topic,
            "published completion event"
        );
        metrics::counter!("modeling_events_published").increment(1);
        Ok(())
    }
}

fn modeling_event(state: &PipelineExecutionState) -> ModelingEvent {
    let event_type = match state.status {
        RunStatus::Completed => MODELING_COMPLETE,
        _ => MODELING_FAILED,
    };
    ModelingEvent {
        event_type: event_type.to_string(),
        run_id: state.run.run_id,
        bank_id: state.run.bank_id.clone(),
        records_read: state.counts.read,
        records_accepted: state.counts.accepted,
        records_rejected: state.counts.rejected,
        exit_detail: state.exit_detail.clone(),
    }
}

/// For deployments with no downstream consumer configured.
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn run_finished(&self, _state: &PipelineExecutionState) -> Result<(), Error> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::{Discriminator, RunCounts, RunIdentity};
    use chrono::Utc;
    use uuid::Uuid;

    fn state(status: RunStatus, exit_detail: Option<&str>) -> PipelineExecutionState {
        PipelineExecutionState {
            run: RunIdentity {
                run_id: Uuid::now_v7(),
                bank_id: "BANK_A".to_string(),
                discriminator: Discriminator::Batch("batch-1".to_string()),
                data_location: None,
                launched_at: Utc::now(),
            },
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            exit_detail: exit_detail.map(str::to_string),
            counts: RunCounts {
                read: 10,
                accepted: 8,
                rejected: 2,
            },
        }
    }

    #[test]
    fn completed_runs_map_to_complete_events() {
        let event = modeling_event(&state(RunStatus::Completed, None));
        assert_eq!(event.event_type, MODELING_COMPLETE);
        assert_eq!(event.records_accepted, 8);
        assert!(event.exit_detail.is_none());
    }

    #[test]
    fn failed_runs_carry_the_exit_detail() {
        let event = modeling_event(&state(RunStatus::Failed, Some("failed to commit chunk 3")));
        assert_eq!(event.event_type, MODELING_FAILED);
        assert_eq!(event.exit_detail.as_deref(), Some("failed to commit chunk 3"));
    }

    #[test]
    fn event_payload_uses_camel_case() {
        let event = modeling_event(&state(RunStatus::Completed, None));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], MODELING_COMPLETE);
        assert_eq!(json["recordsRead"], 10);
        assert_eq!(json["bankId"], "BANK_A");
    }
}
