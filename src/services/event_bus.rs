//! Event bus for process-wide named event dispatch.
//!
//! A broadcast-based bus with sequence numbering. Each event kind is a
//! distinct payload variant; `EventPayload::kind` gives the dotted wire
//! name. Delivery per subscriber preserves the publish order of a single
//! component. Construct a fresh instance per test; there are no globals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::StepId;

/// Envelope carried on the bus.
#[derive(Debug, Clone, Serialize)]
pub struct CoreEvent {
    pub id: Uuid,
    /// Monotonically increasing per bus instance.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Emitting component name (`planner`, `workflow-engine`, ...).
    pub component: &'static str,
    pub payload: EventPayload,
}

/// Typed catalog of every event the core publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Planner and queue
    PlanCreated {
        plan_id: Uuid,
        step_count: usize,
        estimated_duration_mins: u32,
    },
    PlanEnqueued {
        plan_id: Uuid,
        queue_depth: usize,
    },
    PlanDequeued {
        plan_id: Uuid,
        queue_depth: usize,
    },
    PlanRemoved {
        plan_id: Uuid,
    },
    QueueCleared {
        dropped: usize,
    },

    // Workflow lifecycle
    WorkflowStarted {
        workflow_id: Uuid,
        plan_id: Uuid,
        task_count: usize,
    },
    WorkflowTaskStarted {
        workflow_id: Uuid,
        step_id: StepId,
        agent: String,
        attempt: u32,
    },
    WorkflowTaskCompleted {
        workflow_id: Uuid,
        step_id: StepId,
        attempts: u32,
    },
    WorkflowTaskFailed {
        workflow_id: Uuid,
        step_id: StepId,
        attempts: u32,
        error: String,
    },
    WorkflowTaskRetried {
        workflow_id: Uuid,
        step_id: StepId,
        attempt: u32,
        delay_ms: u64,
    },
    WorkflowCheckpointSaved {
        workflow_id: Uuid,
        checkpoint_id: Uuid,
    },
    WorkflowCompleted {
        workflow_id: Uuid,
        status: String,
        completed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    WorkflowFailed {
        workflow_id: Uuid,
        error: String,
    },

    // Memory
    MemoryStored {
        record_id: Uuid,
        key: String,
        category: String,
        agent: String,
    },
    MemoryUpdated {
        record_id: Uuid,
        agent: String,
    },
    MemoryDeleted {
        record_id: Uuid,
        agent: String,
    },

    // Providers
    ProviderRequest {
        provider: String,
        model: String,
    },
    ProviderResponse {
        provider: String,
        latency_ms: u64,
        total_tokens: u32,
    },
    ProviderFailover {
        from: String,
        to: String,
    },
    ProviderError {
        provider: String,
        error: String,
    },
    RateLimitConsumed {
        provider: String,
        remaining: f64,
    },
    RateLimitExceeded {
        provider: String,
    },
    RateLimitTimeout {
        provider: String,
        waited_ms: u64,
    },
    CircuitOpened {
        provider: String,
        failure_count: u32,
    },
    CircuitClosed {
        provider: String,
    },
}

impl EventPayload {
    /// Dotted wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan.created",
            Self::PlanEnqueued { .. } => "plan.enqueued",
            Self::PlanDequeued { .. } => "plan.dequeued",
            Self::PlanRemoved { .. } => "plan.removed",
            Self::QueueCleared { .. } => "queue.cleared",
            Self::WorkflowStarted { .. } => "workflow.started",
            Self::WorkflowTaskStarted { .. } => "workflow.task.started",
            Self::WorkflowTaskCompleted { .. } => "workflow.task.completed",
            Self::WorkflowTaskFailed { .. } => "workflow.task.failed",
            Self::WorkflowTaskRetried { .. } => "workflow.task.retried",
            Self::WorkflowCheckpointSaved { .. } => "workflow.checkpoint",
            Self::WorkflowCompleted { .. } => "workflow.completed",
            Self::WorkflowFailed { .. } => "workflow.failed",
            Self::MemoryStored { .. } => "memory.stored",
            Self::MemoryUpdated { .. } => "memory.updated",
            Self::MemoryDeleted { .. } => "memory.deleted",
            Self::ProviderRequest { .. } => "provider.request",
            Self::ProviderResponse { .. } => "provider.response",
            Self::ProviderFailover { .. } => "provider.failover",
            Self::ProviderError { .. } => "provider.error",
            Self::RateLimitConsumed { .. } => "provider.rateLimit.consumed",
            Self::RateLimitExceeded { .. } => "provider.rateLimit.exceeded",
            Self::RateLimitTimeout { .. } => "provider.rateLimit.timeout",
            Self::CircuitOpened { .. } => "provider.circuit.opened",
            Self::CircuitClosed { .. } => "provider.circuit.closed",
        }
    }
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Broadcast channel capacity; slow subscribers past this lag drop
    /// events (broadcast semantics).
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus. Cheap to clone behind an `Arc`.
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event from `component`. Send errors (no subscribers) are
    /// ignored.
    pub fn publish(&self, component: &'static str, payload: EventPayload) {
        let event = CoreEvent {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            component,
            payload,
        };
        tracing::debug!(kind = event.payload.kind(), component, seq = event.sequence, "event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to the full event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of events published so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            "planner",
            EventPayload::PlanCreated {
                plan_id: Uuid::new_v4(),
                step_count: 5,
                estimated_duration_mins: 285,
            },
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.component, "planner");
        assert_eq!(event.payload.kind(), "plan.created");
        assert_eq!(event.sequence, 0);
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic_per_bus() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        for _ in 0..3 {
            bus.publish("queue", EventPayload::QueueCleared { dropped: 0 });
        }

        let mut last = None;
        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            if let Some(prev) = last {
                assert!(event.sequence > prev);
            }
            last = Some(event.sequence);
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish("memory", EventPayload::MemoryDeleted {
            record_id: Uuid::new_v4(),
            agent: "qa".into(),
        });
        assert_eq!(bus.current_sequence(), 1);
    }

    #[test]
    fn test_wire_names_match_catalog() {
        let payload = EventPayload::RateLimitTimeout {
            provider: "a".into(),
            waited_ms: 100,
        };
        assert_eq!(payload.kind(), "provider.rateLimit.timeout");

        let payload = EventPayload::CircuitOpened {
            provider: "a".into(),
            failure_count: 5,
        };
        assert_eq!(payload.kind(), "provider.circuit.opened");
    }
}
