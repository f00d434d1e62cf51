//! FIFO queue of pending plans.
//!
//! The queue owns its elements; callers get owned copies at the enqueue and
//! dequeue boundaries, so no caller can mutate a queued plan. Insertion
//! order is preserved globally. Every operation publishes an event.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::Plan;
use crate::services::event_bus::{EventBus, EventPayload};

const COMPONENT: &str = "execution-queue";

pub struct ExecutionQueue {
    inner: Mutex<VecDeque<Plan>>,
    bus: Arc<EventBus>,
}

impl ExecutionQueue {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            bus,
        }
    }

    /// Push a plan at the tail.
    pub async fn enqueue(&self, plan: Plan) {
        let plan_id = plan.plan_id;
        let depth = {
            let mut queue = self.inner.lock().await;
            queue.push_back(plan);
            queue.len()
        };
        self.bus.publish(
            COMPONENT,
            EventPayload::PlanEnqueued {
                plan_id,
                queue_depth: depth,
            },
        );
    }

    /// Pop the plan at the head, if any.
    pub async fn dequeue(&self) -> Option<Plan> {
        let (plan, depth) = {
            let mut queue = self.inner.lock().await;
            let plan = queue.pop_front();
            (plan, queue.len())
        };
        if let Some(ref plan) = plan {
            self.bus.publish(
                COMPONENT,
                EventPayload::PlanDequeued {
                    plan_id: plan.plan_id,
                    queue_depth: depth,
                },
            );
        }
        plan
    }

    /// Copy of the head plan without removing it.
    pub async fn peek(&self) -> Option<Plan> {
        self.inner.lock().await.front().cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Copy of the first plan with the given id.
    pub async fn find_by_plan_id(&self, plan_id: Uuid) -> Option<Plan> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|p| p.plan_id == plan_id)
            .cloned()
    }

    /// Remove and return the first plan with the given id.
    pub async fn remove_by_plan_id(&self, plan_id: Uuid) -> Option<Plan> {
        let removed = {
            let mut queue = self.inner.lock().await;
            queue
                .iter()
                .position(|p| p.plan_id == plan_id)
                .and_then(|index| queue.remove(index))
        };
        if removed.is_some() {
            self.bus
                .publish(COMPONENT, EventPayload::PlanRemoved { plan_id });
        }
        removed
    }

    /// Drop every queued plan; returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let dropped = {
            let mut queue = self.inner.lock().await;
            let count = queue.len();
            queue.clear();
            count
        };
        self.bus
            .publish(COMPONENT, EventPayload::QueueCleared { dropped });
        dropped
    }
}
