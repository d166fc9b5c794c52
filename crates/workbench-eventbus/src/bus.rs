use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use tokio::sync::broadcast;
use workbench_core::WorkbenchEvent;
use workbench_protocol::{
    ProjectId, DEFAULT_EVENTBUS_GLOBAL_CAPACITY, DEFAULT_EVENTBUS_PROJECT_CAPACITY,
};

use crate::envelope::WorkbenchEventEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkbenchEventBusConfig {
    pub project_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for WorkbenchEventBusConfig {
    fn default() -> Self {
        Self {
            project_buffer_capacity: DEFAULT_EVENTBUS_PROJECT_CAPACITY,
            global_buffer_capacity: DEFAULT_EVENTBUS_GLOBAL_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct WorkbenchEventBus {
    next_sequence: AtomicU64,
    boot_instant: Instant,
    config: WorkbenchEventBusConfig,
    project_senders: RwLock<HashMap<ProjectId, broadcast::Sender<WorkbenchEventEnvelope>>>,
    global_sender: broadcast::Sender<WorkbenchEventEnvelope>,
}

impl Default for WorkbenchEventBus {
    fn default() -> Self {
        Self::new(WorkbenchEventBusConfig::default())
    }
}

impl WorkbenchEventBus {
    pub fn new(config: WorkbenchEventBusConfig) -> Self {
        assert!(
            config.project_buffer_capacity > 0,
            "project_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            boot_instant: Instant::now(),
            config,
            project_senders: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    pub fn subscribe_project(
        &self,
        project_id: ProjectId,
    ) -> broadcast::Receiver<WorkbenchEventEnvelope> {
        if let Some(sender) = self.project_sender(&project_id) {
            return sender.subscribe();
        }

        let mut project_senders = self
            .project_senders
            .write()
            .expect("workbench eventbus project sender lock poisoned");
        let sender = project_senders.entry(project_id).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.project_buffer_capacity);
            sender
        });
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<WorkbenchEventEnvelope> {
        self.global_sender.subscribe()
    }

    /// Drops the project's channel; its subscribers observe `Closed`.
    pub fn remove_project(&self, project_id: &ProjectId) -> bool {
        let mut project_senders = self
            .project_senders
            .write()
            .expect("workbench eventbus project sender lock poisoned");
        project_senders.remove(project_id).is_some()
    }

    /// Moves the subscribers of `from` over to `to`.
    pub fn rename_project(&self, from: &ProjectId, to: &ProjectId) {
        let mut project_senders = self
            .project_senders
            .write()
            .expect("workbench eventbus project sender lock poisoned");
        if let Some(sender) = project_senders.remove(from) {
            project_senders.insert(to.clone(), sender);
        }
    }

    pub fn publish(
        &self,
        project_id: Option<ProjectId>,
        event: WorkbenchEvent,
    ) -> WorkbenchEventEnvelope {
        let envelope = WorkbenchEventEnvelope {
            sequence: self.next_sequence(),
            project_id,
            received_at_monotonic_nanos: self.monotonic_nanos_since_bus_bootstrap(),
            event,
        };

        let project_sender = envelope
            .project_id
            .as_ref()
            .and_then(|project_id| self.project_sender(project_id))
            .filter(|sender| sender.receiver_count() > 0);
        if let Some(sender) = project_sender {
            let _ = sender.send(envelope.clone());
        }
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(envelope.clone());
        }

        envelope
    }

    fn project_sender(
        &self,
        project_id: &ProjectId,
    ) -> Option<broadcast::Sender<WorkbenchEventEnvelope>> {
        let project_senders = self
            .project_senders
            .read()
            .expect("workbench eventbus project sender lock poisoned");
        project_senders.get(project_id).cloned()
    }

    fn next_sequence(&self) -> u64 {
        let mut current = self.next_sequence.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("workbench event sequence exhausted");
            match self.next_sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn monotonic_nanos_since_bus_bootstrap(&self) -> u64 {
        let nanos = self.boot_instant.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}
