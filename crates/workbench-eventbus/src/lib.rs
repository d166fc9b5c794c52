//! Publish/fan-out of applied workbench events.

pub mod bus;
pub mod envelope;

pub use bus::{WorkbenchEventBus, WorkbenchEventBusConfig};
pub use envelope::WorkbenchEventEnvelope;
