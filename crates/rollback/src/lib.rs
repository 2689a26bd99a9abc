pub mod controller;
pub mod events;

pub use controller::{RollbackController, RollbackTrigger, TriggerCondition};
pub use events::{
    EventHistory, EventStatus, RollbackAction, RollbackActionKind, RollbackEvent, RollbackStats,
    TriggeredBy,
};
