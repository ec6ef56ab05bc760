pub mod engine;
pub mod lifecycle;

pub use engine::{reconcile_group, reconcile_war, Orphan, ReconcileError, ReconcileReport, ReconcileStats};
pub use lifecycle::{group_phase, GroupPhase};
