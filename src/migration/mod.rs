//! Migration - Decommission planning for pools and zones

pub mod planner;

pub use planner::{
    has_alternate_copy, plan, MigrationAssignment, MigrationPlan, PlanStatus, PlanTarget,
    UnplacedVolume,
};
