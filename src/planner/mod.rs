mod conflict;
mod planner;
mod session;

pub use conflict::{resolve_conflicts, DroppedPass, Resolution};
pub use planner::{PassPlanner, Plan, PlanError, PlannerSettings, SessionPlanner};
pub use session::{OutputDirs, ScheduledSession, SessionPaths};

#[cfg(test)]
pub(crate) use conflict::tests as fixtures;
