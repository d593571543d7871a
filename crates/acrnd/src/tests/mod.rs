//! Test suites for the supervisor.

mod process_behaviour;
pub(crate) mod support;
