pub mod agent_store;
pub mod run_store;
pub mod schedule_store;

pub use agent_store::AgentStore;
pub use run_store::RunStore;
pub use schedule_store::ScheduleStore;
