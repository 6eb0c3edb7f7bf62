pub mod agent;
pub mod run;
pub mod schedule;

pub use agent::*;
pub use run::*;
pub use schedule::*;
