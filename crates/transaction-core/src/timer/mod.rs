//! Transaction timers: the RFC 3261 timer table ([`TimerSettings`]),
//! timer identities ([`TimerType`]), and scheduling ([`TimerManager`],
//! [`TimerFactory`]).

mod factory;
mod manager;
mod types;

pub use factory::TimerFactory;
pub use manager::TimerManager;
pub use types::{TimerSettings, TimerType};
