/// Time-limited admin rights
pub mod admin_grants;
/// Bot commands
pub mod commands;
/// Event routing
pub mod dispatcher;
/// User-facing texts
pub mod views;

pub use admin_grants::AdminGrants;
pub use commands::Command;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherDeps};
