//! # Minder Core
//!
//! Shared foundation for the Minder workspace: the error taxonomy, the TOML
//! configuration system, the persisted record types, and the collaborator
//! traits (`ReminderStore`, `Delivery`) that decouple the scheduling core
//! from storage and message transport.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MinderConfig;
pub use error::{MinderError, Result};
pub use traits::{Delivery, ReminderStore};
pub use types::{Note, Owner, Reminder, Task, TaskStatus};
