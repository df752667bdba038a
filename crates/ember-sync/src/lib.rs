//! Chat synchronization and thread reconstruction.
//!
//! An [`Engine`] owns one [`Session`] per open conversation. Sessions merge
//! paginated history with live polling, rebuild reply threads on demand and
//! keep the viewport anchored while content arrives.

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod poll;
pub mod profiles;
pub mod scroll;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod thread;
pub mod turn;
pub mod unlock;

pub use config::SyncConfig;
pub use engine::Engine;
pub use error::SyncError;
pub use session::Session;
pub use thread::{Addressing, Reply, ReplyAuthor, Thread, ThreadRoot};
pub use unlock::{MediaAccess, RewardGate, UnlockKey, UnlockRegistry};
