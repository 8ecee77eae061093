//! `charroi` - Offline validation queue for the charroi fleet-dispatch client
//!
//! Validations of transport vouchers that cannot reach the server are kept in
//! a durable local queue and submitted in order once connectivity returns.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod queue;
pub mod storage;
pub mod submit;
pub mod sync;
pub mod validation;

pub use config::Config;
pub use connectivity::{
    is_online, sync_on_reconnect, ConnectivityMonitor, ConnectivityProbe, ConnectivityState,
    HttpProbe,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use queue::OfflineQueue;
pub use storage::{Storage, StorageStats};
pub use submit::{HttpSubmitter, ValidationSubmitter};
pub use sync::{AckMode, SyncOptions, SyncReport};
pub use validation::{EntryState, PendingValidation};
