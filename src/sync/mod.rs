pub mod cross_tab;

pub use cross_tab::{CrossTabSync, SyncOutcome};
