//! Infrastructure: errors, store traits, in-memory stores, retry and
//! shutdown plumbing.

mod error;
pub mod memory;
pub mod retry;
pub mod shutdown;
pub mod traits;

pub use error::{Result, TollError};
pub use memory::{
    MemoryAnchorStore, MemoryCardStore, MemoryChainStore, MemoryDecisionStore,
    MemoryHealingStore, MemoryNonceLedger, MemoryReaderStore, MemoryViolationLog,
};
pub use retry::BackoffConfig;
pub use shutdown::{shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal};
pub use traits::{
    AnchorStore, CardStore, ChainStore, DecisionStore, HealingStore, NonceLedger, ReaderStore,
    ViolationLog,
};
