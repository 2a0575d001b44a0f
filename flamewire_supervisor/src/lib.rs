//! flamewire_supervisor
//!
//! Outside-world facing orchestration layer for `flamewire_core`.
//!
//! Responsibilities:
//! - own per-miner EMA state
//! - shard state by miner hotkey (deterministic)
//! - convert gateway statistics and live probes into `NodeWindow`s
//! - drive the periodic cycle: collect, score, persist, submit
//!
//! Non-goals:
//! - no scoring policy (lives in core)
//! - no chain or RPC client (injected through `collab`)

pub mod adapter;
pub mod collab;
pub mod config;
pub mod cycle;
pub mod logging;
pub mod pool;
pub mod store;
pub mod supervisor;

pub use adapter::{
    NodeReport,
    CheckStats,
    AdapterError,
    WindowBuilder,
    GatewayWindowBuilder,
    Rejected,
    build_window_batch,
};

pub use collab::{
    CollaboratorError,
    NodeTarget,
    ProbeSample,
    Population,
    Prober,
    Registry,
    WeightSink,
};

pub use config::ValidatorConfig;
pub use cycle::{CycleRunner, CycleError};
pub use logging::init_tracing;
pub use pool::collect_windows;
pub use store::{EmaStore, JsonFileStore, MemoryStore, StoreError};

pub use supervisor::{
    ScoringSupervisor,
    CycleBatch,
    CycleReport,
    EmaSnapshot,
    RestoreStats,
    SkippedNode,
    MinerFailure,
};
