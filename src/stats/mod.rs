//! Activity counters for the monitor and the peer link.

pub mod counters;

pub use counters::{
    create_shared_stats, create_shared_stats_with_persistence, MonitorStats, SharedStats,
    StatsSnapshot,
};
