// Domain models

mod node;
mod ring;
mod sample;
mod usage;

pub use node::{Calibration, Node, PollTarget};
pub use ring::RingEntry;
pub use sample::{
    InterfaceCounters, LiveSample, LiveStatus, NetCounters, NodeHealth, TransitionEvent,
    TransitionKind,
};
pub use usage::{LedgerBucket, UsageStatus, UsageSummary};
