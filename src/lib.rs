#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod bucket_store;

pub mod capacity;

mod error;

pub mod funnel;

pub mod hasher;

pub mod robin_hood;

mod stats;

#[cfg(test)]
mod proptests;

pub use capacity::CapacityPlan;
pub use error::Error;
pub use error::Result;
pub use funnel::Funnel;
pub use funnel::FunnelConfig;
pub use funnel::LookupCallback;
#[cfg(any(feature = "std", feature = "foldhash"))]
pub use hasher::DefaultKeyHasher;
#[cfg(feature = "foldhash")]
pub use hasher::FoldKeyHasher;
pub use hasher::KeyHasher;
#[cfg(feature = "std")]
pub use hasher::StdKeyHasher;
pub use robin_hood::RobinHoodTable;
pub use stats::PROBE_STATS_SIZE;
pub use stats::ProbeStats;
