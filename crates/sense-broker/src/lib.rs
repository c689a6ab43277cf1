// src/lib.rs

//! The broker contract: key-space layout, pub/sub channel names, wire
//! types, and the `Broker` trait every Sense Pulse process talks to,
//! whether that's a live Redis deployment or the in-memory fake used in
//! every test in this workspace.

pub mod channels;
pub mod client;
pub mod errors;
pub mod fake;
pub mod keys;
pub mod model;
pub mod rpc;
pub mod subscription;

pub use client::{Broker, RedisBroker, connect_with_backoff};
pub use errors::{Result, SenseError};
pub use fake::FakeBroker;
pub use model::*;
pub use subscription::Subscription;
