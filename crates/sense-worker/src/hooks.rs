// src/hooks.rs

//! Capability traits a concrete worker implements. These replace the
//! subclass-hook pattern of the original design with trait objects: a
//! worker is "a `Source`, plus optionally a `CommandHandler` and a
//! `ConfigChangeListener`", rather than a subclass of a base class.

use async_trait::async_trait;
use sense_broker::{Command, CommandResponse, SensorReading, SourceMetadata};

/// Implemented by every worker. `poll` is the one hook both worker bases
/// call on their own schedule.
#[async_trait]
pub trait Source: Send + Sync {
    fn source_id(&self) -> &str;

    fn metadata(&self) -> SourceMetadata;

    /// Produces this tick's readings. May itself read config or scan-result
    /// scratch keys through the broker handle it was constructed with.
    async fn poll(&self) -> anyhow::Result<Vec<SensorReading>>;
}

/// Implemented by persistent workers that accept commands on `cmd:{source_id}`.
/// An `Err` return is the Rust stand-in for "uncaught exception in the hook":
/// the persistent worker base synthesizes an `error`-status response from it
/// rather than propagating or panicking.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(&self, cmd: &Command) -> anyhow::Result<CommandResponse>;

    /// Invoked once the response to `cmd` has already been published. Default
    /// no-op. Exists for handlers whose reaction to a command must be
    /// observable only after the caller can already see the response — e.g.
    /// the camera worker publishing `stream:ended` and tripping shutdown only
    /// after its `stop` response is on the wire.
    async fn after_response(&self, _cmd: &Command) {}
}

/// Implemented by persistent workers that react to `config:changed`. The
/// default no-op matches every worker that doesn't care about live config.
#[async_trait]
pub trait ConfigChangeListener: Send + Sync {
    async fn on_config_changed(&self, _section: &str) {}
}
