// src/state.rs

//! Shared handler state: the broker handle every route dispatches through,
//! and the HLS output directory the camera worker writes into.

use std::path::PathBuf;
use std::sync::Arc;

use sense_broker::Broker;

#[derive(Clone)]
pub struct GatewayState {
    pub broker: Arc<dyn Broker>,
    pub hls_dir: PathBuf,
}

impl GatewayState {
    pub fn new(broker: Arc<dyn Broker>, hls_dir: impl Into<PathBuf>) -> Self {
        Self {
            broker,
            hls_dir: hls_dir.into(),
        }
    }
}
