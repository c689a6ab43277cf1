// src/channels.rs

//! Channel-name builders for the seven pub/sub channel families.

use uuid::Uuid;

pub fn data_channel(source_id: &str) -> String {
    format!("data:{source_id}")
}

pub fn cmd_channel(target: &str) -> String {
    format!("cmd:{target}")
}

pub fn cmd_response_channel(target: &str, request_id: Uuid) -> String {
    format!("cmd:{target}:response:{request_id}")
}

pub const CONFIG_CHANGED_CHANNEL: &str = "config:changed";
pub const STREAM_ENDED_CHANNEL: &str = "stream:ended";
pub const MATRIX_STATE_CHANNEL: &str = "matrix:state";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_channels() {
        assert_eq!(data_channel("weather"), "data:weather");
        assert_eq!(cmd_channel("orchestrator"), "cmd:orchestrator");
        let id = Uuid::nil();
        assert_eq!(
            cmd_response_channel("sensors", id),
            format!("cmd:sensors:response:{id}")
        );
    }
}
