use std::process::Command;

use crate::listener::{ListenerError, Volume, VolumeSource};

pub const DEFAULT_SINK: &str = "@DEFAULT_AUDIO_SINK@";

/// Reads the sink volume through `wpctl get-volume`.
#[derive(Clone, Debug)]
pub struct WpctlVolume {
    program: String,
    sink: String,
}

impl WpctlVolume {
    pub fn new(program: String, sink: String) -> Self {
        Self { program, sink }
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }
}

impl Default for WpctlVolume {
    fn default() -> Self {
        Self::new("wpctl".to_string(), DEFAULT_SINK.to_string())
    }
}

impl VolumeSource for WpctlVolume {
    fn read(&self) -> Result<Volume, ListenerError> {
        let output = Command::new(&self.program)
            .args(["get-volume", &self.sink])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ListenerError::Backend(format!(
                "{} get-volume {} failed with {}: {}",
                self.program,
                self.sink,
                output.status,
                stderr.trim()
            )));
        }

        parse_volume_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `Volume: 0.45` or `Volume: 0.45 [MUTED]`. Muting does not change
/// the reported level. Values above 1.0 (software boost) are clamped.
pub fn parse_volume_output(output: &str) -> Result<Volume, ListenerError> {
    let mut parts = output.split_whitespace();

    match parts.next() {
        Some("Volume:") => {}
        _ => return Err(ListenerError::Parse(format!("unexpected wpctl output: {:?}", output.trim()))),
    }

    let value = parts
        .next()
        .ok_or_else(|| ListenerError::Parse("wpctl output has no volume value".to_string()))?;

    value
        .parse::<f64>()
        .map(Volume::new)
        .map_err(|e| ListenerError::Parse(format!("bad volume {:?}: {}", value, e)))
}
