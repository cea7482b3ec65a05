use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{number, require_object, AudioEffect};
use crate::audio::{dsp, AudioStream};

/// Hard-knee compressor. `threshold` (0.01..1, default 0.5), `ratio`
/// (1..20, default 4), `makeup_gain_db` (-24..24, default 0).
pub struct Compression;

fn parse(params: &Value) -> Result<(f32, f32, f32)> {
    require_object(params)?;
    Ok((
        number(params, "threshold", 0.5, 0.01, 1.0)?,
        number(params, "ratio", 4.0, 1.0, 20.0)?,
        number(params, "makeup_gain_db", 0.0, -24.0, 24.0)?,
    ))
}

#[async_trait]
impl AudioEffect for Compression {
    fn name(&self) -> &str {
        "compression"
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        parse(params).map(|_| ())
    }

    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream> {
        let (threshold, ratio, makeup_db) = parse(params)?;
        let makeup = 10f32.powf(makeup_db / 20.0);
        tokio::task::spawn_blocking(move || {
            stream.map_channels(|channel, _| {
                dsp::compress(channel, threshold, ratio);
                if makeup != 1.0 {
                    channel.iter_mut().for_each(|s| *s *= makeup);
                }
            })
        })
        .await
        .map_err(Into::into)
    }
}
