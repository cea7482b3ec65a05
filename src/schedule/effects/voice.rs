use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{flag, number, require_object, AudioEffect};
use crate::audio::{dsp, AudioStream};

/// Dialogue clean-up: optional spectral denoise, pre-emphasis, optional
/// gate, then peak normalisation.
///
/// Parameters: `pre_emphasis` (0..1, default 0.97), `noise_reduction`
/// (bool), `noise_reduction_strength` (0..1, default 0.5), `noise_gate`
/// (0..1, default 0), `target_peak` (0.1..1, default 0.95).
pub struct VoiceEnhancement;

struct Params {
    pre_emphasis: f32,
    noise_reduction: bool,
    strength: f32,
    gate: f32,
    target_peak: f32,
}

impl Params {
    fn parse(params: &Value) -> Result<Self> {
        require_object(params)?;
        Ok(Self {
            pre_emphasis: number(params, "pre_emphasis", 0.97, 0.0, 1.0)?,
            noise_reduction: flag(params, "noise_reduction", false)?,
            strength: number(params, "noise_reduction_strength", 0.5, 0.0, 1.0)?,
            gate: number(params, "noise_gate", 0.0, 0.0, 1.0)?,
            target_peak: number(params, "target_peak", 0.95, 0.1, 1.0)?,
        })
    }
}

#[async_trait]
impl AudioEffect for VoiceEnhancement {
    fn name(&self) -> &str {
        "voice_enhancement"
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        Params::parse(params).map(|_| ())
    }

    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream> {
        let p = Params::parse(params)?;
        tokio::task::spawn_blocking(move || {
            let stream = stream.map_channels(|channel, _| {
                if p.noise_reduction {
                    *channel = dsp::spectral_noise_reduction(channel, 2048, 0.75, p.strength);
                }
                *channel = dsp::pre_emphasis(channel, p.pre_emphasis);
                if p.gate > 0.0 {
                    dsp::noise_gate(channel, p.gate);
                }
            });

            let peak = stream.peak();
            if peak <= f32::EPSILON {
                return stream;
            }
            let gain = p.target_peak / peak;
            stream.map_channels(move |channel, _| channel.iter_mut().for_each(|s| *s *= gain))
        })
        .await
        .map_err(Into::into)
    }
}
