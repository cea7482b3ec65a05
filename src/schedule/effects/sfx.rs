use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::{number, require_object, AudioEffect};
use crate::audio::{dsp, AudioStream};

/// Creative processing applied in list order:
///
/// ```json
/// {"effects": [{"type": "reverb", "room_size": 0.6}, {"type": "echo", "delay_ms": 250}]}
/// ```
pub struct SoundEffects;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Sfx {
    Reverb { room_size: f32, wet: f32 },
    Echo { delay_ms: f32, decay: f32 },
    Distortion { drive: f32 },
}

impl Sfx {
    fn parse(spec: &Value) -> Result<Self> {
        let kind = spec
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("every sound effect needs a string 'type'"))?;
        match kind {
            "reverb" => Ok(Sfx::Reverb {
                room_size: number(spec, "room_size", 0.5, 0.0, 1.0)?,
                wet: number(spec, "wet", 0.3, 0.0, 1.0)?,
            }),
            "echo" => Ok(Sfx::Echo {
                delay_ms: number(spec, "delay_ms", 300.0, 1.0, 5_000.0)?,
                decay: number(spec, "decay", 0.5, 0.0, 0.95)?,
            }),
            "distortion" => Ok(Sfx::Distortion {
                drive: number(spec, "drive", 4.0, 1.0, 50.0)?,
            }),
            other => Err(anyhow!(
                "unknown sound effect type '{}', expected reverb, echo or distortion",
                other
            )),
        }
    }

    fn run(&self, channel: &mut Vec<f32>, sample_rate: u32) {
        match *self {
            Sfx::Reverb { room_size, wet } => dsp::reverb(channel, sample_rate, room_size, wet),
            Sfx::Echo { delay_ms, decay } => dsp::echo(channel, sample_rate, delay_ms, decay),
            Sfx::Distortion { drive } => dsp::distortion(channel, drive),
        }
    }
}

fn parse(params: &Value) -> Result<Vec<Sfx>> {
    require_object(params)?;
    match params.get("effects") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(list)) => list.iter().map(Sfx::parse).collect(),
        Some(_) => Err(anyhow!("'effects' must be a list")),
    }
}

#[async_trait]
impl AudioEffect for SoundEffects {
    fn name(&self) -> &str {
        "sound_effects"
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        parse(params).map(|_| ())
    }

    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream> {
        let chain = parse(params)?;
        if chain.is_empty() {
            return Ok(stream);
        }
        tokio::task::spawn_blocking(move || {
            stream
                .map_channels(|channel, sample_rate| {
                    for sfx in &chain {
                        sfx.run(channel, sample_rate);
                    }
                })
                .limit_peak(1.0)
        })
        .await
        .map_err(Into::into)
    }
}
