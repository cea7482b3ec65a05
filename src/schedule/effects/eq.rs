use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{number, require_object, AudioEffect};
use crate::audio::{dsp, AudioStream};

pub struct EqAdjustment;

struct Params {
    low_gain_db: f32,
    high_gain_db: f32,
    crossover_hz: f32,
}

impl Params {
    fn parse(params: &Value) -> Result<Self> {
        require_object(params)?;
        Ok(Self {
            low_gain_db: number(params, "low_gain_db", 0.0, -24.0, 24.0)?,
            high_gain_db: number(params, "high_gain_db", 0.0, -24.0, 24.0)?,
            crossover_hz: number(params, "crossover_hz", 1000.0, 20.0, 20_000.0)?,
        })
    }
}

#[async_trait]
impl AudioEffect for EqAdjustment {
    fn name(&self) -> &str {
        "eq_adjustment"
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        Params::parse(params).map(|_| ())
    }

    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream> {
        let p = Params::parse(params)?;
        // keep the crossover below Nyquist for low sample rates
        let crossover = p.crossover_hz.min(stream.sample_rate as f32 * 0.45);
        tokio::task::spawn_blocking(move || {
            stream.map_channels(|channel, sample_rate| {
                dsp::shelving_eq(channel, sample_rate, crossover, p.low_gain_db, p.high_gain_db)
            })
        })
        .await
        .map_err(Into::into)
    }
}
