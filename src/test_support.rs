//! Shared fixtures for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::audio::AudioStream;
use crate::schedule::effects::AudioEffect;
use crate::schedule::types::{EffectChain, NewJob, OutputFormat};

/// Insert an audio file row pointing at `path` and return its id.
pub async fn seed_audio_file(pool: &SqlitePool, path: &Path) -> i64 {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "input.wav".to_string());
    sqlx::query_scalar(
        r#"
        INSERT INTO audio_files
        (filename, original_filename, file_path, file_size, format, uploaded_at)
        VALUES (?, ?, ?, 0, 'wav', '2024-01-01T00:00:00.000000Z')
        RETURNING id
        "#,
    )
    .bind(&filename)
    .bind(&filename)
    .bind(path.to_string_lossy().to_string())
    .fetch_one(pool)
    .await
    .unwrap()
}

pub fn new_job(audio_file_id: i64, effects: EffectChain) -> NewJob {
    NewJob {
        name: "scene one".to_string(),
        description: None,
        audio_file_id,
        project_id: None,
        effects_config: effects,
        output_format: OutputFormat::Wav,
        callback_url: None,
    }
}

/// Write a one-second mono 440 Hz sine to `dir/name`.
pub fn write_sine_wav(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..8_000 {
        let t = i as f32 / 8_000.0;
        let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Effect that passes audio through and counts invocations.
pub struct CountingEffect {
    pub name: &'static str,
    pub calls: Arc<AtomicUsize>,
}

impl CountingEffect {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AudioEffect for CountingEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn validate_params(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, stream: AudioStream, _params: &Value) -> Result<AudioStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }
}

/// Effect that always fails at apply time.
pub struct FailingEffect {
    pub name: &'static str,
    pub message: &'static str,
}

#[async_trait]
impl AudioEffect for FailingEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn validate_params(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, _stream: AudioStream, _params: &Value) -> Result<AudioStream> {
        Err(anyhow!(self.message))
    }
}

/// Effect that sleeps before passing audio through.
pub struct SlowEffect {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl AudioEffect for SlowEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn validate_params(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, stream: AudioStream, _params: &Value) -> Result<AudioStream> {
        tokio::time::sleep(self.delay).await;
        Ok(stream)
    }
}
