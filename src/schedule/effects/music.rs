use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::{number, require_object, AudioEffect};
use crate::audio::{dsp, AudioStream, AudioTools};

/// Lays a music bed under the stream. `music_file` is a path relative to the
/// media root; the music loops if shorter than the stream and is resampled
/// to match it. `music_level` (0..1, default 0.3).
pub struct BackgroundMusicMix {
    media_root: PathBuf,
    tools: AudioTools,
}

impl BackgroundMusicMix {
    pub fn new(media_root: impl Into<PathBuf>, tools: AudioTools) -> Self {
        Self {
            media_root: media_root.into(),
            tools,
        }
    }

    fn parse(&self, params: &Value) -> Result<(PathBuf, f32)> {
        require_object(params)?;
        let file = params
            .get("music_file")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("'music_file' is required"))?;

        let relative = Path::new(file);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if file.is_empty() || escapes {
            return Err(anyhow!("'music_file' must be a relative path inside the media directory"));
        }

        let level = number(params, "music_level", 0.3, 0.0, 1.0)?;
        Ok((self.media_root.join(relative), level))
    }
}

#[async_trait]
impl AudioEffect for BackgroundMusicMix {
    fn name(&self) -> &str {
        "background_music_mix"
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        self.parse(params).map(|_| ())
    }

    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream> {
        let (path, level) = self.parse(params)?;
        if !path.exists() {
            return Err(anyhow!("music file {:?} not found", path));
        }
        let tools = self.tools.clone();

        tokio::task::spawn_blocking(move || -> Result<AudioStream> {
            let music = tools.load(&path)?;
            let music_channels = music
                .channels
                .iter()
                .map(|c| dsp::resample(c, music.sample_rate, stream.sample_rate))
                .collect::<Result<Vec<_>>>()?;
            if music_channels.is_empty() {
                return Ok(stream);
            }

            let mut stream = stream;
            for (i, channel) in stream.channels.iter_mut().enumerate() {
                dsp::mix_looped(channel, &music_channels[i % music_channels.len()], level);
            }
            Ok(stream.limit_peak(1.0))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_sine_wav;
    use serde_json::json;

    fn effect(root: &Path) -> BackgroundMusicMix {
        BackgroundMusicMix::new(root, AudioTools::new("ffmpeg", root.join("tmp")))
    }

    #[test]
    fn test_paths_outside_media_root_are_rejected() {
        let fx = effect(Path::new("/srv/media"));
        assert!(fx.validate_params(&json!({"music_file": "../secret.wav"})).is_err());
        assert!(fx.validate_params(&json!({"music_file": "/etc/passwd"})).is_err());
        assert!(fx.validate_params(&json!({})).is_err());
        assert!(fx.validate_params(&json!({"music_file": "beds/rain.wav"})).is_ok());
    }

    #[tokio::test]
    async fn test_mixes_music_under_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_sine_wav(dir.path(), "bed.wav");
        let stream = AudioStream::new(8_000, vec![vec![0.0; 16_000], vec![0.0; 16_000]]);

        let out = effect(dir.path())
            .apply(stream, &json!({"music_file": "bed.wav", "music_level": 0.5}))
            .await
            .unwrap();
        assert_eq!(out.frames(), 16_000);
        assert!((out.peak() - 0.25).abs() < 0.01);
        // looped into the second half
        assert!(out.channels[1][12_000..].iter().any(|s| s.abs() > 0.1));
    }

    #[tokio::test]
    async fn test_missing_music_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stream = AudioStream::new(8_000, vec![vec![0.0; 10]]);
        assert!(effect(dir.path())
            .apply(stream, &json!({"music_file": "nope.wav"}))
            .await
            .is_err());
    }
}
