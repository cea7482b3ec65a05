use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::audio::{AudioStream, AudioTools};

pub mod dynamics;
pub mod eq;
pub mod music;
pub mod sfx;
pub mod voice;

pub use dynamics::Compression;
pub use eq::EqAdjustment;
pub use music::BackgroundMusicMix;
pub use sfx::SoundEffects;
pub use voice::VoiceEnhancement;

/// A named transformation of an audio stream.
///
/// `validate_params` runs at submission time so bad parameters are rejected
/// before a job exists; `apply` runs on a worker.
#[async_trait]
pub trait AudioEffect: Send + Sync {
    fn name(&self) -> &str;
    fn validate_params(&self, params: &Value) -> Result<()>;
    async fn apply(&self, stream: AudioStream, params: &Value) -> Result<AudioStream>;
}

/// The set of recognised effect names and their implementations.
#[derive(Default)]
pub struct EffectRegistry {
    effects: HashMap<String, Box<dyn AudioEffect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in effect. `media_root` is where
    /// `background_music_mix` looks up its music files.
    pub fn builtin(media_root: impl Into<PathBuf>, tools: AudioTools) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(VoiceEnhancement));
        registry.register(Box::new(Compression));
        registry.register(Box::new(EqAdjustment));
        registry.register(Box::new(SoundEffects));
        registry.register(Box::new(BackgroundMusicMix::new(media_root, tools)));
        registry
    }

    pub fn register(&mut self, effect: Box<dyn AudioEffect>) {
        let name = effect.name().to_string();
        info!("Registering effect: {}", name);
        self.effects.insert(name, effect);
    }

    pub fn get(&self, name: &str) -> Option<&dyn AudioEffect> {
        self.effects.get(name).map(|e| e.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    /// Sorted, for stable API output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.effects.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Parameters must be a JSON object; `null` is treated as empty.
pub(crate) fn require_object(params: &Value) -> Result<()> {
    match params {
        Value::Object(_) | Value::Null => Ok(()),
        other => Err(anyhow!("parameters must be an object, got {}", other)),
    }
}

/// Optional numeric parameter, checked against `[min, max]`.
pub(crate) fn number(params: &Value, key: &str, default: f32, min: f32, max: f32) -> Result<f32> {
    let value = match params.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| anyhow!("'{}' must be a number", key))? as f32,
    };
    if !(min..=max).contains(&value) {
        return Err(anyhow!("'{}' must be between {} and {}, got {}", key, min, max, value));
    }
    Ok(value)
}

pub(crate) fn flag(params: &Value, key: &str, default: bool) -> Result<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| anyhow!("'{}' must be a boolean", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = EffectRegistry::builtin("/tmp", AudioTools::new("ffmpeg", "/tmp"));
        assert_eq!(
            registry.names(),
            vec![
                "background_music_mix",
                "compression",
                "eq_adjustment",
                "sound_effects",
                "voice_enhancement"
            ]
        );
        assert!(registry.get("reverse").is_none());
    }

    #[test]
    fn test_number_bounds() {
        let params = json!({"ratio": 40.0, "level": "loud"});
        assert_eq!(number(&params, "missing", 4.0, 1.0, 20.0).unwrap(), 4.0);
        assert!(number(&params, "ratio", 4.0, 1.0, 20.0).is_err());
        assert!(number(&params, "level", 0.3, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_params_must_be_object() {
        assert!(require_object(&json!({})).is_ok());
        assert!(require_object(&Value::Null).is_ok());
        assert!(require_object(&json!([1, 2])).is_err());
    }
}
