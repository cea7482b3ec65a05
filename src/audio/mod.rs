use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::schedule::types::OutputFormat;

pub mod dsp;

/// Decoded audio, one `Vec` per channel, samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioStream {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .map(|c| dsp::peak(c))
            .fold(0.0, f32::max)
    }

    /// Run `f` over every channel in parallel.
    pub fn map_channels<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Vec<f32>, u32) + Send + Sync,
    {
        let sample_rate = self.sample_rate;
        self.channels
            .par_iter_mut()
            .for_each(|channel| f(channel, sample_rate));
        self
    }

    /// Scale every channel by the same factor so the loudest sample is at
    /// most `ceiling`.
    pub fn limit_peak(self, ceiling: f32) -> Self {
        let peak = self.peak();
        if peak <= ceiling || peak <= f32::EPSILON {
            return self;
        }
        let gain = ceiling / peak;
        self.map_channels(move |c, _| c.iter_mut().for_each(|s| *s *= gain))
    }

    fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for channel in &self.channels {
                out.push(channel.get(i).copied().unwrap_or(0.0));
            }
        }
        out
    }
}

/// Header facts about a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: f64,
}

/// Decoding and encoding on disk. Formats other than WAV go through ffmpeg.
#[derive(Debug, Clone)]
pub struct AudioTools {
    ffmpeg_path: String,
    temp_dir: PathBuf,
}

impl AudioTools {
    pub fn new(ffmpeg_path: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Decode any supported file into an [`AudioStream`].
    pub fn load(&self, path: &Path) -> Result<AudioStream> {
        if is_wav(path) {
            return read_wav(path);
        }

        let wav_path = self.temp_path("wav");
        self.ffmpeg(&[
            OsStr::new("-y"),
            OsStr::new("-i"),
            path.as_os_str(),
            OsStr::new("-acodec"),
            OsStr::new("pcm_s16le"),
            wav_path.as_os_str(),
        ])?;
        let stream = read_wav(&wav_path);
        remove_temp(&wav_path);
        stream
    }

    /// Write `stream` to `dest` in `format`.
    pub fn encode(&self, stream: &AudioStream, format: OutputFormat, dest: &Path) -> Result<()> {
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }

        if format == OutputFormat::Wav {
            return write_wav(stream, dest);
        }

        let wav_path = self.temp_path("wav");
        write_wav(stream, &wav_path)?;

        let mut args = vec![OsStr::new("-y"), OsStr::new("-i"), wav_path.as_os_str()];
        args.extend(format.ffmpeg_codec_args().iter().map(OsStr::new));
        args.push(dest.as_os_str());
        let result = self.ffmpeg(&args);
        remove_temp(&wav_path);
        result
    }

    fn temp_path(&self, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}.{}", Uuid::new_v4(), extension))
    }

    fn ffmpeg(&self, args: &[&OsStr]) -> Result<()> {
        fs::create_dir_all(&self.temp_dir)?;
        debug!("Running {} {:?}", self.ffmpeg_path, args);

        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .output()
            .map_err(|e| anyhow!("Failed to execute ffmpeg: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or_default();
            return Err(anyhow!("ffmpeg exited with {}: {}", output.status, last_line));
        }
        Ok(())
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to remove temporary file {:?}: {}", path, e);
    }
}

pub fn wav_info(path: &Path) -> Result<WavInfo> {
    let reader = WavReader::open(path).map_err(|e| anyhow!("Failed to read WAV header: {}", e))?;
    let spec = reader.spec();
    let frames = reader.duration();
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration: if spec.sample_rate == 0 {
            0.0
        } else {
            frames as f64 / spec.sample_rate as f64
        },
    })
}

/// Read a WAV file into planar `f32` channels. Integer samples of any bit
/// depth and 32-bit float are accepted.
pub fn read_wav(path: &Path) -> Result<AudioStream> {
    let mut reader = WavReader::open(path).map_err(|e| anyhow!("Failed to read WAV file: {}", e))?;
    let spec = reader.spec();
    let num_channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
    for frame in interleaved.chunks(num_channels) {
        for (channel, &sample) in channels.iter_mut().zip(frame.iter()) {
            channel.push(sample);
        }
    }

    info!(
        "Loaded {:?}: {} Hz, {} channel(s), {} frames",
        path,
        spec.sample_rate,
        num_channels,
        channels[0].len()
    );
    Ok(AudioStream::new(spec.sample_rate, channels))
}

/// Write 16-bit PCM, clamping out-of-range samples.
pub fn write_wav(stream: &AudioStream, path: &Path) -> Result<()> {
    let spec = WavSpec {
        channels: stream.channels.len().max(1) as u16,
        sample_rate: stream.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in stream.interleaved() {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
