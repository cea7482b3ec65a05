//! Sample-level processing on a single channel of `f32` audio in `[-1, 1]`.

use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::Result;
use rayon::prelude::*;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Scale so the loudest sample hits `target_peak`. Silence is left alone.
pub fn normalize(samples: &mut [f32], target_peak: f32) {
    let max_abs = peak(samples);
    if max_abs <= f32::EPSILON {
        return;
    }
    let gain = target_peak / max_abs;
    samples.par_iter_mut().for_each(|s| *s *= gain);
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.par_iter().map(|s| s.abs()).reduce(|| 0.0, f32::max)
}

/// First-order high-pass `y[n] = x[n] - a * x[n-1]`, lifts consonants in
/// dialogue.
pub fn pre_emphasis(samples: &[f32], coefficient: f32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut emphasized = vec![0.0; samples.len()];
    emphasized[0] = samples[0];
    emphasized
        .par_iter_mut()
        .enumerate()
        .skip(1)
        .for_each(|(i, sample)| {
            *sample = samples[i] - coefficient * samples[i - 1];
        });
    emphasized
}

/// Zero every sample quieter than `threshold`.
pub fn noise_gate(samples: &mut [f32], threshold: f32) {
    samples
        .par_iter_mut()
        .for_each(|s| if s.abs() < threshold { *s = 0.0 });
}

/// Hard-knee compressor: the part of each sample above `threshold` is
/// divided by `ratio`.
pub fn compress(samples: &mut [f32], threshold: f32, ratio: f32) {
    samples.par_iter_mut().for_each(|s| {
        let level = s.abs();
        if level > threshold {
            *s = s.signum() * (threshold + (level - threshold) / ratio);
        }
    });
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Two-band shelving EQ. A one-pole low-pass at `crossover_hz` splits the
/// signal; each band gets its own gain.
pub fn shelving_eq(samples: &mut [f32], sample_rate: u32, crossover_hz: f32, low_gain_db: f32, high_gain_db: f32) {
    let low_gain = db_to_gain(low_gain_db);
    let high_gain = db_to_gain(high_gain_db);
    let dt = 1.0 / sample_rate as f32;
    let rc = 1.0 / (2.0 * PI * crossover_hz);
    let alpha = dt / (rc + dt);

    let mut low = 0.0f32;
    for s in samples.iter_mut() {
        low += alpha * (*s - low);
        let high = *s - low;
        *s = low * low_gain + high * high_gain;
    }
}

/// Feedback delay line.
pub fn echo(samples: &mut [f32], sample_rate: u32, delay_ms: f32, decay: f32) {
    let delay = ((delay_ms / 1000.0) * sample_rate as f32) as usize;
    if delay == 0 {
        return;
    }
    for i in delay..samples.len() {
        samples[i] += samples[i - delay] * decay;
    }
}

/// Soft clipping with `tanh`, normalised so full scale stays full scale.
pub fn distortion(samples: &mut [f32], drive: f32) {
    let norm = drive.tanh();
    if norm <= f32::EPSILON {
        return;
    }
    samples
        .par_iter_mut()
        .for_each(|s| *s = (*s * drive).tanh() / norm);
}

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
}

impl Comb {
    fn new(len: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            feedback,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let out = self.buffer[self.index];
        self.buffer[self.index] = input + out * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

struct AllPass {
    buffer: Vec<f32>,
    index: usize,
}

impl AllPass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        let out = delayed - input;
        self.buffer[self.index] = input + delayed * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

/// Schroeder reverb: four parallel combs into two series all-passes.
///
/// # Arguments
/// * `room_size` - 0..1, scales comb feedback
/// * `wet` - 0..1 dry/wet balance
pub fn reverb(samples: &mut [f32], sample_rate: u32, room_size: f32, wet: f32) {
    let scale = sample_rate as f32 / 44_100.0;
    let feedback = 0.7 + 0.28 * room_size.clamp(0.0, 1.0);
    let mut combs: Vec<Comb> = [1116, 1188, 1277, 1356]
        .iter()
        .map(|&len| Comb::new((len as f32 * scale) as usize, feedback))
        .collect();
    let mut allpasses: Vec<AllPass> = [556, 441]
        .iter()
        .map(|&len| AllPass::new((len as f32 * scale) as usize))
        .collect();

    let wet = wet.clamp(0.0, 1.0);
    for s in samples.iter_mut() {
        let mut acc = combs.iter_mut().map(|c| c.process(*s)).sum::<f32>() / combs.len() as f32;
        for ap in allpasses.iter_mut() {
            acc = ap.process(acc);
        }
        *s = *s * (1.0 - wet) + acc * wet;
    }
}

/// Add `overlay * level` onto `base`, looping the overlay when it is
/// shorter.
pub fn mix_looped(base: &mut [f32], overlay: &[f32], level: f32) {
    if overlay.is_empty() {
        return;
    }
    base.par_iter_mut()
        .enumerate()
        .for_each(|(i, s)| *s += overlay[i % overlay.len()] * level);
}

pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )?;

    let mut resampled = resampler.process(&[samples.to_vec()], None)?;
    Ok(resampled.pop().unwrap_or_default())
}

/// Wiener-style spectral noise reduction. The noise floor is estimated from
/// the first frames of the signal.
///
/// # Arguments
/// * `frame_size` - FFT size, a power of two such as 1024 or 2048
/// * `overlap` - frame overlap, usually 0.5 or 0.75
/// * `strength` - 0..1, how hard bins near the noise floor are pulled down
pub fn spectral_noise_reduction(samples: &[f32], frame_size: usize, overlap: f32, strength: f32) -> Vec<f32> {
    if samples.len() < frame_size || frame_size < 2 {
        return samples.to_vec();
    }
    let step_size = ((frame_size as f32 * (1.0 - overlap)) as usize).max(1);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(frame_size);
    let ifft = planner.plan_fft_inverse(frame_size);

    let frames: Vec<&[f32]> = samples.windows(frame_size).step_by(step_size).collect();
    let noise_power = estimate_noise_power(&frames, &fft);

    let processed: Vec<Vec<Complex<f32>>> = frames
        .par_iter()
        .map(|frame| {
            let mut spectrum = windowed(frame);
            fft.process(&mut spectrum);
            for (bin, noise) in spectrum.iter_mut().zip(noise_power.iter()) {
                let snr = bin.norm_sqr() / (noise + 1e-10);
                let gain = 1.0 - (strength / (snr + 1.0)).min(1.0);
                *bin *= gain.sqrt();
            }
            ifft.process(&mut spectrum);
            spectrum
        })
        .collect();

    // overlap-add, normalised by the summed window weight
    let mut output = vec![0.0f32; samples.len()];
    let mut weight = vec![0.0f32; samples.len()];
    for (i, frame) in processed.iter().enumerate() {
        let start = i * step_size;
        for (j, value) in frame.iter().enumerate() {
            if let Some(out) = output.get_mut(start + j) {
                *out += value.re / frame_size as f32;
                weight[start + j] += hann_window(j, frame_size);
            }
        }
    }
    output
        .iter_mut()
        .zip(weight.iter())
        .for_each(|(s, &w)| if w > 1e-3 { *s /= w });

    let out_peak = peak(&output);
    let in_peak = peak(samples);
    if out_peak > f32::EPSILON {
        let gain = in_peak / out_peak;
        output.iter_mut().for_each(|s| *s *= gain);
    }
    output
}

fn windowed(frame: &[f32]) -> Vec<Complex<f32>> {
    frame
        .iter()
        .enumerate()
        .map(|(i, &s)| Complex::new(s * hann_window(i, frame.len()), 0.0))
        .collect()
}

fn estimate_noise_power(frames: &[&[f32]], fft: &Arc<dyn Fft<f32>>) -> Vec<f32> {
    let frame_size = fft.len();
    let mut noise_power = vec![0.0; frame_size];
    let num_frames = frames.len().min(20);
    if num_frames == 0 {
        return noise_power;
    }

    for frame in frames.iter().take(num_frames) {
        let mut spectrum = windowed(frame);
        fft.process(&mut spectrum);
        for (acc, bin) in noise_power.iter_mut().zip(spectrum.iter()) {
            *acc += bin.norm_sqr() / num_frames as f32;
        }
    }

    smooth(&noise_power, 7)
}

fn hann_window(i: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * PI * i as f32 / (size - 1) as f32).cos())
}

fn smooth(signal: &[f32], window_size: usize) -> Vec<f32> {
    let half = window_size / 2;
    (0..signal.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(signal.len());
            signal[start..end].iter().sum::<f32>() / (end - start) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 2.0 * PI * 440.0 / 8_000.0).sin() * amplitude)
            .collect()
    }

    #[test]
    fn test_normalize_hits_target_peak() {
        let mut samples = sine(800, 0.25);
        normalize(&mut samples, 0.9);
        assert!((peak(&samples) - 0.9).abs() < 1e-4);

        let mut silence = vec![0.0; 16];
        normalize(&mut silence, 0.9);
        assert!(silence.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_pre_emphasis_handles_empty_input() {
        assert!(pre_emphasis(&[], 0.97).is_empty());
        assert_eq!(pre_emphasis(&[1.0, 1.0], 0.5), vec![1.0, 0.5]);
    }

    #[test]
    fn test_compress_reduces_loud_samples_only() {
        let mut samples = vec![0.2, 0.9, -0.9];
        compress(&mut samples, 0.5, 4.0);
        assert_eq!(samples[0], 0.2);
        assert!((samples[1] - 0.6).abs() < 1e-6);
        assert!((samples[2] + 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_echo_adds_delayed_copy() {
        let mut samples = vec![0.0; 10];
        samples[0] = 1.0;
        echo(&mut samples, 1_000, 3.0, 0.5);
        assert_eq!(samples[3], 0.5);
        assert_eq!(samples[6], 0.25);
    }

    #[test]
    fn test_distortion_stays_in_range() {
        let mut samples = sine(800, 1.0);
        distortion(&mut samples, 5.0);
        assert!(peak(&samples) <= 1.0 + 1e-5);
    }

    #[test]
    fn test_mix_loops_short_overlay() {
        let mut base = vec![0.0; 5];
        mix_looped(&mut base, &[1.0, 2.0], 0.5);
        assert_eq!(base, vec![0.5, 1.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_noise_reduction_short_input_is_passthrough() {
        let samples = sine(100, 0.5);
        assert_eq!(spectral_noise_reduction(&samples, 1024, 0.75, 0.5), samples);
    }

    #[test]
    fn test_noise_reduction_keeps_length() {
        let samples = sine(8_000, 0.5);
        let out = spectral_noise_reduction(&samples, 1024, 0.75, 0.5);
        assert_eq!(out.len(), samples.len());
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_resample_changes_length() {
        let samples = sine(8_000, 0.5);
        let out = resample(&samples, 8_000, 16_000).unwrap();
        assert!(out.len() > samples.len());
    }
}
