use colored::Colorize;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::code;
use crate::constants::PI;
use crate::error::{Error, Result};
use crate::settings::Settings;

const FINE_SEARCH_STEP_HZ: f64 = 25.0;
const FINE_WINDOW_MS: usize = 40;

/// Cold-start search outcome for one PRN. `carr_freq_hz` is zero when the
/// peak metric stayed below the detection threshold.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub prn: u8,
    pub carr_freq_hz: f64,
    pub code_phase: usize,
    pub peak_metric: f64,
}

/// Correlation envelope over the (Doppler, code lag) plane, accumulated
/// over the non-coherent intervals and normalized by `N_nc * Ns`.
pub struct Detector {
    pub freq_bins_hz: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl Detector {
    pub fn peak(&self) -> (usize, usize, f64) {
        let mut best = (0usize, 0usize, 0.0f64);
        for (i, row) in self.values.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v > best.2 {
                    best = (i, j, v);
                }
            }
        }
        best
    }
}

/// FFT-based parallel code-phase search with Doppler applied by circularly
/// shifting the data spectrum against a conjugated code template. Transform
/// plans are built once for the fixed block size and shared across PRNs.
pub struct AcquisitionEngine {
    fs: f64,
    if_hz: f64,
    samples_per_code: usize,
    coherent_int: usize,
    non_coh_time: usize,
    threshold: f64,
    parallel_bins: bool,
    sat_list: Vec<u8>,
    code_freq_basis: f64,

    fft_len: usize,
    fft_fwd: Arc<dyn Fft<f64>>,
    fft_inv: Arc<dyn Fft<f64>>,
    freq_bins_hz: Vec<f64>,
    initial_shift: usize,
}

impl AcquisitionEngine {
    pub fn new(settings: &Settings) -> Self {
        let samples_per_code = settings.samples_per_code();
        let coherent_int = settings.acq_coherent_int.max(1);
        let fft_len = 2 * coherent_int * samples_per_code;

        let mut planner = FftPlanner::new();
        let fft_fwd = planner.plan_fft_forward(fft_len);
        let fft_inv = planner.plan_fft_inverse(fft_len);

        // FFT-grid frequencies restricted to the search band, reordered so
        // the table ascends through DC.
        let df = settings.sampling_freq_hz / fft_len as f64;
        let band = settings.acq_search_band_hz;
        let mut freqs = Vec::with_capacity(fft_len);
        for k in 0..fft_len {
            let f = if k < fft_len.div_ceil(2) {
                k as f64 * df
            } else {
                (k as f64 - fft_len as f64) * df
            };
            freqs.push(f);
        }
        let num_bins = freqs.iter().filter(|f| f.abs() <= band).count();
        let initial_shift = (num_bins - 1) / 2;
        let mut freq_bins_hz = Vec::with_capacity(num_bins);
        for i in 0..num_bins {
            let idx = (i + fft_len - initial_shift) % fft_len;
            freq_bins_hz.push(freqs[idx]);
        }

        Self {
            fs: settings.sampling_freq_hz,
            if_hz: settings.if_freq_hz,
            samples_per_code,
            coherent_int,
            non_coh_time: settings.acq_non_coh_time,
            threshold: settings.acq_threshold,
            parallel_bins: settings.acq_parallel_bins,
            sat_list: settings.acq_satellite_list.clone(),
            code_freq_basis: settings.code_freq_basis_hz,
            fft_len,
            fft_fwd,
            fft_inv,
            freq_bins_hz,
            initial_shift,
        }
    }

    /// Samples the engine needs up front: the non-coherent detector blocks
    /// plus the worst-case fine-frequency window behind the coarse peak.
    pub fn required_samples(&self) -> usize {
        let detector = 2 * self.coherent_int * self.non_coh_time + 2;
        let fine = 2 * self.coherent_int + FINE_WINDOW_MS;
        detector.max(fine) * self.samples_per_code
    }

    /// Searches every PRN on the satellite list. Rows for undetected PRNs
    /// keep their peak metric with a zero carrier frequency.
    pub fn acquire(&self, signal: &[Complex64]) -> Result<Vec<AcquisitionResult>> {
        let needed = self.required_samples();
        if signal.len() < needed {
            return Err(Error::InsufficientData {
                needed,
                got: signal.len(),
            });
        }

        let conditioned = self.condition(signal);
        let sigma = self.noise_sigma(&conditioned);

        let mut results: Vec<AcquisitionResult> = self
            .sat_list
            .par_iter()
            .map(|&prn| self.acquire_prn(&conditioned, prn, sigma))
            .collect::<Result<Vec<_>>>()?;
        results.sort_by_key(|r| r.prn);
        Ok(results)
    }

    fn acquire_prn(
        &self,
        conditioned: &[Complex64],
        prn: u8,
        sigma: f64,
    ) -> Result<AcquisitionResult> {
        let detector = self.detector_matrix(conditioned, prn)?;
        let (bin, code_phase, peak) = detector.peak();
        let peak_metric = peak * self.samples_per_code as f64 / sigma;

        let mut result = AcquisitionResult {
            prn,
            carr_freq_hz: 0.0,
            code_phase,
            peak_metric,
        };

        if peak_metric > self.threshold {
            let coarse_freq = detector.freq_bins_hz[bin];
            let fine_freq = self.fine_doppler(conditioned, prn, code_phase, coarse_freq)?;
            result.carr_freq_hz = self.if_hz + fine_freq;
            // keep a zero-Doppler, zero-IF hit distinguishable from "none"
            if result.carr_freq_hz == 0.0 {
                result.carr_freq_hz = 1.0;
            }
            log::info!(
                " prn {} -- freq: {:7.1} Hz code_phase: {:6} metric: {}",
                format!("{:2}", prn).yellow(),
                result.carr_freq_hz,
                result.code_phase,
                format!("{:.2}", peak_metric).green(),
            );
        } else {
            log::debug!("{}", Error::AcquisitionFailed(prn));
        }
        Ok(result)
    }

    /// DC removal per rail, scaling of the peak magnitude to 0.5, and
    /// mixing to baseband when the capture sits at an IF.
    fn condition(&self, signal: &[Complex64]) -> Vec<Complex64> {
        let n = signal.len() as f64;
        let mean_re = signal.iter().map(|s| s.re).sum::<f64>() / n;
        let mean_im = signal.iter().map(|s| s.im).sum::<f64>() / n;

        let mut out: Vec<Complex64> = signal
            .iter()
            .map(|s| Complex64::new(s.re - mean_re, s.im - mean_im))
            .collect();

        let peak = out.iter().map(|s| s.norm()).fold(0.0f64, f64::max);
        if peak > 0.0 {
            let scale = 0.5 / peak;
            for s in out.iter_mut() {
                *s *= scale;
            }
        }

        if self.if_hz != 0.0 {
            let w = 2.0 * PI * self.if_hz / self.fs;
            for (k, s) in out.iter_mut().enumerate() {
                let phase = w * k as f64;
                *s *= Complex64::new(phase.cos(), -phase.sin());
            }
        }
        out
    }

    /// Noise scale of the GLRT statistic: sample deviation of one code
    /// period of the conditioned input, scaled by the correlation length.
    fn noise_sigma(&self, conditioned: &[Complex64]) -> f64 {
        let spc = self.samples_per_code;
        let block = &conditioned[..spc];
        let mean = block.iter().sum::<Complex64>() / spc as f64;
        let var = block.iter().map(|s| (s - mean).norm_sqr()).sum::<f64>() / (spc as f64 - 1.0);
        (var * spc as f64).sqrt()
    }

    /// Accumulates the correlation envelope over `N_nc` non-overlapping
    /// blocks of `2 * M` code periods for every Doppler bin.
    pub fn detector_matrix(&self, conditioned: &[Complex64], prn: u8) -> Result<Detector> {
        let n = self.fft_len;
        let needed = n * self.non_coh_time;
        if conditioned.len() < needed {
            return Err(Error::InsufficientData {
                needed,
                got: conditioned.len(),
            });
        }

        // zero-padded template spectrum, conjugated once per PRN
        let table = code::make_ca_table(prn, self.fs, self.code_freq_basis);
        let mut template: Vec<Complex64> = Vec::with_capacity(n);
        for _ in 0..self.coherent_int {
            template.extend(table.iter().map(|&c| Complex64::new(c, 0.0)));
        }
        template.resize(n, Complex64::default());
        let mut scratch = vec![Complex64::default(); self.fft_fwd.get_inplace_scratch_len()];
        self.fft_fwd.process_with_scratch(&mut template, &mut scratch);
        for t in template.iter_mut() {
            *t = t.conj();
        }

        // one forward transform per non-coherent block, reused by all bins
        let mut block_fds: Vec<Vec<Complex64>> = Vec::with_capacity(self.non_coh_time);
        for b in 0..self.non_coh_time {
            let mut block = conditioned[b * n..(b + 1) * n].to_vec();
            self.fft_fwd.process_with_scratch(&mut block, &mut scratch);
            block_fds.push(block);
        }

        let num_bins = self.freq_bins_hz.len();
        let row_for_bin = |bin: usize| -> Vec<f64> {
            let shift = self.initial_shift as isize - bin as isize;
            let mut row = vec![0.0f64; n];
            let mut buf = vec![Complex64::default(); n];
            let mut scratch =
                vec![Complex64::default(); self.fft_inv.get_inplace_scratch_len()];
            for block_fd in &block_fds {
                for (m, slot) in buf.iter_mut().enumerate() {
                    let src = (m as isize - shift).rem_euclid(n as isize) as usize;
                    *slot = block_fd[src] * template[m];
                }
                self.fft_inv.process_with_scratch(&mut buf, &mut scratch);
                for (acc, v) in row.iter_mut().zip(buf.iter()) {
                    *acc += v.norm() / n as f64;
                }
            }
            row
        };

        let mut values: Vec<Vec<f64>> = if self.parallel_bins {
            (0..num_bins).into_par_iter().map(row_for_bin).collect()
        } else {
            (0..num_bins).map(row_for_bin).collect()
        };

        let norm = (self.non_coh_time * self.samples_per_code) as f64;
        for row in values.iter_mut() {
            for v in row.iter_mut() {
                *v /= norm;
            }
        }

        Ok(Detector {
            freq_bins_hz: self.freq_bins_hz.clone(),
            values,
        })
    }

    /// Refines the coarse Doppler over a 40 ms window aligned to the coarse
    /// code phase: the code is wiped off, 1 ms coherent sums are formed, and
    /// every navigation-bit-edge alignment of a 20 ms integration is tried.
    fn fine_doppler(
        &self,
        conditioned: &[Complex64],
        prn: u8,
        code_phase: usize,
        coarse_freq: f64,
    ) -> Result<f64> {
        let spc = self.samples_per_code;
        let window = FINE_WINDOW_MS * spc;
        if conditioned.len() < code_phase + window {
            return Err(Error::InsufficientData {
                needed: code_phase + window,
                got: conditioned.len(),
            });
        }
        let sig = &conditioned[code_phase..code_phase + window];

        let ts = 1.0 / self.fs;
        let tc = 1.0 / self.code_freq_basis;
        let ca = code::ca_code(prn);
        let code_40ms: Vec<f64> = (0..window)
            .map(|k| {
                let idx = (ts * k as f64 / tc).floor() as usize % ca.len();
                ca[idx] as f64
            })
            .collect();

        let coarse_step = self.fs / self.fft_len as f64;
        let num_fine_bins = (coarse_step / FINE_SEARCH_STEP_HZ).round() as usize + 1;

        let mut best = (0.0f64, coarse_freq);
        for k in 0..num_fine_bins {
            let freq = coarse_freq - k as f64 * FINE_SEARCH_STEP_HZ;
            let w = 2.0 * PI * freq * ts;

            let mut sum_per_code = [Complex64::default(); FINE_WINDOW_MS];
            for (n, (s, c)) in sig.iter().zip(code_40ms.iter()).enumerate() {
                let phase = w * n as f64;
                let carrier = Complex64::new(phase.cos(), -phase.sin());
                sum_per_code[n / spc] += s * c * carrier;
            }

            let mut max_power = 0.0f64;
            for edge in 0..FINE_WINDOW_MS / 2 {
                let power: Complex64 = sum_per_code[edge..edge + FINE_WINDOW_MS / 2].iter().sum();
                max_power = max_power.max(power.norm());
            }
            if max_power > best.0 {
                best = (max_power, freq);
            }
        }
        Ok(best.1)
    }
}
