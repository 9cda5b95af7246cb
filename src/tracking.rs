use colored::Colorize;
use gnss_rs::constellation::Constellation;
use gnss_rs::sv::SV;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::{Channel, ChannelStatus};
use crate::code;
use crate::constants::PI;
use crate::error::{Error, Result};
use crate::recording::IQRecording;
use crate::settings::Settings;

/// Per-channel tracking history, one entry per code period. Buffers are
/// preallocated to the full run length and truncated to the last completed
/// iteration on early exit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackLog {
    pub prn: u8,
    pub status: ChannelStatus,

    /// Sample index of each block start, counted from the skip point.
    pub absolute_sample: Vec<f64>,
    pub code_freq: Vec<f64>,
    pub carr_freq: Vec<f64>,

    pub i_e: Vec<f64>,
    pub i_p: Vec<f64>,
    pub i_l: Vec<f64>,
    pub q_e: Vec<f64>,
    pub q_p: Vec<f64>,
    pub q_l: Vec<f64>,

    pub dll_discr: Vec<f64>,
    pub dll_discr_filt: Vec<f64>,
    pub pll_discr: Vec<f64>,
    pub pll_discr_filt: Vec<f64>,

    pub rem_code_phase: Vec<f64>,
    pub rem_carr_phase: Vec<f64>,

    /// Sparse C/N0 estimates and the 1-based iteration they cover up to.
    pub cno_vsm_value: Vec<f64>,
    pub cno_vsm_index: Vec<usize>,
}

impl TrackLog {
    fn new(prn: u8, ms_to_process: usize) -> Self {
        Self {
            prn,
            status: ChannelStatus::Off,
            absolute_sample: vec![0.0; ms_to_process],
            code_freq: vec![f64::INFINITY; ms_to_process],
            carr_freq: vec![f64::INFINITY; ms_to_process],
            i_e: vec![0.0; ms_to_process],
            i_p: vec![0.0; ms_to_process],
            i_l: vec![0.0; ms_to_process],
            q_e: vec![0.0; ms_to_process],
            q_p: vec![0.0; ms_to_process],
            q_l: vec![0.0; ms_to_process],
            dll_discr: vec![f64::INFINITY; ms_to_process],
            dll_discr_filt: vec![f64::INFINITY; ms_to_process],
            pll_discr: vec![f64::INFINITY; ms_to_process],
            pll_discr_filt: vec![f64::INFINITY; ms_to_process],
            rem_code_phase: vec![f64::INFINITY; ms_to_process],
            rem_carr_phase: vec![f64::INFINITY; ms_to_process],
            cno_vsm_value: vec![],
            cno_vsm_index: vec![],
        }
    }

    fn truncate(&mut self, len: usize) {
        self.absolute_sample.truncate(len);
        self.code_freq.truncate(len);
        self.carr_freq.truncate(len);
        self.i_e.truncate(len);
        self.i_p.truncate(len);
        self.i_l.truncate(len);
        self.q_e.truncate(len);
        self.q_p.truncate(len);
        self.q_l.truncate(len);
        self.dll_discr.truncate(len);
        self.dll_discr_filt.truncate(len);
        self.pll_discr.truncate(len);
        self.pll_discr_filt.truncate(len);
        self.rem_code_phase.truncate(len);
        self.rem_carr_phase.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.i_p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.i_p.is_empty()
    }
}

/// Second-order loop filter coefficients for the given noise bandwidth,
/// damping ratio and gain.
pub fn calc_loop_coef(lbw: f64, zeta: f64, k: f64) -> (f64, f64) {
    let wn = lbw * 8.0 * zeta / (4.0 * zeta * zeta + 1.0);
    (k / (wn * wn), 2.0 * zeta / wn)
}

/// C/N0 by the variance summing method over one VSM interval of prompt
/// accumulations. NaN marks an interval where the moment estimate is not
/// yet reliable, not a loss of lock.
pub fn cno_vsm(i_p: &[f64], q_p: &[f64], acc_time: f64) -> f64 {
    let n = i_p.len() as f64;
    let z: Vec<f64> = i_p
        .iter()
        .zip(q_p.iter())
        .map(|(i, q)| i * i + q * q)
        .collect();
    let zm = z.iter().sum::<f64>() / n;
    let zv = z.iter().map(|v| (v - zm) * (v - zm)).sum::<f64>() / n;

    let diff = zm * zm - zv;
    if diff <= 0.0 {
        return f64::NAN;
    }
    let pav = diff.sqrt();
    let nv = 0.5 * (zm - pav);
    if nv <= 0.0 {
        return f64::NAN;
    }
    10.0 * ((pav / (2.0 * nv * acc_time)).abs()).log10()
}

/// Closed-loop code and carrier tracking of one channel over
/// `ms_to_process` code periods, producing 1 ms E/P/L accumulations.
pub fn track_channel(
    recording: &IQRecording,
    channel: &Channel,
    settings: &Settings,
    cancel: &AtomicBool,
    progress: &(dyn Fn(usize, usize) + Sync),
) -> Result<TrackLog> {
    let sv = SV::new(Constellation::GPS, channel.prn);
    let ms_to_process = settings.ms_to_process;
    let mut log = TrackLog::new(channel.prn, ms_to_process);

    let mut stream = recording.open_stream()?;
    stream.seek_samples(channel.code_phase as u64)?;

    // code with one wraparound chip on each side so the early and late
    // replicas can index past the period boundary
    let ca = code::ca_code(channel.prn);
    let mut ca_padded = Vec::with_capacity(ca.len() + 2);
    ca_padded.push(ca[ca.len() - 1] as f64);
    ca_padded.extend(ca.iter().map(|&c| c as f64));
    ca_padded.push(ca[0] as f64);

    let (tau1_code, tau2_code) = calc_loop_coef(
        settings.dll_noise_bandwidth_hz,
        settings.dll_damping_ratio,
        1.0,
    );
    let (tau1_carr, tau2_carr) = calc_loop_coef(
        settings.pll_noise_bandwidth_hz,
        settings.pll_damping_ratio,
        0.25,
    );
    let pdi_code = settings.int_time_sec;
    let pdi_carr = settings.int_time_sec;
    let early_late_spc = settings.dll_correlator_spacing_chips;
    let code_length = settings.code_length as f64;
    let fs = settings.sampling_freq_hz;
    let vsm_interval = settings.cno.vsm_interval;

    let mut code_freq = settings.code_freq_basis_hz;
    let mut rem_code_phase = 0.0f64;
    let carr_freq_basis = channel.acquired_freq_hz;
    let mut carr_freq = carr_freq_basis;
    let mut rem_carr_phase = 0.0f64;
    let mut old_code_nco = 0.0f64;
    let mut old_code_error = 0.0f64;
    let mut old_carr_nco = 0.0f64;
    let mut old_carr_error = 0.0f64;
    let mut cno = f64::NAN;

    let mut completed = 0usize;
    for loop_cnt in 0..ms_to_process {
        if cancel.load(Ordering::SeqCst) {
            log::warn!("{}: cancel requested at {} ms", sv, loop_cnt);
            break;
        }
        if loop_cnt % 50 == 0 {
            progress(loop_cnt, ms_to_process);
        }
        if loop_cnt % 1000 == 0 && loop_cnt > 0 {
            log::info!(
                "{}: {} {:5} ms cn0={:.1} carr={:.1} code={:.4}",
                sv,
                "TRCK".green(),
                loop_cnt,
                cno,
                carr_freq,
                code_freq,
            );
        }

        let code_phase_step = code_freq / fs;
        let blksize = ((code_length - rem_code_phase) / code_phase_step).ceil() as usize;

        let absolute_sample = stream.position_samples()? as f64;
        let raw_signal = match stream.read_samples(blksize) {
            Ok(v) => v,
            Err(Error::InsufficientData { needed, got }) => {
                log::warn!(
                    "{}: out of samples at {} ms (needed {}, got {})",
                    sv,
                    loop_cnt,
                    needed,
                    got
                );
                break;
            }
            Err(e) => return Err(e),
        };

        log.absolute_sample[loop_cnt] = absolute_sample;
        log.rem_code_phase[loop_cnt] = rem_code_phase;
        log.rem_carr_phase[loop_cnt] = rem_carr_phase;

        // six correlator accumulations in one pass over the block
        let mut i_e = 0.0f64;
        let mut q_e = 0.0f64;
        let mut i_p = 0.0f64;
        let mut q_p = 0.0f64;
        let mut i_l = 0.0f64;
        let mut q_l = 0.0f64;
        let max_idx = ca_padded.len() - 1;
        let chip_at = |tcode: f64| -> f64 {
            let idx = (tcode.ceil() as isize).clamp(0, max_idx as isize) as usize;
            ca_padded[idx]
        };
        let w = 2.0 * PI * carr_freq / fs;
        for (j, s) in raw_signal.iter().enumerate() {
            let tcode = rem_code_phase + j as f64 * code_phase_step;
            let early = chip_at(tcode - early_late_spc);
            let prompt = chip_at(tcode);
            let late = chip_at(tcode + early_late_spc);

            let trigarg = w * j as f64 + rem_carr_phase;
            let baseband = Complex64::new(trigarg.cos(), -trigarg.sin()) * s;

            i_e += early * baseband.re;
            q_e += early * baseband.im;
            i_p += prompt * baseband.re;
            q_p += prompt * baseband.im;
            i_l += late * baseband.re;
            q_l += late * baseband.im;
        }

        rem_code_phase += blksize as f64 * code_phase_step - code_length;
        rem_carr_phase = (w * blksize as f64 + rem_carr_phase).rem_euclid(2.0 * PI);

        // Costas discriminator and carrier loop filter
        let carr_error = (q_p / i_p).atan() / (2.0 * PI);
        let carr_nco = old_carr_nco
            + (tau2_carr / tau1_carr) * (carr_error - old_carr_error)
            + carr_error * (pdi_carr / tau1_carr);
        old_carr_nco = carr_nco;
        old_carr_error = carr_error;
        log.carr_freq[loop_cnt] = carr_freq;
        carr_freq = carr_freq_basis + carr_nco;

        // non-coherent early-minus-late envelope and code loop filter
        let early_mag = f64::hypot(i_e, q_e);
        let late_mag = f64::hypot(i_l, q_l);
        let code_error = (early_mag - late_mag) / (early_mag + late_mag);
        let code_nco = old_code_nco
            + (tau2_code / tau1_code) * (code_error - old_code_error)
            + code_error * (pdi_code / tau1_code);
        old_code_nco = code_nco;
        old_code_error = code_error;
        log.code_freq[loop_cnt] = code_freq;
        code_freq = settings.code_freq_basis_hz - code_nco;

        log.dll_discr[loop_cnt] = code_error;
        log.dll_discr_filt[loop_cnt] = code_nco;
        log.pll_discr[loop_cnt] = carr_error;
        log.pll_discr_filt[loop_cnt] = carr_nco;
        log.i_e[loop_cnt] = i_e;
        log.i_p[loop_cnt] = i_p;
        log.i_l[loop_cnt] = i_l;
        log.q_e[loop_cnt] = q_e;
        log.q_p[loop_cnt] = q_p;
        log.q_l[loop_cnt] = q_l;

        if (loop_cnt + 1) % vsm_interval == 0 {
            let lo = loop_cnt + 1 - vsm_interval;
            cno = cno_vsm(
                &log.i_p[lo..loop_cnt + 1],
                &log.q_p[lo..loop_cnt + 1],
                settings.cno.acc_time,
            );
            log.cno_vsm_value.push(cno);
            log.cno_vsm_index.push(loop_cnt + 1);
        }

        completed = loop_cnt + 1;
    }

    log.truncate(completed);
    log.status = channel.status;
    progress(completed, ms_to_process);
    Ok(log)
}

/// Tracks every seeded channel on the rayon pool; each worker owns a
/// private stream into the recording.
pub fn track_all(
    recording: &IQRecording,
    channels: &[Channel],
    settings: &Settings,
    cancel: &AtomicBool,
    progress: Option<&(dyn Fn(usize, usize, usize) + Sync)>,
) -> Result<Vec<TrackLog>> {
    channels
        .par_iter()
        .enumerate()
        .map(|(nr, channel)| {
            if channel.status != ChannelStatus::Tracking || channel.prn == 0 {
                return Ok(TrackLog::new(0, 0));
            }
            track_channel(recording, channel, settings, cancel, &|done, total| {
                if let Some(p) = progress {
                    p(nr, done, total);
                }
            })
        })
        .collect()
}
