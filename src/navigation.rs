use colored::Colorize;
use gnss_rs::constellation::Constellation;
use gnss_rs::sv::SV;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelStatus;
use crate::constants::NUM_GPS_SATS;
use crate::ephemeris::Ephemeris;
use crate::error::{Error, Result};
use crate::geodesy;
use crate::satellite;
use crate::settings::Settings;
use crate::solver::{self, Dop};
use crate::tracking::TrackLog;

/// TLM preamble, one value per navigation bit.
const PREAMBLE_BITS: [i8; 8] = [1, -1, -1, -1, 1, -1, 1, 1];
/// Detection threshold on the 160-sample preamble correlation.
const PREAMBLE_XCORR_THRESHOLD: f64 = 153.0;
/// Milliseconds between repeated preambles (one subframe).
const PREAMBLE_SPACING_MS: usize = 6000;

const MS_PER_BIT: usize = 20;
const FRAME_BITS: usize = 1500;

/// Frame alignment of one channel: where the first complete subframe starts
/// in the prompt stream, its TOW, and the ephemeris decoded from the five
/// subframes that follow.
#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    pub sub_frame_start: usize,
    pub tow: f64,
    pub eph: Ephemeris,
}

/// Parity check of one GPS word, bits as ±1:
/// `ndat = [D29*, D30*, d1..d24, D25..D30]`. Returns ±1 on pass (the sign
/// tells whether d1..d24 must be inverted before use), 0 on failure.
pub fn nav_party_chk(ndat: &[i8]) -> i8 {
    assert_eq!(ndat.len(), 32);
    let mut d = [0i8; 32];
    d.copy_from_slice(ndat);

    // data bits arrive inverted when the previous word ended in 1
    if d[1] != 1 {
        for v in d[2..26].iter_mut() {
            *v = -*v;
        }
    }

    let parity = [
        d[0] * d[2] * d[3] * d[4] * d[6] * d[7] * d[11] * d[12] * d[13] * d[14] * d[15] * d[18]
            * d[19] * d[21] * d[24],
        d[1] * d[3] * d[4] * d[5] * d[7] * d[8] * d[12] * d[13] * d[14] * d[15] * d[16] * d[19]
            * d[20] * d[22] * d[25],
        d[0] * d[2] * d[4] * d[5] * d[6] * d[8] * d[9] * d[13] * d[14] * d[15] * d[16] * d[17]
            * d[20] * d[21] * d[23],
        d[1] * d[3] * d[5] * d[6] * d[7] * d[9] * d[10] * d[14] * d[15] * d[16] * d[17] * d[18]
            * d[21] * d[22] * d[24],
        d[1] * d[2] * d[4] * d[6] * d[7] * d[8] * d[10] * d[11] * d[15] * d[16] * d[17] * d[18]
            * d[19] * d[22] * d[23] * d[25],
        d[0] * d[4] * d[6] * d[7] * d[9] * d[10] * d[11] * d[12] * d[14] * d[16] * d[20] * d[23]
            * d[24] * d[25],
    ];

    if parity.iter().zip(&d[26..32]).all(|(p, r)| p == r) {
        -d[1]
    } else {
        0
    }
}

/// Locates the first parity-valid subframe start in a channel's prompt
/// stream: preamble-shaped correlation peaks, a second peak exactly one
/// subframe later, and passing parity on the TLM and HOW words.
pub fn find_preamble(i_p: &[f64], settings: &Settings) -> Option<usize> {
    let pattern_len = PREAMBLE_BITS.len() * MS_PER_BIT;
    if i_p.len() < pattern_len {
        return None;
    }

    let mut preamble_ms = Vec::with_capacity(pattern_len);
    for &b in PREAMBLE_BITS.iter() {
        preamble_ms.extend(std::iter::repeat(b as f64).take(MS_PER_BIT));
    }

    let bits: Vec<f64> = i_p
        .iter()
        .map(|&v| if v > 0.0 { 1.0 } else { -1.0 })
        .collect();

    // candidate starts, kept away from both record boundaries
    let hi = settings.ms_to_process.saturating_sub(MS_PER_BIT * 60 - 1);
    let mut candidates = Vec::new();
    for d in 0..=bits.len().saturating_sub(pattern_len) {
        let corr: f64 = preamble_ms
            .iter()
            .zip(&bits[d..d + pattern_len])
            .map(|(p, b)| p * b)
            .sum();
        if corr.abs() > PREAMBLE_XCORR_THRESHOLD && d > 40 && d < hi {
            candidates.push(d);
        }
    }

    for &d in &candidates {
        if !candidates.contains(&(d + PREAMBLE_SPACING_MS)) {
            continue;
        }
        if d < 2 * MS_PER_BIT || d + MS_PER_BIT * 60 > i_p.len() {
            continue;
        }

        // sum the 20 accumulations of each bit: 2 carry-in bits for parity
        // plus the 60 bits of the TLM and HOW words
        let window = &i_p[d - 2 * MS_PER_BIT..d + MS_PER_BIT * 60];
        let mut bit_sums = [0.0f64; 62];
        for (k, v) in window.iter().enumerate() {
            bit_sums[k / MS_PER_BIT] += v;
        }
        let hard: Vec<i8> = bit_sums
            .iter()
            .map(|&v| if v > 0.0 { 1 } else { -1 })
            .collect();

        if nav_party_chk(&hard[0..32]) != 0 && nav_party_chk(&hard[30..62]) != 0 {
            return Some(d);
        }
    }
    None
}

/// Bit/frame synchronization and LNAV decoding of one channel.
pub fn decode_nav(
    i_p: &[f64],
    prn: u8,
    channel_nr: usize,
    settings: &Settings,
) -> Result<FrameSync> {
    let sub_frame_start =
        find_preamble(i_p, settings).ok_or(Error::PreambleNotFound(channel_nr))?;

    // five subframes of samples, starting one bit early so the polarity
    // seed of the first word is known
    let needed = sub_frame_start + FRAME_BITS * MS_PER_BIT + 1;
    if i_p.len() < needed {
        return Err(Error::InsufficientData {
            needed,
            got: i_p.len(),
        });
    }
    let window = &i_p[sub_frame_start - (MS_PER_BIT - 1)..needed];

    let mut bit_sums = [0.0f64; FRAME_BITS + 1];
    for (k, v) in window.iter().enumerate() {
        bit_sums[k / MS_PER_BIT] += v;
    }
    let bits: Vec<u8> = bit_sums
        .iter()
        .map(|&v| if v > 0.0 { 1 } else { 0 })
        .collect();

    let mut eph = Ephemeris::new(prn);
    let tow = eph.decode_frames(&bits[1..], bits[0]);

    Ok(FrameSync {
        sub_frame_start,
        tow,
        eph,
    })
}

/// Relative pseudoranges at one measurement sample. Returns the raw
/// pseudorange and transmit time per channel (infinite outside `active`)
/// and initializes local time on the first call.
pub fn calculate_pseudoranges(
    track_results: &[TrackLog],
    sub_frame_start: &[usize],
    tow: &[f64],
    curr_meas_sample: f64,
    local_time: &mut f64,
    active: &[usize],
    settings: &Settings,
) -> (Vec<f64>, Vec<f64>) {
    let nch = track_results.len();
    let mut transmit_time = vec![f64::INFINITY; nch];

    for &ch in active {
        let log = &track_results[ch];
        // last accumulation whose start is at or before the measurement
        let pp = log
            .absolute_sample
            .partition_point(|&s| s <= curr_meas_sample);
        let index = pp.saturating_sub(1);

        let code_phase_step = log.code_freq[index] / settings.sampling_freq_hz;
        let code_phase = log.rem_code_phase[index]
            + code_phase_step * (curr_meas_sample - log.absolute_sample[index]);

        let code_periods = index as f64 - sub_frame_start[ch] as f64;
        transmit_time[ch] = (code_phase / settings.code_length as f64 + code_periods)
            * settings.code_length as f64
            / settings.code_freq_basis_hz
            + tow[ch];
    }

    if local_time.is_infinite() {
        let max_time = active
            .iter()
            .map(|&ch| transmit_time[ch])
            .fold(f64::NEG_INFINITY, f64::max);
        *local_time = max_time + settings.start_offset_ms / 1000.0;
    }

    let pseudoranges = transmit_time
        .iter()
        .map(|&t| (*local_time - t) * settings.speed_of_light)
        .collect();
    (pseudoranges, transmit_time)
}

/// One position fix. `valid` is false for epochs with too few satellites
/// or degenerate geometry; those carry infinite DOP and NaN state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavSolution {
    pub prn: Vec<u8>,
    pub elevation: Vec<f64>,
    pub azimuth: Vec<f64>,
    pub transmit_time: Vec<f64>,
    pub sat_clk_corr: Vec<f64>,
    pub raw_p: Vec<f64>,
    pub corrected_p: Vec<f64>,

    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub dt: f64,
    pub dop: Dop,

    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,
    pub utm_zone: u32,
    pub e: f64,
    pub n: f64,
    pub u: f64,

    pub local_time: f64,
    pub curr_meas_sample: f64,
    pub valid: bool,
}

impl NavSolution {
    fn invalid(curr_meas_sample: f64, local_time: f64, prn: Vec<u8>) -> Self {
        Self {
            prn,
            elevation: vec![],
            azimuth: vec![],
            transmit_time: vec![],
            sat_clk_corr: vec![],
            raw_p: vec![],
            corrected_p: vec![],
            x: f64::NAN,
            y: f64::NAN,
            z: f64::NAN,
            dt: f64::NAN,
            dop: Dop::infinite(),
            latitude_deg: f64::NAN,
            longitude_deg: f64::NAN,
            height_m: f64::NAN,
            utm_zone: 0,
            e: f64::NAN,
            n: f64::NAN,
            u: f64::NAN,
            local_time,
            curr_meas_sample,
            valid: false,
        }
    }
}

/// Decodes navigation data from the tracked channels and walks the record
/// epoch by epoch, producing pseudoranges, satellite positions and
/// least-squares fixes.
pub fn post_navigation(
    track_results: &[TrackLog],
    settings: &Settings,
) -> Result<(Vec<NavSolution>, Vec<Ephemeris>)> {
    // three requisite subframes can sit anywhere in the five-subframe
    // cycle, so a full cycle plus margin is needed
    if settings.ms_to_process < 36000 {
        return Err(Error::RecordTooShort(settings.ms_to_process));
    }

    let nch = track_results.len();
    let mut sub_frame_start = vec![usize::MAX; nch];
    let mut tow = vec![f64::INFINITY; nch];
    let mut eph_table: Vec<Ephemeris> = (1..=NUM_GPS_SATS)
        .map(|prn| Ephemeris::new(prn as u8))
        .collect();

    let mut active: Vec<usize> = (0..nch)
        .filter(|&ch| {
            track_results[ch].status == ChannelStatus::Tracking && !track_results[ch].is_empty()
        })
        .collect();

    for ch in active.clone() {
        let prn = track_results[ch].prn;
        let sv = SV::new(Constellation::GPS, prn);
        log::info!("{}: decoding LNAV", sv);

        match decode_nav(&track_results[ch].i_p, prn, ch, settings) {
            Ok(sync) => {
                sub_frame_start[ch] = sync.sub_frame_start;
                tow[ch] = sync.tow;
                eph_table[(prn - 1) as usize] = sync.eph;
                if sync.eph.is_usable() {
                    log::info!("{}: three requisite subframes decoded", sv);
                } else {
                    log::warn!("{}", Error::EphemerisIncomplete(prn));
                    active.retain(|&c| c != ch);
                }
            }
            Err(e) => {
                log::warn!("{}: {}", sv, e);
                active.retain(|&c| c != ch);
            }
        }
    }

    if active.len() < 4 {
        log::warn!(
            "too few satellites with usable ephemeris ({}), no navigation solution",
            active.len()
        );
        return Err(Error::RankDeficient(active.len()));
    }

    // measurement span where every active channel has data, with a one
    // sample margin on both ends
    let sample_start = active
        .iter()
        .map(|&ch| track_results[ch].absolute_sample[sub_frame_start[ch]])
        .fold(f64::NEG_INFINITY, f64::max)
        + 1.0;
    let sample_end = active
        .iter()
        .map(|&ch| *track_results[ch].absolute_sample.last().unwrap())
        .fold(f64::INFINITY, f64::min)
        - 1.0;

    let step = settings.sampling_freq_hz * settings.nav_sol_period_ms as f64 / 1000.0;
    let num_epochs = ((sample_end - sample_start) / step) as usize;

    let mut sat_elev = vec![f64::INFINITY; nch];
    let mut local_time = f64::INFINITY;
    let mut solutions = Vec::with_capacity(num_epochs);

    log::info!("computing {} position fixes", num_epochs);
    for epoch in 0..num_epochs {
        let active_now: Vec<usize> = active
            .iter()
            .copied()
            .filter(|&ch| sat_elev[ch] >= settings.elevation_mask_deg)
            .collect();
        let curr_meas_sample = sample_start + step * epoch as f64;
        let prns: Vec<u8> = active_now.iter().map(|&ch| track_results[ch].prn).collect();

        if active_now.len() <= 3 {
            log::warn!(
                "epoch {}: {}",
                epoch + 1,
                Error::RankDeficient(active_now.len())
            );
            solutions.push(NavSolution::invalid(curr_meas_sample, local_time, prns));
            if local_time.is_finite() {
                local_time += step / settings.sampling_freq_hz;
            }
            continue;
        }

        let (raw_p, transmit_time) = calculate_pseudoranges(
            track_results,
            &sub_frame_start,
            &tow,
            curr_meas_sample,
            &mut local_time,
            &active_now,
            settings,
        );

        let tx_now: Vec<f64> = active_now.iter().map(|&ch| transmit_time[ch]).collect();
        let (sat_pos, sat_clk_corr) = satellite::sat_positions(&tx_now, &prns, &eph_table);

        let obs: Vec<f64> = active_now
            .iter()
            .enumerate()
            .map(|(k, &ch)| raw_p[ch] + sat_clk_corr[k] * settings.speed_of_light)
            .collect();

        match solver::least_square_pos(&sat_pos, &obs, settings) {
            Ok(pvt) => {
                let (lat, lon, height) = geodesy::cart2geo(pvt.pos[0], pvt.pos[1], pvt.pos[2], 4);
                let utm_zone = geodesy::find_utm_zone(lat, lon);
                let (e, n, u) = geodesy::cart2utm(pvt.pos[0], pvt.pos[1], pvt.pos[2], utm_zone);

                log::info!(
                    "epoch {:2}: {} lat={:.6} lon={:.6} h={:.1} gdop={:.2}",
                    epoch + 1,
                    "fix".green(),
                    lat,
                    lon,
                    height,
                    pvt.dop.gdop,
                );

                for (k, &ch) in active_now.iter().enumerate() {
                    sat_elev[ch] = pvt.el[k];
                }

                let corrected_p: Vec<f64> = active_now
                    .iter()
                    .enumerate()
                    .map(|(k, &ch)| raw_p[ch] + sat_clk_corr[k] * settings.speed_of_light - pvt.pos[3])
                    .collect();

                solutions.push(NavSolution {
                    prn: prns,
                    elevation: pvt.el.clone(),
                    azimuth: pvt.az.clone(),
                    transmit_time: tx_now,
                    sat_clk_corr,
                    raw_p: active_now.iter().map(|&ch| raw_p[ch]).collect(),
                    corrected_p,
                    x: pvt.pos[0],
                    y: pvt.pos[1],
                    z: pvt.pos[2],
                    dt: pvt.pos[3],
                    dop: pvt.dop,
                    latitude_deg: lat,
                    longitude_deg: lon,
                    height_m: height,
                    utm_zone,
                    e,
                    n,
                    u,
                    local_time: local_time - pvt.pos[3] / settings.speed_of_light,
                    curr_meas_sample,
                    valid: true,
                });
            }
            Err(err) => {
                log::warn!("epoch {}: {}", epoch + 1, err);
                solutions.push(NavSolution::invalid(curr_meas_sample, local_time, prns));
            }
        }

        local_time += step / settings.sampling_freq_hz;
    }

    Ok((solutions, eph_table))
}
