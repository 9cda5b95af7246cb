use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{CA_CODE_FREQ_HZ, CA_CODE_LEN, SPEED_OF_LIGHT};
use crate::recording::SampleFormat;

/// Antenna position in UTM, when surveyed. NaN means unknown.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TruePosition {
    pub e: f64,
    pub n: f64,
    pub u: f64,
}

impl Default for TruePosition {
    fn default() -> Self {
        Self {
            e: f64::NAN,
            n: f64::NAN,
            u: f64::NAN,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CnoSettings {
    /// Accumulation interval of the tracking loop [s].
    pub acc_time: f64,
    /// Spacing of VSM C/N0 estimates [ms].
    pub vsm_interval: usize,
}

impl Default for CnoSettings {
    fn default() -> Self {
        Self {
            acc_time: 0.001,
            vsm_interval: 40,
        }
    }
}

/// Receiver configuration. Built once at startup and passed by shared
/// reference; no stage mutates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ms_to_process: usize,
    pub number_of_channels: usize,
    /// Byte offset into the recording where processing starts.
    pub skip_number_of_bytes: u64,

    pub file_name: PathBuf,
    pub sample_format: SampleFormat,

    pub if_freq_hz: f64,
    pub sampling_freq_hz: f64,
    pub code_freq_basis_hz: f64,
    pub code_length: usize,

    pub skip_acquisition: bool,
    pub acq_satellite_list: Vec<u8>,
    /// Single-sideband Doppler search band [Hz].
    pub acq_search_band_hz: f64,
    /// Coherent integration count (code periods per coherent sum).
    pub acq_coherent_int: usize,
    /// Non-coherent integration count.
    pub acq_non_coh_time: usize,
    pub acq_threshold: f64,
    /// Coarse frequency search step [Hz].
    pub acq_search_step_hz: f64,
    /// Run the Doppler-bin loop of the detector on the rayon pool.
    pub acq_parallel_bins: bool,

    pub dll_damping_ratio: f64,
    pub dll_noise_bandwidth_hz: f64,
    pub dll_correlator_spacing_chips: f64,
    pub pll_damping_ratio: f64,
    pub pll_noise_bandwidth_hz: f64,
    /// DLL/PLL integration time [s].
    pub int_time_sec: f64,

    /// Period between position fixes [ms].
    pub nav_sol_period_ms: usize,
    pub elevation_mask_deg: f64,
    pub use_trop_corr: bool,
    pub true_position: TruePosition,

    pub speed_of_light: f64,
    /// Initial signal travel time used to seed local time [ms].
    pub start_offset_ms: f64,

    pub cno: CnoSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ms_to_process: 37000,
            number_of_channels: 10,
            skip_number_of_bytes: 0,
            file_name: PathBuf::from("resources/capture.bin"),
            sample_format: SampleFormat::PairInt8,
            if_freq_hz: 20e3,
            sampling_freq_hz: 18e6,
            code_freq_basis_hz: CA_CODE_FREQ_HZ,
            code_length: CA_CODE_LEN,
            skip_acquisition: false,
            acq_satellite_list: (1..=32).collect(),
            acq_search_band_hz: 7000.0,
            acq_coherent_int: 1,
            acq_non_coh_time: 20,
            acq_threshold: 3.5,
            acq_search_step_hz: 500.0,
            acq_parallel_bins: false,
            dll_damping_ratio: 0.7,
            dll_noise_bandwidth_hz: 1.5,
            dll_correlator_spacing_chips: 0.5,
            pll_damping_ratio: 0.7,
            pll_noise_bandwidth_hz: 20.0,
            int_time_sec: 0.001,
            nav_sol_period_ms: 500,
            elevation_mask_deg: 5.0,
            use_trop_corr: true,
            true_position: TruePosition::default(),
            speed_of_light: SPEED_OF_LIGHT,
            start_offset_ms: 68.802,
            cno: CnoSettings::default(),
        }
    }
}

impl Settings {
    /// Samples covering one C/A code period at the configured rates.
    pub fn samples_per_code(&self) -> usize {
        (self.sampling_freq_hz / (self.code_freq_basis_hz / self.code_length as f64)).round()
            as usize
    }

    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_per_code_follows_sampling_rate() {
        let mut settings = Settings::default();
        assert_eq!(settings.samples_per_code(), 18000);
        settings.sampling_freq_hz = 1.023e6;
        assert_eq!(settings.samples_per_code(), 1023);
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let settings = Settings::default();
        let text = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&text).unwrap();
        assert_eq!(back.ms_to_process, settings.ms_to_process);
        assert_eq!(back.acq_satellite_list, settings.acq_satellite_list);
        assert!(back.true_position.e.is_nan());
    }
}
