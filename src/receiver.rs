use chrono::Local;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::acquisition::{AcquisitionEngine, AcquisitionResult};
use crate::channel::{self, Channel};
use crate::error::{Error, Result};
use crate::navigation::{self, NavSolution};
use crate::recording::IQRecording;
use crate::settings::Settings;
use crate::tracking::{self, TrackLog};

const ACQ_RESULTS_FILE: &str = "acq_results.json";
const TRK_RESULTS_FILE: &str = "trk_results.json";
const NAV_RESULTS_FILE: &str = "nav_results.json";

/// Post-processing receiver: cold-start acquisition, channel pre-run,
/// tracking, navigation. Each stage persists its results so a run can be
/// restarted downstream of an already-computed stage.
pub struct GpsReceiver {
    settings: Settings,
    recording: IQRecording,
    cancel: Arc<AtomicBool>,
}

impl GpsReceiver {
    pub fn new(settings: Settings, cancel: Arc<AtomicBool>) -> Self {
        let recording = IQRecording::new(
            settings.file_name.clone(),
            settings.sample_format,
            settings.skip_number_of_bytes,
        );
        Self {
            settings,
            recording,
            cancel,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.recording.print_banner(self.settings.sampling_freq_hz);

        let acq_results = if self.settings.skip_acquisition {
            log::info!("loading acquisition results from {}", ACQ_RESULTS_FILE);
            load_json(Path::new(ACQ_RESULTS_FILE))?
        } else {
            let results = self.run_acquisition()?;
            save_json(Path::new(ACQ_RESULTS_FILE), &results)?;
            results
        };

        if acq_results.iter().all(|r| r.carr_freq_hz == 0.0) {
            println!("{}", "no GPS signals detected, processing finished".red());
            return Ok(());
        }

        let channels = channel::pre_run(&acq_results, &self.settings);
        channel::show_channel_status(&channels, &self.settings);

        let track_results = self.run_tracking(&channels)?;
        save_json(Path::new(TRK_RESULTS_FILE), &track_results)?;

        let nav_results = self.run_navigation(&track_results)?;
        save_json(Path::new(NAV_RESULTS_FILE), &nav_results)?;

        self.print_fix_summary(&nav_results);
        Ok(())
    }

    fn run_acquisition(&self) -> Result<Vec<AcquisitionResult>> {
        println!("acquiring satellites...");
        let engine = AcquisitionEngine::new(&self.settings);
        let signal = self
            .recording
            .read_samples_at(0, engine.required_samples())?;
        let results = engine.acquire(&signal)?;

        for r in results.iter().filter(|r| r.carr_freq_hz == 0.0) {
            log::debug!("{}", Error::AcquisitionFailed(r.prn));
        }
        Ok(results)
    }

    fn run_tracking(&self, channels: &[Channel]) -> Result<Vec<TrackLog>> {
        let started = Local::now();
        println!(
            "tracking started at {}",
            started.format("%Y-%m-%d %H:%M:%S").to_string().bold()
        );

        let progress = |channel_nr: usize, ms_done: usize, ms_total: usize| {
            if ms_done % 5000 == 0 {
                log::debug!(
                    "channel {}: {} / {} ms",
                    channel_nr + 1,
                    ms_done,
                    ms_total
                );
            }
        };
        let results = tracking::track_all(
            &self.recording,
            channels,
            &self.settings,
            &self.cancel,
            Some(&progress),
        )?;

        let elapsed = Local::now() - started;
        println!(
            "tracking is over (elapsed {:.1} sec)",
            elapsed.num_milliseconds() as f64 / 1000.0
        );
        Ok(results)
    }

    fn run_navigation(&self, track_results: &[TrackLog]) -> Result<Vec<NavSolution>> {
        println!("calculating navigation solutions...");
        match navigation::post_navigation(track_results, &self.settings) {
            Ok((solutions, _eph)) => Ok(solutions),
            Err(e @ (Error::RecordTooShort(_) | Error::RankDeficient(_))) => {
                // degraded but not fatal: report what was tracked
                log::warn!("{}", e);
                Ok(vec![])
            }
            Err(e) => Err(e),
        }
    }

    fn print_fix_summary(&self, nav_results: &[NavSolution]) {
        let valid = nav_results.iter().filter(|s| s.valid).count();
        println!(
            "navigation: {} fixes out of {} epochs",
            format!("{}", valid).green(),
            nav_results.len()
        );
        for (i, sol) in nav_results.iter().enumerate() {
            if sol.valid {
                println!(
                    "  epoch {:3}: lat {:11.6} lon {:11.6} h {:8.1} m \
                     E {:11.1} N {:11.1} U {:7.1} gdop {:5.2} sats {}",
                    i + 1,
                    sol.latitude_deg,
                    sol.longitude_deg,
                    sol.height_m,
                    sol.e,
                    sol.n,
                    sol.u,
                    sol.dop.gdop,
                    sol.prn.len(),
                );
            } else {
                println!("  epoch {:3}: {}", i + 1, "no solution".red());
            }
        }
    }
}

fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    std::fs::write(path, text)?;
    log::info!("results saved to {}", path.display());
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_blobs_roundtrip() {
        let results = vec![
            AcquisitionResult {
                prn: 12,
                carr_freq_hz: 1250.0,
                code_phase: 4242,
                peak_metric: 7.25,
            },
            AcquisitionResult::default(),
        ];
        let mut path = std::env::temp_dir();
        path.push(format!("gps-rcv-{}-acq.json", std::process::id()));
        save_json(&path, &results).unwrap();
        let back: Vec<AcquisitionResult> = load_json(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].prn, 12);
        assert_eq!(back[0].code_phase, 4242);
        assert_eq!(back[1].carr_freq_hz, 0.0);
        std::fs::remove_file(path).ok();
    }
}
