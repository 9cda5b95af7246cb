use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::acquisition::AcquisitionResult;
use crate::constants::NUM_GPS_SATS;
use crate::settings::Settings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Tracking,
    #[default]
    Off,
}

/// One tracking slot, seeded from acquisition.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub prn: u8,
    pub acquired_freq_hz: f64,
    pub code_phase: usize,
    pub status: ChannelStatus,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            prn: 0,
            acquired_freq_hz: 0.0,
            code_phase: 0,
            status: ChannelStatus::Off,
        }
    }
}

/// Seeds the tracking channels from the acquisition table: GPS PRNs only,
/// strongest peak metric first, the remaining slots left off.
pub fn pre_run(acq_results: &[AcquisitionResult], settings: &Settings) -> Vec<Channel> {
    let mut detected: Vec<&AcquisitionResult> = acq_results
        .iter()
        .filter(|r| (1..=NUM_GPS_SATS as u8).contains(&r.prn) && r.carr_freq_hz != 0.0)
        .collect();
    detected.sort_by(|a, b| b.peak_metric.total_cmp(&a.peak_metric));

    let mut channels = vec![Channel::default(); settings.number_of_channels];
    for (channel, result) in channels.iter_mut().zip(detected.iter()) {
        channel.prn = result.prn;
        channel.acquired_freq_hz = result.carr_freq_hz;
        channel.code_phase = result.code_phase;
        channel.status = ChannelStatus::Tracking;
    }
    channels
}

/// Operator table of the seeded channels.
pub fn show_channel_status(channels: &[Channel], settings: &Settings) {
    println!("*=========*=====*===============*===========*=============*========*");
    println!("| Channel | PRN |   Frequency   |  Doppler  | Code Offset | Status |");
    println!("*=========*=====*===============*===========*=============*========*");

    for (nr, ch) in channels.iter().enumerate() {
        if ch.status == ChannelStatus::Tracking {
            println!(
                "|      {:2} | {:3} |  {:>11.5e} | {:>9.0} | {:>11} |   {}  |",
                nr + 1,
                ch.prn,
                ch.acquired_freq_hz,
                ch.acquired_freq_hz - settings.if_freq_hz,
                ch.code_phase,
                "Trk".green(),
            );
        } else {
            println!(
                "|      {:2} | --- |  ------------ |   -----   |    ------   |  {}   |",
                nr + 1,
                "Off".red(),
            );
        }
    }
    println!("*=========*=====*===============*===========*=============*========*");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acq(prn: u8, freq: f64, metric: f64) -> AcquisitionResult {
        AcquisitionResult {
            prn,
            carr_freq_hz: freq,
            code_phase: 100 * prn as usize,
            peak_metric: metric,
        }
    }

    #[test]
    fn strongest_signals_fill_channels_first() {
        let settings = Settings {
            number_of_channels: 3,
            ..Settings::default()
        };
        let results = vec![
            acq(3, 1000.0, 4.0),
            acq(7, 2000.0, 9.0),
            acq(12, 0.0, 1.2),
            acq(19, -500.0, 6.5),
            acq(25, 300.0, 5.0),
        ];
        let channels = pre_run(&results, &settings);

        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].prn, 7);
        assert_eq!(channels[1].prn, 19);
        assert_eq!(channels[2].prn, 25);
        assert!(channels.iter().all(|c| c.status == ChannelStatus::Tracking));
    }

    #[test]
    fn unused_slots_stay_off() {
        let settings = Settings {
            number_of_channels: 4,
            ..Settings::default()
        };
        let results = vec![acq(5, 1500.0, 7.0)];
        let channels = pre_run(&results, &settings);

        assert_eq!(channels[0].prn, 5);
        assert_eq!(channels[0].status, ChannelStatus::Tracking);
        for ch in &channels[1..] {
            assert_eq!(ch.prn, 0);
            assert_eq!(ch.status, ChannelStatus::Off);
        }
    }

    #[test]
    fn out_of_range_prns_are_dropped() {
        let settings = Settings {
            number_of_channels: 2,
            ..Settings::default()
        };
        let results = vec![acq(40, 900.0, 9.0), acq(8, 700.0, 4.0)];
        let channels = pre_run(&results, &settings);
        assert_eq!(channels[0].prn, 8);
        assert_eq!(channels[1].status, ChannelStatus::Off);
    }
}
