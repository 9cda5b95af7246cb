use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use structopt::StructOpt;

use gps_rcv::code;
use gps_rcv::recording::SampleFormat;
use gps_rcv::settings::Settings;
use gps_rcv::GpsReceiver;

#[derive(StructOpt)]
#[structopt(name = "gps-rcv", about = "software GPS L1 C/A receiver")]
struct Options {
    #[structopt(short = "g", help = "dump the C/A codes and exit")]
    gen_ca_code: bool,
    #[structopt(short = "c", long, help = "JSON settings file")]
    config: Option<PathBuf>,
    #[structopt(short = "f", long, help = "raw IF/baseband capture")]
    file: Option<PathBuf>,
    #[structopt(short = "t", long, help = "sample format: i8 2xi8 i16 2xi16 f32 2xf32")]
    format: Option<SampleFormat>,
    #[structopt(long, help = "sampling frequency [Hz]")]
    fs: Option<f64>,
    #[structopt(long, help = "intermediate frequency [Hz]")]
    if_freq: Option<f64>,
    #[structopt(long, help = "milliseconds of signal to process")]
    ms: Option<usize>,
    #[structopt(long, help = "number of tracking channels")]
    channels: Option<usize>,
    #[structopt(long, help = "bytes to skip at the start of the file")]
    skip_bytes: Option<u64>,
    #[structopt(long, help = "comma-separated PRN list to search")]
    sats: Option<String>,
    #[structopt(long, help = "reuse the persisted acquisition results")]
    skip_acquisition: bool,
    #[structopt(long, short = "v")]
    verbose: bool,
}

fn build_settings(opt: &Options) -> Settings {
    let mut settings = match &opt.config {
        Some(path) => Settings::load(path).unwrap_or_else(|e| {
            eprintln!("failed to load {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => Settings::default(),
    };

    if let Some(file) = &opt.file {
        settings.file_name = file.clone();
    }
    if let Some(format) = opt.format {
        settings.sample_format = format;
    }
    if let Some(fs) = opt.fs {
        settings.sampling_freq_hz = fs;
    }
    if let Some(if_freq) = opt.if_freq {
        settings.if_freq_hz = if_freq;
    }
    if let Some(ms) = opt.ms {
        settings.ms_to_process = ms;
    }
    if let Some(channels) = opt.channels {
        settings.number_of_channels = channels;
    }
    if let Some(skip) = opt.skip_bytes {
        settings.skip_number_of_bytes = skip;
    }
    if let Some(sats) = &opt.sats {
        settings.acq_satellite_list = sats
            .split(',')
            .map(|s| s.trim().parse::<u8>().expect("bad PRN in --sats"))
            .collect();
    }
    settings.skip_acquisition = opt.skip_acquisition;
    settings
}

fn main() {
    let opt = Options::from_args();

    let mut builder = env_logger::Builder::from_default_env();
    if opt.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    if opt.gen_ca_code {
        code::print_codes();
        return;
    }

    let settings = build_settings(&opt);

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("exit requested");
        cancel_handler.store(true, Ordering::SeqCst);
    })
    .expect("failed to install the ctrl-c handler");

    let mut receiver = GpsReceiver::new(settings, cancel);
    if let Err(e) = receiver.run() {
        eprintln!("processing failed: {}", e);
        std::process::exit(1);
    }
}
