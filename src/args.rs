//! Argument parsing for running from the command line

use clap::Parser;
use spectro_capture::AcquisitionConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Serial device the spectrometer is on (line is fixed at 115200 8N1)
    #[clap(short, long)]
    pub port: String,
    /// Number of captures kept in the rolling history
    #[clap(short, long, default_value_t = 100)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub capacity: u16,
    /// Integration passes per acquisition
    #[clap(short, long, default_value_t = 20)]
    #[clap(value_parser = clap::value_parser!(u8).range(1..100))]
    pub integration_passes: u8,
    /// Frames averaged per acquisition
    #[clap(short, long, default_value_t = 1)]
    #[clap(value_parser = clap::value_parser!(u8).range(1..100))]
    pub frame_average: u8,
    /// Let the sensor pick its own exposure
    #[clap(short, long)]
    pub auto_exposure: bool,
    /// Channel to follow in the periodic report
    #[clap(short = 'n', long, default_value_t = 0)]
    pub channel: usize,
    /// Seconds between reports
    #[clap(long, default_value_t = 1)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub report_interval: u64,
    /// Stop after this many seconds (0 runs until Ctrl-C)
    #[clap(short, long, default_value_t = 0)]
    pub duration: u64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

impl Args {
    pub fn acquisition(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            integration_passes: self.integration_passes,
            frame_average: self.frame_average,
            auto_exposure: self.auto_exposure,
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
