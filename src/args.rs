//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{Settings, SOCKET_BUFFER},
    recovery::FillMode,
    router::RoutingMode,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Science case (3 or 4), sets the samples per segment
    #[clap(short, long, value_parser = clap::value_parser!(u8).range(3..=4))]
    pub case: u8,
    /// Science mode: 0 I+TAB, 1 IQUV+TAB, 2 I+IAB, 3 IQUV+IAB
    #[clap(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub mode: u8,
    /// Timestamp (in 1.28 us ticks) of the first segment to write
    #[clap(short, long)]
    pub start: u64,
    /// Run length in seconds
    #[clap(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,
    /// Port to capture UDP data from
    #[clap(short, long, default_value_t = 7469)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
    /// Bytes per channel row in Stokes I mode, at least the samples per segment
    #[clap(long, default_value_t = 25088)]
    pub padded_size: usize,
    /// Hexadecimal (sans leading 0x) PSRDADA key, once per output stream
    #[clap(short, long = "key", value_parser = valid_dada_key, required = true)]
    pub keys: Vec<i32>,
    /// PSRDADA header file, either one shared or one per key
    #[clap(long = "header", required = true)]
    pub headers: Vec<PathBuf>,
    /// What to write into slots of lost packets
    #[clap(long, value_enum, default_value_t = FillMode::Ignore)]
    pub fill: FillMode,
    /// How packets are assigned to keys
    #[clap(long, value_enum, default_value_t = RoutingMode::PassThrough)]
    pub routing: RoutingMode,
    /// Only accept packets from this compound beam
    #[clap(short, long)]
    pub beam: Option<u8>,
    /// Socket receive buffer size in bytes
    #[clap(long, default_value_t = SOCKET_BUFFER)]
    pub socket_buffer: usize,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    pub fn into_settings(self) -> Settings {
        Settings {
            science_case: self.case,
            science_mode: self.mode,
            start: self.start,
            duration: self.duration,
            port: self.port,
            padded_size: self.padded_size,
            keys: self.keys,
            headers: self.headers,
            fill: self.fill,
            routing: self.routing,
            beam: self.beam,
            socket_buffer: self.socket_buffer,
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

fn valid_dada_key(s: &str) -> Result<i32, String> {
    i32::from_str_radix(s, 16).map_err(|_| "Invalid hex litteral".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("stokes_slurper").chain(args.iter().copied()))
    }

    #[test]
    fn test_minimal() {
        let args = parse(&[
            "-c", "4", "-m", "1", "-s", "800000000", "-d", "30", "-k", "dada", "--header",
            "obs.txt",
        ])
        .unwrap();
        let settings = args.into_settings();
        assert_eq!(settings.keys, vec![0xdada]);
        assert_eq!(settings.port, 7469);
        assert_eq!(settings.fill, FillMode::Ignore);
        assert_eq!(settings.routing, RoutingMode::PassThrough);
        assert_eq!(settings.socket_buffer, SOCKET_BUFFER);
        assert!(settings.beam.is_none());
    }

    #[test]
    fn test_learned_streams() {
        let args = parse(&[
            "-c", "3", "-m", "0", "-s", "0", "-d", "1", "-k", "1000", "-k", "1002", "--header",
            "a.txt", "--header", "b.txt", "--fill", "repeat", "--routing", "learned",
        ])
        .unwrap();
        assert_eq!(args.keys, vec![0x1000, 0x1002]);
        assert_eq!(args.headers.len(), 2);
        assert_eq!(args.fill, FillMode::Repeat);
        assert_eq!(args.routing, RoutingMode::Learned);
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = ["-s", "0", "-d", "1", "-k", "dada", "--header", "h"];
        let with = |extra: &[&str]| {
            let mut v: Vec<&str> = extra.to_vec();
            v.extend(base);
            parse(&v)
        };
        assert!(with(&["-c", "5", "-m", "0"]).is_err());
        assert!(with(&["-c", "4", "-m", "4"]).is_err());
        assert!(with(&["-c", "4", "-m", "0", "-k", "xyz"]).is_err());
        assert!(with(&["-c", "4", "-m", "0"]).is_ok());
    }
}
