//! The PSRDADA header published once per stream before any data

use std::{collections::HashMap, fs, path::Path};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::{
    config::{RunConfig, TICKS_PER_SECOND},
    error::ConfigError,
};

pub type Header = HashMap<String, String>;

/// Convert a chrono DateTime into a heimdall-compatible timestamp string
pub fn heimdall_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}-{:02}-{:02}-{:02}:{:02}:{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Wall clock time of a packet timestamp
pub fn packet_time(ticks: u64) -> Option<DateTime<Utc>> {
    let secs = (ticks / TICKS_PER_SECOND) as i64;
    // 1280 ns per tick
    let nanos = ((ticks % TICKS_PER_SECOND) * 1280) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Parse the ASCII `KEY value` header format
pub fn parse_header(text: &str) -> Result<Header, ConfigError> {
    let mut header = Header::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        if value.is_empty() {
            return Err(ConfigError::HeaderEntry {
                line: i + 1,
                reason: "key without a value",
            });
        }
        header.insert(key.to_owned(), value.to_owned());
    }
    Ok(header)
}

pub fn read_header(path: &Path) -> Result<Header, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::HeaderFile {
        path: path.to_owned(),
        source,
    })?;
    parse_header(&text)
}

/// Add the run parameters to a header read from file
pub fn annotate(header: &mut Header, config: &RunConfig) {
    let mut set = |key: &str, value: String| {
        header.insert(key.to_owned(), value);
    };
    set("SCIENCE_CASE", config.science_case.to_string());
    set("SCIENCE_MODE", config.science_mode.to_string());
    set("PADDED_SIZE", config.padded_size.to_string());
    set("NTABS", config.geometry.tabs.to_string());
    set("NCHAN", config.geometry.channels.to_string());
    set("OBS_OFFSET", 0.to_string());
    if let Some(start) = packet_time(config.start) {
        set("UTC_START", heimdall_timestamp(&start));
    }
}

/// Make sure every entry survives the round trip through the ASCII header block
pub fn check_header(header: &Header) -> Result<(), ConfigError> {
    for (key, value) in header {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ConfigError::HeaderEntry {
                line: 0,
                reason: "key is empty or contains whitespace",
            });
        }
        if value.contains(['\n', '\r', '\0']) {
            return Err(ConfigError::HeaderEntry {
                line: 0,
                reason: "value contains a line break or NUL",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::settings, RunConfig};

    #[test]
    fn test_parse() {
        let text = "# ARTS header\nHDR_VERSION 1.0\n\nSOURCE   B0329+54 \nNPOL 1\n";
        let header = parse_header(text).unwrap();
        assert_eq!(header.len(), 3);
        assert_eq!(header["SOURCE"], "B0329+54");
        assert_eq!(header["HDR_VERSION"], "1.0");
        assert!(matches!(
            parse_header("NBIT 8\nNPOL\n"),
            Err(ConfigError::HeaderEntry { line: 2, .. })
        ));
    }

    #[test]
    fn test_timestamps() {
        let time = packet_time(1_500_000_000 * TICKS_PER_SECOND + 390_625).unwrap();
        assert_eq!(heimdall_timestamp(&time), "2017-07-14-02:40:00");
        assert_eq!(time.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_annotate() {
        let mut s = settings(4, 1);
        s.start = 1_500_000_000 * TICKS_PER_SECOND;
        let config = RunConfig::derive(&s).unwrap();
        let mut header = parse_header("SOURCE FRB\n").unwrap();
        annotate(&mut header, &config);
        assert_eq!(header["SCIENCE_MODE"], "1");
        assert_eq!(header["NTABS"], "12");
        assert_eq!(header["UTC_START"], "2017-07-14-02:40:00");
        assert!(check_header(&header).is_ok());
        header.insert("BAD KEY".to_owned(), "1".to_owned());
        assert!(check_header(&header).is_err());
    }
}
