//! Host saturation from `/proc` (Linux). Other platforms report unknown.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Saturation {
    /// 1-minute load average divided by CPU count, as a percentage.
    pub load_percent: Option<f64>,
    /// `some avg10` from `/proc/pressure/io`.
    pub io_pressure_percent: Option<f64>,
}

impl Saturation {
    /// The worse of the two figures, if either is known.
    pub fn percent(&self) -> Option<f64> {
        match (self.load_percent, self.io_pressure_percent) {
            (Some(load), Some(io)) => Some(load.max(io)),
            (one, other) => one.or(other),
        }
    }
}

/// First field of `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// `avg10` of the `some` line of a PSI file.
pub fn parse_pressure(content: &str) -> Option<f64> {
    content
        .lines()
        .find(|line| line.starts_with("some "))?
        .split_whitespace()
        .find_map(|field| field.strip_prefix("avg10="))?
        .parse()
        .ok()
}

pub fn read_saturation() -> Saturation {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    let cpus = f64::from(u32::try_from(cpus).unwrap_or(u32::MAX));

    let load_percent = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|content| parse_loadavg(&content))
        .map(|load| load / cpus * 100.0);
    let io_pressure_percent = std::fs::read_to_string("/proc/pressure/io")
        .ok()
        .and_then(|content| parse_pressure(&content));

    Saturation {
        load_percent,
        io_pressure_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/389 12345\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn test_parse_pressure() {
        let psi = "some avg10=12.50 avg60=3.00 avg300=1.00 total=123\nfull avg10=1.00 avg60=0.00 avg300=0.00 total=4\n";
        assert_eq!(parse_pressure(psi), Some(12.5));
        assert_eq!(parse_pressure("full avg10=1.00"), None);
    }

    #[test]
    fn test_saturation_takes_worse_figure() {
        let s = Saturation {
            load_percent: Some(40.0),
            io_pressure_percent: Some(80.0),
        };
        assert_eq!(s.percent(), Some(80.0));
        assert_eq!(Saturation::default().percent(), None);
        let load_only = Saturation {
            load_percent: Some(10.0),
            io_pressure_percent: None,
        };
        assert_eq!(load_only.percent(), Some(10.0));
    }
}
