//! Normalization of raw fetch backend output.
//!
//! Fetch tools report progress in whatever shape they like: byte counters,
//! tqdm-style percentage bars with unit suffixes, file counters, or a bare
//! percentage. The parser recognizes the known shapes and converts them to
//! one [`ProgressUpdate`]. A line that matches no shape yields no update
//! rather than an error, so the previous progress value is simply retained.

use regex_lite::Regex;

use crate::fetcher::{BackendKind, RawFetchEvent};

/// Normalized progress extracted from one raw backend event.
///
/// All fields are optional; the registry merges whatever is present into the
/// job record and leaves the rest untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Overall progress, 0-100.
    pub percent: Option<f32>,
    pub bytes_downloaded: Option<u64>,
    pub bytes_total: Option<u64>,
    pub speed_bps: Option<u64>,
    pub eta_secs: Option<u64>,
    /// File currently transferring, when the shape names one.
    pub artifact: Option<String>,
}

impl ProgressUpdate {
    /// Package byte counters reported directly by a backend.
    pub fn from_bytes(downloaded: u64, total: Option<u64>, artifact: Option<String>) -> Self {
        let percent = total.filter(|t| *t > 0).map(|t| {
            let pct = downloaded as f64 / t as f64 * 100.0;
            pct.min(100.0) as f32
        });

        Self {
            percent,
            bytes_downloaded: Some(downloaded),
            bytes_total: total,
            speed_bps: None,
            eta_secs: None,
            artifact,
        }
    }

    /// True when the update carries nothing.
    pub fn is_empty(&self) -> bool {
        self.percent.is_none()
            && self.bytes_downloaded.is_none()
            && self.bytes_total.is_none()
            && self.speed_bps.is_none()
            && self.eta_secs.is_none()
            && self.artifact.is_none()
    }
}

/// Parser for raw fetch backend output, one instance per transfer.
///
/// The recognized line shapes, tried in order:
///
/// 1. file counter: `Fetching 5 files: 3/5`
/// 2. percentage bar: `model.bin:  45%|███▌ | 450MB/1GB [00:30<00:37, 15.0MB/s]`
/// 3. bare percentage: `Receiving objects:  42% (84/200)`
pub struct ProgressParser {
    file_count_re: Regex,
    fraction_re: Regex,
    percent_re: Regex,
    size_re: Regex,
    speed_re: Regex,
    artifact_re: Regex,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        // These patterns are fixed strings; compilation cannot fail.
        Self {
            file_count_re: Regex::new(r"Fetching\s+(\d+)\s+files").unwrap(),
            fraction_re: Regex::new(r"(\d+)/(\d+)\s*$").unwrap(),
            percent_re: Regex::new(r"(\d+(?:\.\d+)?)%").unwrap(),
            size_re: Regex::new(r"(\d+(?:\.\d+)?)\s*([KMGT]?i?B)/(\d+(?:\.\d+)?)\s*([KMGT]?i?B)")
                .unwrap(),
            speed_re: Regex::new(r"(\d+(?:\.\d+)?)\s*([KMGT]?i?B)/s").unwrap(),
            artifact_re: Regex::new(r"^\s*([^\s:]+\.\w+):\s").unwrap(),
        }
    }

    /// Normalize one raw backend event.
    ///
    /// `kind` selects the parsing strategy: byte counters are packaged as-is,
    /// subprocess lines go through the line shape table. Returns `None` when
    /// the event carries nothing recognizable.
    pub fn parse(&self, kind: BackendKind, event: &RawFetchEvent) -> Option<ProgressUpdate> {
        match (kind, event) {
            (
                _,
                RawFetchEvent::Bytes {
                    downloaded,
                    total,
                    artifact,
                },
            ) => Some(ProgressUpdate::from_bytes(
                *downloaded,
                *total,
                artifact.clone(),
            )),
            (BackendKind::Subprocess, RawFetchEvent::Line(line)) => self.parse_line(line),
            // The HTTP backend reports byte counters; a stray line is noise.
            (BackendKind::HttpStream, RawFetchEvent::Line(_)) => None,
        }
    }

    /// Parse one complete output line. Returns `None` on any ambiguity.
    pub fn parse_line(&self, line: &str) -> Option<ProgressUpdate> {
        if let Some(update) = self.parse_file_count(line) {
            return Some(update);
        }
        self.parse_percent_line(line)
    }

    /// `Fetching 5 files: 3/5` -> 60%.
    fn parse_file_count(&self, line: &str) -> Option<ProgressUpdate> {
        self.file_count_re.captures(line)?;

        let caps = self.fraction_re.captures(line)?;
        let completed: u64 = caps.get(1)?.as_str().parse().ok()?;
        let total: u64 = caps.get(2)?.as_str().parse().ok()?;
        if total == 0 || completed > total {
            return None;
        }

        Some(ProgressUpdate {
            percent: Some((completed as f64 / total as f64 * 100.0) as f32),
            ..Default::default()
        })
    }

    /// Any line carrying a percentage, with byte amounts and speed when present.
    fn parse_percent_line(&self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.percent_re.captures(line)?;
        let percent: f64 = caps.get(1)?.as_str().parse().ok()?;

        let mut update = ProgressUpdate {
            percent: Some(percent.clamp(0.0, 100.0) as f32),
            ..Default::default()
        };

        if let Some(caps) = self.size_re.captures(line) {
            let downloaded = parse_size(caps.get(1)?.as_str(), caps.get(2)?.as_str());
            let total = parse_size(caps.get(3)?.as_str(), caps.get(4)?.as_str());
            update.bytes_downloaded = downloaded;
            update.bytes_total = total;
        }

        if let Some(caps) = self.speed_re.captures(line) {
            update.speed_bps = parse_size(caps.get(1)?.as_str(), caps.get(2)?.as_str());
        }

        if let (Some(down), Some(total), Some(speed)) = (
            update.bytes_downloaded,
            update.bytes_total,
            update.speed_bps,
        ) {
            if speed > 0 && total >= down {
                update.eta_secs = Some((total - down) / speed);
            }
        }

        if let Some(caps) = self.artifact_re.captures(line) {
            update.artifact = Some(caps.get(1)?.as_str().to_string());
        }

        Some(update)
    }
}

/// Convert an amount with a unit suffix to bytes. Binary multiples, exact.
fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier: u64 = match unit {
        "B" => 1,
        "KB" | "KiB" => 1024,
        "MB" | "MiB" => 1024 * 1024,
        "GB" | "GiB" => 1024 * 1024 * 1024,
        "TB" | "TiB" => 1024u64.pow(4),
        _ => return None,
    };
    Some((value * multiplier as f64).round() as u64)
}
