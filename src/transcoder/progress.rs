//! Progress-line parsing (spec.md §4.4 step 2, §9 "text-parsing of
//! transcoder progress"). The four regex captures below *are* the
//! specification for a progress record; anything else on the line is
//! ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub frame: u64,
    pub fps: f64,
    pub time_seconds: f64,
    pub bitrate_kbps: f64,
    pub speed: f64,
}

static FRAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());
static FPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"fps=\s*([0-9]+(?:\.[0-9]+)?)").unwrap());
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").unwrap());
static BITRATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"bitrate=\s*([0-9]+(?:\.[0-9]+)?)kbits/s").unwrap());
static SPEED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"speed=\s*([0-9]+(?:\.[0-9]+)?)x").unwrap());

/// A line is a progress line iff it contains the substring `frame=`
/// (spec.md §4.4 step 2). Returns `None` for any other line.
pub fn parse_progress_line(line: &str) -> Option<ProgressSnapshot> {
    if !line.contains("frame=") {
        return None;
    }
    let frame = FRAME_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);
    let fps = FPS_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    let time_seconds = TIME_RE
        .captures(line)
        .map(|c| {
            let h: f64 = c[1].parse().unwrap_or(0.0);
            let m: f64 = c[2].parse().unwrap_or(0.0);
            let s: f64 = c[3].parse().unwrap_or(0.0);
            let frac: f64 = c
                .get(4)
                .map(|m| format!("0.{}", m.as_str()).parse().unwrap_or(0.0))
                .unwrap_or(0.0);
            h * 3600.0 + m * 60.0 + s + frac
        })
        .unwrap_or(0.0);
    let bitrate_kbps = BITRATE_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    let speed = SPEED_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(ProgressSnapshot {
        frame,
        fps,
        time_seconds,
        bitrate_kbps,
        speed,
    })
}
