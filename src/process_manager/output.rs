// Child output handling
// Splits raw bytes into lines and folds each line into a job record

use crate::models::JobRecord;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PROGRESS_RE: Regex =
        Regex::new(r"(?P<pct>\d{1,3})%").expect("progress pattern is valid");
}

/// Extract the first `NN%` value from a line; out-of-range values yield `None`
pub fn parse_progress(line: &str) -> Option<u8> {
    let captures = PROGRESS_RE.captures(line)?;
    let pct: u32 = captures.name("pct")?.as_str().parse().ok()?;
    if pct <= 100 {
        Some(pct as u8)
    } else {
        None
    }
}

/// Fold one output line into `job`. Returns `false` for blank lines.
///
/// Progress is last-write-wins: a later, smaller value replaces an earlier one
/// unless `monotonic` is set.
pub fn apply_line(job: &mut JobRecord, line: &str, now: f64, monotonic: bool) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    job.last_line = line.to_string();
    job.touch(now);
    job.output_tail.push(line.to_string());

    if let Some(pct) = parse_progress(line) {
        let regressed = job.progress_percent.map_or(false, |prev| pct < prev);
        if !(monotonic && regressed) {
            job.progress_percent = Some(pct);
        }
    }
    true
}

/// Incremental splitter for child output.
///
/// Both `\n` and `\r` end a line so that redrawn progress bars produce one
/// line per redraw. Invalid UTF-8 is replaced, never rejected.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush an unterminated trailing fragment
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
