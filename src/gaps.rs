use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::event::ScanEvent;

/// Result of scanning a JSON-lines scan log for dropped seconds.
///
/// The QR test rig shows one code per second; any second between the first
/// and last observed event with no scan in it was a miss.
pub struct GapReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Distinct seconds that had at least one scan.
    pub observed: usize,
    pub skipped_lines: usize,
    pub missing: Vec<DateTime<Utc>>,
}

pub fn analyze_log(path: &Path) -> Result<GapReport, Error> {
    let contents = fs::read_to_string(path)?;
    analyze(contents.lines())
}

pub fn analyze<'a>(lines: impl Iterator<Item = &'a str>) -> Result<GapReport, Error> {
    let mut seen = BTreeSet::new();
    let mut skipped = 0usize;
    for line in lines.map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<ScanEvent>(line) {
            Ok(event) => {
                // truncate to the second
                seen.insert(event.timestamp.timestamp());
            }
            Err(_) => skipped += 1,
        }
    }

    let (Some(&first), Some(&last)) = (seen.first(), seen.last()) else {
        return Err(Error::EmptyLog);
    };

    let mut missing = Vec::new();
    for sec in first..=last {
        if !seen.contains(&sec) {
            if let Some(ts) = DateTime::from_timestamp(sec, 0) {
                missing.push(ts);
            }
        }
    }

    Ok(GapReport {
        start: DateTime::from_timestamp(first, 0).ok_or(Error::EmptyLog)?,
        end: DateTime::from_timestamp(last, 0).ok_or(Error::EmptyLog)?,
        observed: seen.len(),
        skipped_lines: skipped,
        missing,
    })
}

impl fmt::Display for GapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total duration: {} to {}", self.start, self.end)?;
        writeln!(f, "Seconds with scans: {}", self.observed)?;
        if self.skipped_lines > 0 {
            writeln!(f, "Unparseable lines: {}", self.skipped_lines)?;
        }
        writeln!(f, "Missing seconds ({} total):", self.missing.len())?;
        for ts in &self.missing {
            writeln!(f, "{ts}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn line(sec: u32) -> String {
        format!(
            r#"{{"node":"n","seq":{sec},"barcode":"x","timestamp":"2025-05-04T12:30:{sec:02}.000Z"}}"#
        )
    }

    #[test]
    fn finds_missing_seconds() {
        let log = [line(0), line(1), line(3), line(6)].join("\n");
        let report = analyze(log.lines()).unwrap();
        assert_eq!(report.observed, 4);
        assert_eq!(report.missing.len(), 3);
        let missing: Vec<String> = report
            .missing
            .iter()
            .map(|ts| ts.format("%H:%M:%S").to_string())
            .collect();
        assert_eq!(missing, vec!["12:30:02", "12:30:04", "12:30:05"]);
    }

    #[test]
    fn gapless_log_reports_nothing_missing() {
        let log = [line(0), line(1), line(2), line(3)].join("\n");
        let report = analyze(log.lines()).unwrap();
        assert!(report.missing.is_empty());
    }

    #[test]
    fn same_second_duplicates_collapse() {
        let log = format!("{}\n{}\n{}", line(5), line(5), line(6));
        let report = analyze(log.lines()).unwrap();
        assert_eq!(report.observed, 2);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn garbage_lines_are_counted_and_skipped() {
        let log = format!("{}\nnot json\n\n{}", line(0), line(2));
        let report = analyze(log.lines()).unwrap();
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.missing.len(), 1);
    }

    #[test]
    fn empty_log_is_an_error() {
        assert!(matches!(analyze("".lines()), Err(Error::EmptyLog)));
        assert!(matches!(
            analyze("garbage\nmore garbage".lines()),
            Err(Error::EmptyLog)
        ));
    }

    #[test]
    fn reads_a_log_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.jsonl");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "{}", line(0)).unwrap();
        writeln!(file, "{}", line(2)).unwrap();
        drop(file);

        let report = analyze_log(&path).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].format("%S").to_string(), "01");
    }
}
