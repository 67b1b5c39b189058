//! Frame recorder.
//!
//! Appends one `{"ts", "dir", "frame"}` JSON line per frame to a file.

use crate::IpcResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Serialize)]
struct Record<'a, T: Serialize> {
    ts: String,
    dir: Direction,
    frame: &'a T,
}

pub struct FrameRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl FrameRecorder {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: &Path) -> IpcResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Recording control frames");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Failures are logged and otherwise ignored.
    pub fn record<T: Serialize>(&self, dir: Direction, frame: &T) {
        let record = Record {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            dir,
            frame,
        };
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize frame record");
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.file.lock().write_all(line.as_bytes()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write frame record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol_types::ControlFrame;
    use tempfile::TempDir;

    #[test]
    fn test_records_are_appended_as_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("frames.jsonl");

        let recorder = FrameRecorder::open(&path).unwrap();
        recorder.record(Direction::In, &ControlFrame::Grant { n: 1 });
        recorder.record(Direction::Out, &ControlFrame::ok("r1", serde_json::json!({})));
        drop(recorder);

        let reopened = FrameRecorder::open(&path).unwrap();
        reopened.record(Direction::In, &ControlFrame::Ack { id: "a".to_string() });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["dir"], "in");
        assert_eq!(lines[0]["frame"]["type"], "grant");
        assert_eq!(lines[1]["dir"], "out");
        assert_eq!(lines[2]["frame"]["id"], "a");
        assert!(lines[0]["ts"].as_str().unwrap().ends_with('Z'));
    }
}
