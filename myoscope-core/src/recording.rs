//! Raw packet recording.
//!
//! While the recording flag is set, every packet payload delivered by the
//! device is appended to the session file as one line of whitespace-separated
//! decimal values. Stopping flushes and closes the file; the session file can
//! then be copied to its per-subject destination. There is no transactional
//! durability: an abrupt exit loses whatever was buffered.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{MyoscopeError, Result};

/// Session file writer shared by the device callback and the controller.
#[derive(Debug)]
pub struct RecordingSink {
    session_path: PathBuf,
    recording: AtomicBool,
    writer: Mutex<Option<BufWriter<File>>>,
    lines_written: AtomicU64,
}

impl RecordingSink {
    pub fn new(session_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            recording: AtomicBool::new(false),
            writer: Mutex::new(None),
            lines_written: AtomicU64::new(0),
        }
    }

    /// A sink whose session file is named by the current local timestamp.
    pub fn in_dir(recordings_dir: &Path) -> Self {
        Self::new(recordings_dir.join(session_file_name(chrono::Local::now())))
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Lines written since the last `start`.
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Open the session file, truncating earlier content, and start appending.
    pub fn start(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.is_recording() {
            return Err(MyoscopeError::InvalidTransition("already recording"));
        }
        if let Some(parent) = self.session_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.session_path)?;
        *writer = Some(BufWriter::new(file));
        self.lines_written.store(0, Ordering::Relaxed);
        self.recording.store(true, Ordering::Release);
        info!(path = %self.session_path.display(), "recording started");
        Ok(())
    }

    /// Append one packet payload. A no-op unless recording.
    pub fn append_packet(&self, payload: &[u8]) -> Result<()> {
        if !self.is_recording() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        let Some(out) = writer.as_mut() else {
            return Ok(());
        };
        write_line(out, payload)?;
        self.lines_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop appending, flush and close the session file.
    pub fn stop(&self) -> Result<PathBuf> {
        let mut writer = self.writer.lock();
        if !self.recording.swap(false, Ordering::AcqRel) {
            return Err(MyoscopeError::InvalidTransition("not recording"));
        }
        if let Some(mut out) = writer.take() {
            out.flush()?;
        }
        info!(
            path = %self.session_path.display(),
            lines = self.lines_written(),
            "recording stopped"
        );
        Ok(self.session_path.clone())
    }

    /// Copy the closed session file to `destination`, creating its parent
    /// directories.
    pub fn save_copy(&self, destination: &Path) -> Result<()> {
        if self.is_recording() {
            return Err(MyoscopeError::InvalidTransition("recording"));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.session_path, destination).map_err(|e| {
            warn!(
                from = %self.session_path.display(),
                to = %destination.display(),
                "failed to save recording: {e}"
            );
            MyoscopeError::Recording(format!(
                "copy to {} failed: {e}",
                destination.display()
            ))
        })?;
        info!(to = %destination.display(), "recording saved");
        Ok(())
    }
}

fn write_line(out: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    let mut first = true;
    for value in payload {
        if !first {
            out.write_all(b" ")?;
        }
        write!(out, "{value}")?;
        first = false;
    }
    out.write_all(b"\n")
}

/// `<timestamp>.txt`, safe for every filesystem.
pub fn session_file_name<Tz: chrono::TimeZone>(now: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}.txt", now.format("%d%m%Y_%H%M%S"))
}

/// `Subject_<name>/Shift_<shift>/Motion_<motion>_Rep_<rep>.txt` under `root`.
pub fn destination_path(
    root: &Path,
    subject: &str,
    shift: &str,
    motion: u8,
    repetition: u32,
) -> PathBuf {
    root.join(format!("Subject_{subject}"))
        .join(format!("Shift_{shift}"))
        .join(format!("Motion_{motion}_Rep_{repetition}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn writes_one_line_per_packet_only_while_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new(dir.path().join("session.txt"));

        sink.append_packet(&[9, 9, 9]).expect("ignored while idle");
        sink.start().expect("start");
        sink.append_packet(&[1, 2, 3]).expect("append");
        sink.append_packet(&[40, 50, 255]).expect("append");
        let path = sink.stop().expect("stop");
        sink.append_packet(&[7]).expect("ignored after stop");

        let contents = fs::read_to_string(path).expect("read session");
        assert_eq!(contents, "1 2 3\n40 50 255\n");
    }

    #[test]
    fn start_truncates_previous_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new(dir.path().join("nested").join("session.txt"));

        sink.start().expect("start");
        sink.append_packet(&[1]).expect("append");
        sink.stop().expect("stop");

        sink.start().expect("restart");
        sink.append_packet(&[2]).expect("append");
        sink.stop().expect("stop");

        let contents = fs::read_to_string(sink.session_path()).expect("read");
        assert_eq!(contents, "2\n");
        assert_eq!(sink.lines_written(), 1);
    }

    #[test]
    fn double_start_and_stop_without_start_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new(dir.path().join("session.txt"));
        assert!(matches!(sink.stop(), Err(MyoscopeError::InvalidTransition(_))));
        sink.start().expect("start");
        assert!(matches!(sink.start(), Err(MyoscopeError::InvalidTransition(_))));
    }

    #[test]
    fn save_copy_creates_destination_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new(dir.path().join("session.txt"));
        sink.start().expect("start");
        sink.append_packet(&[5, 6]).expect("append");
        sink.stop().expect("stop");

        let dest = destination_path(dir.path(), "7", "2", 3, 4);
        sink.save_copy(&dest).expect("save");
        assert!(dest.ends_with("Subject_7/Shift_2/Motion_3_Rep_4.txt"));
        assert_eq!(fs::read_to_string(dest).expect("read"), "5 6\n");
    }

    #[test]
    fn save_copy_of_missing_session_is_a_recording_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new(dir.path().join("never-started.txt"));
        let err = sink
            .save_copy(&dir.path().join("out.txt"))
            .expect_err("nothing to copy");
        assert!(matches!(err, MyoscopeError::Recording(_)));
    }

    #[test]
    fn session_file_name_is_timestamped() {
        let at = chrono::Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid time");
        assert_eq!(session_file_name(at), "09032024_140507.txt");
    }
}
