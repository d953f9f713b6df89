//! Capture from an external encoder process (rpicam-vid, ffmpeg, ...)

use super::reader::pump;
use super::{CaptureError, CaptureFeeder, FrameSource};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Spawns an encoder and streams its stdout into the feeder
pub struct CommandSource {
    argv: Vec<String>,
    chunk_bytes: usize,
    child: Option<Child>,
}

impl CommandSource {
    /// Creates a source for `argv` (program followed by its arguments)
    pub fn new(argv: Vec<String>, chunk_bytes: usize) -> Result<Self, CaptureError> {
        if argv.is_empty() {
            return Err(CaptureError::Pipeline("empty encoder command".to_string()));
        }

        Ok(Self {
            argv,
            chunk_bytes: chunk_bytes.max(1),
            child: None,
        })
    }

    fn spawn(&self) -> Result<Child, CaptureError> {
        info!(command = %self.argv.join(" "), "Starting encoder process");

        let child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        Ok(child)
    }
}

impl FrameSource for CommandSource {
    fn name(&self) -> &'static str {
        "command"
    }

    fn run(&mut self, feeder: &mut CaptureFeeder, stop: &AtomicBool) -> Result<(), CaptureError> {
        let mut child = self.spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Pipeline("encoder stdout not captured".to_string()))?;
        self.child = Some(child);

        let pumped = pump(&mut stdout, self.chunk_bytes, feeder, stop);

        let Some(mut child) = self.child.take() else {
            return pumped;
        };

        if stop.load(Ordering::Relaxed) {
            if let Err(e) = child.kill() {
                warn!(error = %e, "Failed to kill encoder process");
            }
            let _ = child.wait();
            return pumped;
        }

        pumped?;

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(CaptureError::EncoderExited(status.to_string()))
        }
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capture::MIN_BUFFER_BYTES;
    use crate::frame::FrameSlot;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn sh(script: &str) -> CommandSource {
        CommandSource::new(vec!["sh".into(), "-c".into(), script.into()], 4096).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandSource::new(Vec::new(), 4096).is_err());
    }

    #[test]
    fn test_reads_encoder_stdout() {
        let slot = Arc::new(FrameSlot::new());
        let mut feeder = CaptureFeeder::new(Arc::clone(&slot), MIN_BUFFER_BYTES);

        let mut source = sh(r"printf '\377\330AA\377\331\377\330BB\377\331'");
        source.run(&mut feeder, &AtomicBool::new(false)).unwrap();

        assert_eq!(slot.peek().unwrap().data().as_ref(), b"\xFF\xD8AA\xFF\xD9");
    }

    #[test]
    fn test_failing_encoder_is_reported() {
        let slot = Arc::new(FrameSlot::new());
        let mut feeder = CaptureFeeder::new(slot, MIN_BUFFER_BYTES);

        let mut source = sh("exit 3");
        let result = source.run(&mut feeder, &AtomicBool::new(false));
        assert_matches!(result, Err(CaptureError::EncoderExited(_)));
    }

    #[test]
    fn test_missing_program() {
        let slot = Arc::new(FrameSlot::new());
        let mut feeder = CaptureFeeder::new(slot, MIN_BUFFER_BYTES);

        let mut source =
            CommandSource::new(vec!["/nonexistent/encoder".into()], 4096).unwrap();
        let result = source.run(&mut feeder, &AtomicBool::new(false));
        assert_matches!(result, Err(CaptureError::Io(_)));
    }
}
