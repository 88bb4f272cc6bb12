use crate::error::{CliError, Result};
use crate::ui::UiEvent;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, MakeWriter},
    prelude::*,
};

/// Console log sink that hands each formatted record to the UI task, so log lines are
/// printed above the progress bars instead of through them.
#[derive(Clone)]
pub struct UiLogWriter {
    sender: mpsc::Sender<UiEvent>,
}

impl UiLogWriter {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }
}

impl<'a> MakeWriter<'a> for UiLogWriter {
    type Writer = UiLogLine;

    fn make_writer(&'a self) -> Self::Writer {
        UiLogLine {
            sender: self.sender.clone(),
            buffer: Vec::new(),
        }
    }
}

/// One log record; sent to the UI when the formatter drops it.
pub struct UiLogLine {
    sender: mpsc::Sender<UiEvent>,
    buffer: Vec<u8>,
}

impl Write for UiLogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for UiLogLine {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buffer);
        let line = text.trim_end();
        if line.is_empty() {
            return;
        }
        if self.sender.try_send(UiEvent::Log(line.to_string())).is_err() {
            // UI already gone or saturated.
            eprintln!("{}", line);
        }
    }
}

fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::OFF
    } else {
        match verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

pub fn setup_logging(
    verbosity: u8,
    quiet: bool,
    log_file: &Option<PathBuf>,
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    let console_layer = fmt::layer()
        .with_writer(UiLogWriter::new(ui_sender))
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(console_layer);

    let installed = if let Some(path) = log_file {
        let file = File::create(path).map_err(|e| CliError::FileWriting {
            path: path.clone(),
            source: e,
        })?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_target(true);

        subscriber.with(file_layer).try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use std::thread;
    use std::time::Duration;
    use tracing::{debug, error, info, trace, warn};

    static INIT: Once = Once::new();

    fn ensure_global_logger_is_set() {
        INIT.call_once(|| {
            let (sender, _receiver) = mpsc::channel(16);
            setup_logging(3, false, &None, sender).expect("Failed to set up global logger for tests");
        });
    }

    #[test]
    #[serial]
    fn initialization_and_macros_work() {
        ensure_global_logger_is_set();

        error!("This is an error");
        warn!("This is a warning");
        info!("This is info");
        debug!("This is debug");
        trace!("This is trace");
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    #[serial]
    fn console_records_are_forwarded_to_the_ui() {
        let (sender, mut receiver) = mpsc::channel(16);
        let layer = fmt::layer()
            .with_writer(UiLogWriter::new(sender))
            .with_ansi(false)
            .compact();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            warn!("trial00003 failed");
        });

        match receiver.try_recv().unwrap() {
            UiEvent::Log(line) => {
                assert!(line.contains("WARN"));
                assert!(line.ends_with("trial00003 failed"));
            }
            other => panic!("Unexpected UI event: {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    #[serial]
    fn file_logging_can_be_added_to_global_logger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("test.log");

        let file = File::create(log_path.clone()).unwrap();
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true);
        let subscriber = tracing_subscriber::registry().with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            debug!("Message for file-only test.");
        });

        thread::sleep(Duration::from_millis(100));

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Message for file-only test."));
        assert!(content.contains("DEBUG"));
        assert!(content.contains("ThreadId"));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (sender, _receiver) = mpsc::channel(1);
        let result = setup_logging(0, false, &Some(temp_dir.path().to_path_buf()), sender);
        assert!(matches!(result, Err(CliError::FileWriting { .. })));
    }
}
