//! Terminal rendering of workflow progress. Each phase owns one console line: a
//! spinner while the phase works, a trial counter while a batch runs.

use bicmobo::engine::progress::{Progress, ProgressCallback};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const EVENT_QUEUE: usize = 1024;
const REFRESH_HZ: u8 = 12;

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

pub struct UiManager {
    console: MultiProgress,
    /// Line of the running phase; its prefix is the phase name.
    phase: Option<ProgressBar>,
    events: mpsc::Receiver<UiEvent>,
    shutdown: watch::Receiver<bool>,
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        Self::with_target(ProgressDrawTarget::stderr_with_hz(REFRESH_HZ))
    }

    fn with_target(target: ProgressDrawTarget) -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, events) = mpsc::channel(EVENT_QUEUE);
        let (shutdown_sender, shutdown) = watch::channel(false);
        let manager = Self {
            console: MultiProgress::with_draw_target(target),
            phase: None,
            events,
            shutdown,
        };
        (manager, event_sender, shutdown_sender)
    }

    /// Renders events until shutdown is signalled or every sender is gone, then
    /// renders what is still queued.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
            }
        }
        self.drain();
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }
        self.end_phase();
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(line) => self.print(line),
            UiEvent::Progress(Progress::PhaseStart { name }) => self.begin_phase(name),
            UiEvent::Progress(Progress::PhaseFinish) => self.end_phase(),
            UiEvent::Progress(Progress::TaskStart { total_steps }) => self.start_batch(total_steps),
            UiEvent::Progress(Progress::TaskIncrement) => self.advance(),
            UiEvent::Progress(Progress::TaskFinish) => self.finish_batch(),
            UiEvent::Progress(Progress::StatusUpdate { text }) => self.set_status(text),
            UiEvent::Progress(Progress::Message(text)) => self.print(format!("  {}", text)),
        }
    }

    fn print(&self, line: String) {
        if self.console.println(&line).is_err() {
            eprintln!("{}", line);
        }
    }

    fn begin_phase(&mut self, name: &'static str) {
        self.end_phase();
        let bar = self.console.add(ProgressBar::new_spinner());
        bar.set_style(phase_style());
        bar.set_prefix(name);
        bar.enable_steady_tick(Duration::from_millis(80));
        self.phase = Some(bar);
    }

    fn end_phase(&mut self) {
        if let Some(bar) = self.phase.take() {
            bar.finish_and_clear();
            self.console.remove(&bar);
        }
    }

    fn start_batch(&mut self, trials: u64) {
        let Some(bar) = &self.phase else {
            return;
        };
        bar.disable_steady_tick();
        bar.set_style(batch_style());
        bar.set_length(trials);
        bar.set_position(0);
        bar.set_message("");
    }

    fn advance(&mut self) {
        if let Some(bar) = &self.phase {
            bar.inc(1);
        }
    }

    fn finish_batch(&mut self) {
        if let Some(bar) = &self.phase {
            bar.finish();
        }
    }

    fn set_status(&mut self, text: String) {
        if let Some(bar) = &self.phase {
            bar.set_message(text);
        }
    }
}

fn phase_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {msg:.dim}")
        .expect("static spinner template")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn batch_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold:<12} [{bar:36.cyan/blue}] {pos}/{len} trials {msg:.dim} ({elapsed_precise})",
    )
    .expect("static batch template")
    .progress_chars("━╸ ")
}

/// Forwards library progress into the UI queue without blocking the workflow.
#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
    dropped: Arc<AtomicU64>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let sender = self.sender.clone();
        let dropped = Arc::clone(&self.dropped);
        Box::new(move |progress: Progress| {
            if sender.try_send(UiEvent::Progress(progress)).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    /// Events that found the queue full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
