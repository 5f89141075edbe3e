use std::io::Write as _;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub(crate) fn init(start: Instant, enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || thread_main(start, enable_progress, receiver))
        .expect("failed to spawn thread");

    Handle {
        join_handle,
        sender,
    }
}

const REDRAW_PERIOD: Duration = Duration::from_millis(100);

enum Command {
    Finish,
    PrintRawLine(Vec<u8>),
    SetProgress(String),
    FreezeProgress,
}

fn thread_main(start: Instant, enable_progress: bool, receiver: mpsc::Receiver<Command>) {
    let mut stderr = std::io::stderr();
    let mut progress = None::<String>;
    let mut last_draw = start;

    loop {
        let cmd = if progress.is_some() {
            match receiver.recv_timeout(Duration::from_secs(1)) {
                Ok(cmd) => Some(cmd),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    draw_progress(&mut stderr, start, progress.as_deref().unwrap());
                    last_draw = Instant::now();
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => None,
            }
        } else {
            receiver.recv().ok()
        };

        match cmd {
            None | Some(Command::Finish) => {
                if progress.take().is_some() {
                    end_progress_line(&mut stderr);
                }
                break;
            }
            Some(Command::PrintRawLine(line)) => {
                if let Some(ref progress) = progress {
                    handle_err(crossterm::queue!(
                        stderr,
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    handle_err(stderr.write_all(&line));
                    draw_progress(&mut stderr, start, progress);
                } else {
                    handle_err(stderr.write_all(&line));
                    handle_err(stderr.flush());
                }
            }
            Some(Command::SetProgress(new_progress)) => {
                if enable_progress {
                    if last_draw.elapsed() >= REDRAW_PERIOD {
                        draw_progress(&mut stderr, start, &new_progress);
                        last_draw = Instant::now();
                    }
                    progress = Some(new_progress);
                }
            }
            Some(Command::FreezeProgress) => {
                if let Some(progress) = progress.take() {
                    draw_progress(&mut stderr, start, &progress);
                    end_progress_line(&mut stderr);
                }
            }
        }
    }
}

fn draw_progress(stderr: &mut std::io::Stderr, start: Instant, line: &str) {
    let elapsed = start.elapsed().as_secs();
    let progress_line = format!("[{}] {line}", format_duration(elapsed));
    handle_err(crossterm::queue!(
        stderr,
        crossterm::cursor::MoveToColumn(0),
        crossterm::style::Print(progress_line),
        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
    ));
    handle_err(stderr.flush());
}

fn end_progress_line(stderr: &mut std::io::Stderr) {
    handle_err(crossterm::queue!(
        stderr,
        crossterm::style::Print('\n'),
        crossterm::cursor::MoveToColumn(0),
    ));
    handle_err(stderr.flush());
}

fn handle_err<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

pub(crate) fn format_duration(total_secs: u64) -> String {
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{hours:02}:{mins:02}:{secs:02}")
}

pub(crate) struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl Handle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Finish)
            .expect("term out endpoint closed");
        self.join_handle.join().expect("term out thread panicked");
    }

    pub(crate) fn get_progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProgressPrint {
    sender: mpsc::Sender<Command>,
}

impl ProgressPrint {
    pub(crate) fn set_progress(&self, progress: String) {
        self.sender
            .send(Command::SetProgress(progress))
            .expect("term out endpoint closed");
    }

    pub(crate) fn freeze_progress(&self) {
        self.sender
            .send(Command::FreezeProgress)
            .expect("term out endpoint closed");
    }

    pub(crate) fn print_raw_line(&self, line: Vec<u8>) {
        self.sender
            .send(Command::PrintRawLine(line))
            .expect("term out endpoint closed");
    }
}

/// Estimates the remaining time of a long-running operation from the
/// fraction of work already done.
pub(crate) struct EtaTracker {
    start: Instant,
}

impl EtaTracker {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub(crate) fn eta_suffix(&self, done: u64, total: u64) -> String {
        match estimate_remaining(self.start.elapsed(), done, total) {
            Some(remaining) => {
                format!(" - eta {}", format_duration(remaining.as_secs()))
            }
            None => String::new(),
        }
    }
}

fn estimate_remaining(elapsed: Duration, done: u64, total: u64) -> Option<Duration> {
    if done == 0 || done >= total {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / done as f64;
    Some(Duration::from_secs_f64(per_item * (total - done) as f64))
}
