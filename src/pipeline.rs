//! Runs a chain of external processes over an in-memory input.
//!
//! Every byte transfer (the input write into the first stage and each copy between
//! consecutive stages) runs on its own thread, started before the caller begins draining
//! the last stage into a [`Sink`]. No thread both fills and drains the same pipe, so the
//! chain cannot stall on bounded OS pipe buffers regardless of payload size.

use crate::sink::{Sink, SinkError};
use log::{debug, warn};
use std::fmt;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Treat a non-zero exit of any stage as a failure.
    pub check_exit_status: bool,
    /// Kill every stage once this much time has passed since the invocation started.
    pub timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            check_exit_status: true,
            timeout: None,
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    EmptyChain,
    MissingStream { stage: usize, stream: &'static str },
    Spawn { program: String, source: io::Error },
    /// I/O failure on the input write, a stage-to-stage copy or a wait for exit.
    Transfer { transfer: String, source: io::Error },
    Sink(SinkError),
    ExitStatus { stage: usize, status: ExitStatus },
    Timeout(Duration),
    ThreadPanicked(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::EmptyChain => write!(f, "Pipeline has no stages"),
            PipelineError::MissingStream { stage, stream } => {
                write!(f, "Stage {stage} was spawned without a piped {stream}")
            }
            PipelineError::Spawn { program, source } => {
                write!(f, "Failed to spawn '{program}': {source}")
            }
            PipelineError::Transfer { transfer, source } => {
                write!(f, "Pipeline transfer '{transfer}' failed: {source}")
            }
            PipelineError::Sink(e) => write!(f, "Pipeline output could not be consumed: {e}"),
            PipelineError::ExitStatus { stage, status } => {
                write!(f, "Stage {stage} terminated unsuccessfully ({status})")
            }
            PipelineError::Timeout(timeout) => {
                write!(f, "Pipeline did not finish within {:.1}s", timeout.as_secs_f64())
            }
            PipelineError::ThreadPanicked(name) => write!(f, "Pipeline thread '{name}' panicked"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Spawn { source, .. } | PipelineError::Transfer { source, .. } => {
                Some(source)
            }
            PipelineError::Sink(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PipelineError> for io::Error {
    fn from(e: PipelineError) -> Self {
        io::Error::other(e)
    }
}

/// Render a command the way it would be typed in a shell, for logging.
pub fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Build a command from an argument vector (`argv[0]` is the program).
pub fn command_from_argv<S: AsRef<str>>(argv: &[S]) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut command = Command::new(program.as_ref());
    command.args(args.iter().map(|arg| arg.as_ref()));
    Some(command)
}

/// Spawn every command with piped stdin and stdout. Stderr stays as configured.
///
/// If any spawn fails, the stages already started are killed and reaped.
pub fn spawn_chain(commands: &mut [Command]) -> Result<Vec<Child>, PipelineError> {
    if commands.is_empty() {
        return Err(PipelineError::EmptyChain);
    }

    let mut children: Vec<Child> = Vec::with_capacity(commands.len());
    for command in commands.iter_mut() {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        debug!("Spawning stage {}: {}", children.len(), describe_command(command));
        match command.spawn() {
            Ok(child) => children.push(child),
            Err(source) => {
                kill_and_reap(&mut children);
                return Err(PipelineError::Spawn {
                    program: command.get_program().to_string_lossy().into_owned(),
                    source,
                });
            }
        }
    }
    Ok(children)
}

/// Spawn `commands` and run them over `input`, draining the last stage into `sink`.
pub fn run_commands<S: Sink>(
    input: Vec<u8>,
    sink: &mut S,
    commands: &mut [Command],
    options: &PipelineOptions,
) -> Result<(), PipelineError> {
    let processes = spawn_chain(commands)?;
    run_pipeline(input, sink, processes, options)
}

/// Feed `input` into the first process, connect each process to the next and drain the
/// last one into `sink` on the calling thread.
///
/// Returns after the sink has seen end-of-stream, every stage has exited and every
/// transfer thread has been joined. When several things fail, the reported error is the
/// first of: timeout, sink failure, non-zero exit, transfer failure. The rest are logged.
pub fn run_pipeline<S: Sink>(
    input: Vec<u8>,
    sink: &mut S,
    mut processes: Vec<Child>,
    options: &PipelineOptions,
) -> Result<(), PipelineError> {
    if processes.is_empty() {
        return Err(PipelineError::EmptyChain);
    }
    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    debug!(
        "Running {}-stage pipeline on {} input bytes",
        processes.len(),
        input.len()
    );

    let streams = match ChainStreams::take(&mut processes) {
        Ok(streams) => streams,
        Err(e) => {
            kill_and_reap(&mut processes);
            return Err(e);
        }
    };

    let mut transfers: Vec<Transfer> = Vec::with_capacity(processes.len());
    let started = start_transfers(input, streams.input, streams.links, &mut transfers);
    let watchdog = match (started, deadline) {
        (Ok(()), Some(deadline)) => {
            let pids = processes.iter().map(Child::id).collect();
            Watchdog::start(pids, deadline).map(Some)
        }
        (Ok(()), None) => Ok(None),
        (Err(e), _) => Err(e),
    };
    let watchdog = match watchdog {
        Ok(watchdog) => watchdog,
        Err(source) => {
            kill_and_reap(&mut processes);
            join_transfers(transfers);
            return Err(PipelineError::Transfer {
                transfer: "thread start".to_string(),
                source,
            });
        }
    };

    // The stream is dropped inside the sink, which lets upstream stages observe a broken
    // pipe if the drain stops early
    let drained = sink.handle_stream(streams.output);
    if drained.is_err() {
        for child in processes.iter_mut() {
            let _ = child.kill();
        }
    }

    let mut timed_out = match watchdog {
        Some(watchdog) => watchdog.stop(),
        None => false,
    };
    let (statuses, wait_timed_out) = wait_all(&mut processes, deadline);
    timed_out |= wait_timed_out;
    let transfer_errors = join_transfers(transfers);

    let mut errors = Vec::new();
    if timed_out {
        errors.push(PipelineError::Timeout(options.timeout.unwrap_or_default()));
    }
    if let Err(e) = drained {
        errors.push(PipelineError::Sink(e));
    }
    let mut wait_errors = Vec::new();
    for (stage, status) in statuses.into_iter().enumerate() {
        match status {
            Ok(status) if status.success() => {}
            Ok(status) if options.check_exit_status => {
                errors.push(PipelineError::ExitStatus { stage, status })
            }
            Ok(status) => debug!("Stage {stage} exited with {status}, accepted"),
            Err(source) => wait_errors.push(PipelineError::Transfer {
                transfer: format!("wait for stage {stage}"),
                source,
            }),
        }
    }
    errors.extend(transfer_errors);
    errors.extend(wait_errors);

    let mut errors = errors.into_iter();
    match errors.next() {
        None => Ok(()),
        Some(first) => {
            for other in errors {
                warn!("Additional pipeline failure: {other}");
            }
            Err(first)
        }
    }
}

struct ChainStreams {
    input: ChildStdin,
    /// Output of stage `i` paired with the input of stage `i + 1`
    links: Vec<(ChildStdout, ChildStdin)>,
    output: ChildStdout,
}

impl ChainStreams {
    fn take(processes: &mut [Child]) -> Result<Self, PipelineError> {
        let mut stdins = Vec::with_capacity(processes.len());
        let mut stdouts = Vec::with_capacity(processes.len());
        for (stage, child) in processes.iter_mut().enumerate() {
            stdins.push(child.stdin.take().ok_or(PipelineError::MissingStream {
                stage,
                stream: "stdin",
            })?);
            stdouts.push(child.stdout.take().ok_or(PipelineError::MissingStream {
                stage,
                stream: "stdout",
            })?);
        }

        let mut stdins = stdins.into_iter();
        let input = stdins.next().ok_or(PipelineError::EmptyChain)?;
        let output = stdouts.pop().ok_or(PipelineError::EmptyChain)?;
        let links = stdouts.into_iter().zip(stdins).collect();
        Ok(Self {
            input,
            links,
            output,
        })
    }
}

struct Transfer {
    label: String,
    handle: JoinHandle<io::Result<u64>>,
}

fn spawn_transfer<F>(label: String, transfers: &mut Vec<Transfer>, f: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<u64> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("pipe {label}"))
        .spawn(f)?;
    transfers.push(Transfer { label, handle });
    Ok(())
}

fn start_transfers(
    input: Vec<u8>,
    stdin: ChildStdin,
    links: Vec<(ChildStdout, ChildStdin)>,
    transfers: &mut Vec<Transfer>,
) -> io::Result<()> {
    spawn_transfer("input -> 0".to_string(), transfers, move || {
        let mut stdin = stdin;
        stdin.write_all(&input)?;
        stdin.flush()?;
        Ok(input.len() as u64)
    })?;

    for (stage, (from, to)) in links.into_iter().enumerate() {
        let label = format!("{} -> {}", stage, stage + 1);
        spawn_transfer(label, transfers, move || {
            let mut from = from;
            let mut to = to;
            io::copy(&mut from, &mut to)
        })?;
    }
    Ok(())
}

fn join_transfers(transfers: Vec<Transfer>) -> Vec<PipelineError> {
    let mut errors = Vec::new();
    for Transfer { label, handle } in transfers {
        match handle.join() {
            Ok(Ok(bytes)) => debug!("Transfer {label} moved {bytes} bytes"),
            Ok(Err(source)) => errors.push(PipelineError::Transfer {
                transfer: label,
                source,
            }),
            Err(_) => errors.push(PipelineError::ThreadPanicked(label)),
        }
    }
    errors
}

/// Wait for every stage. With a deadline, stages still running when it passes are killed
/// and the second returned value is `true`.
fn wait_all(
    processes: &mut [Child],
    deadline: Option<Instant>,
) -> (Vec<io::Result<ExitStatus>>, bool) {
    let Some(deadline) = deadline else {
        return (processes.iter_mut().map(Child::wait).collect(), false);
    };

    let mut statuses: Vec<Option<io::Result<ExitStatus>>> =
        processes.iter().map(|_| None).collect();
    let mut timed_out = false;
    loop {
        for (slot, child) in statuses.iter_mut().zip(processes.iter_mut()) {
            if slot.is_none() {
                *slot = child.try_wait().transpose();
            }
        }
        if statuses.iter().all(Option::is_some) {
            break;
        }
        if Instant::now() >= deadline {
            timed_out = true;
            for (slot, child) in statuses.iter_mut().zip(processes.iter_mut()) {
                if slot.is_none() {
                    let _ = child.kill();
                    *slot = Some(child.wait());
                }
            }
            break;
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
    (statuses.into_iter().flatten().collect(), timed_out)
}

fn kill_and_reap(children: &mut [Child]) {
    for child in children.iter_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Kills every stage by pid if the drain has not finished by the deadline.
///
/// Stages are only reaped after the watchdog is stopped, so the pids stay valid while it runs.
struct Watchdog {
    stop: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn start(pids: Vec<u32>, deadline: Instant) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = thread::Builder::new()
            .name("pipe watchdog".to_string())
            .spawn(move || {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(remaining) {
                    warn!("Pipeline deadline passed, killing {} stages", pids.len());
                    flag.store(true, Ordering::SeqCst);
                    for pid in pids {
                        kill_pid(pid);
                    }
                }
            })?;
        Ok(Self {
            stop,
            fired,
            handle,
        })
    }

    /// Returns whether the deadline passed before the stop.
    fn stop(self) -> bool {
        drop(self.stop);
        if self.handle.join().is_err() {
            warn!("Pipeline watchdog panicked");
        }
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    // SAFETY: kill(2) takes plain integers; the pid belongs to an unreaped child
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}
