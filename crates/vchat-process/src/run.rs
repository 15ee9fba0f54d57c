//! A single running worker and its event sequence.

use std::fmt;
use std::io;
use std::time::Duration;

use futures_util::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use vchat_models::JobId;

/// Default longest stdout/stderr line kept, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long to wait for stderr to drain once the process has exited.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Identifies one worker invocation for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, `None` if the process was terminated by a signal
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// One observation of a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A line printed on standard output, without its line terminator
    Line(String),
    /// The process ended; always the last event of a run
    Exited(WorkerExit),
}

/// A launched worker bound to exactly one job.
///
/// Events come out in the order the worker produced them. The exit event is
/// only produced after standard output reached end-of-file, so every line
/// the worker printed before exiting is observed first. Once the exit event
/// has been returned the sequence is finished for good.
pub struct WorkerRun {
    job_id: JobId,
    run_id: RunId,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    line_buf: Vec<u8>,
    max_line_len: usize,
    stderr_task: Option<JoinHandle<()>>,
    finished: bool,
}

impl WorkerRun {
    pub(crate) fn new(job_id: JobId, mut child: Child, max_line_len: usize) -> Self {
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(job_id.clone(), stderr, max_line_len)));

        Self {
            job_id,
            run_id: RunId::new(),
            child,
            stdout,
            line_buf: Vec::new(),
            max_line_len,
            stderr_task,
            finished: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the exit event has already been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next event of the run, or `None` once the exit event was returned.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        if self.finished {
            return None;
        }

        if let Some(line) = self.next_stdout_line().await {
            return Some(WorkerEvent::Line(line));
        }

        let exit = match self.child.wait().await {
            Ok(status) => WorkerExit { code: status.code() },
            Err(e) => {
                warn!(job_id = %self.job_id, run_id = %self.run_id, error = %e, "Failed to wait for worker");
                WorkerExit { code: None }
            }
        };
        self.finished = true;

        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_FLUSH_TIMEOUT, task).await.is_err() {
                debug!(job_id = %self.job_id, run_id = %self.run_id, "Worker stderr still open after exit");
            }
        }

        debug!(job_id = %self.job_id, run_id = %self.run_id, %exit, "Worker exited");
        Some(WorkerEvent::Exited(exit))
    }

    /// Read the next stdout line; `None` once stdout is closed or broken.
    ///
    /// Lines longer than the cap are skipped whole.
    async fn next_stdout_line(&mut self) -> Option<String> {
        loop {
            let reader = self.stdout.as_mut()?;
            self.line_buf.clear();

            match read_capped_line(reader, &mut self.line_buf, self.max_line_len).await {
                Ok(LineRead::Line) => return Some(decode_line(&self.line_buf)),
                Ok(LineRead::Oversized(len)) => {
                    warn!(
                        job_id = %self.job_id,
                        run_id = %self.run_id,
                        len,
                        max = self.max_line_len,
                        "Dropping oversized worker output line"
                    );
                }
                Ok(LineRead::Eof) => break,
                Err(e) => {
                    warn!(job_id = %self.job_id, run_id = %self.run_id, error = %e, "Worker stdout read failed");
                    break;
                }
            }
        }

        self.stdout = None;
        self.line_buf.clear();
        None
    }

    /// Force-terminate the worker. Pending output is discarded.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.stdout = None;
        self.line_buf.clear();
        self.child.kill().await
    }

    /// Consume the run as a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = WorkerEvent> + Send {
        futures_util::stream::unfold(self, |mut run| async move {
            let event = run.next_event().await?;
            Some((event, run))
        })
    }
}

impl Drop for WorkerRun {
    fn drop(&mut self) {
        if !self.finished {
            debug!(job_id = %self.job_id, run_id = %self.run_id, "Worker run dropped before exit");
        }
    }
}

impl fmt::Debug for WorkerRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRun")
            .field("job_id", &self.job_id)
            .field("run_id", &self.run_id)
            .field("pid", &self.child.id())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    /// Line of this many bytes was consumed but not kept
    Oversized(usize),
    Eof,
}

/// Read one line into `buf`, keeping at most `max` bytes.
///
/// A longer line is still consumed up to its terminator so the next read
/// starts on a fresh line; `buf` is left empty for it. The last line may
/// lack a terminator.
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    let mut oversized = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !oversized && buf.len() + used <= max {
            buf.extend_from_slice(&available[..used]);
        } else {
            oversized = true;
            buf.clear();
        }
        total += used;
        reader.consume(used);

        if complete {
            break;
        }
    }

    Ok(match (total, oversized) {
        (0, _) => LineRead::Eof,
        (_, true) => LineRead::Oversized(total),
        _ => LineRead::Line,
    })
}

/// Log worker stderr line by line. Never parsed.
async fn drain_stderr<R>(job_id: JobId, stderr: R, max_line_len: usize)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf, max_line_len).await {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Line) => {
                let line = decode_line(&buf);
                if !line.trim().is_empty() {
                    warn!(job_id = %job_id, "Worker stderr: {}", line);
                }
            }
            Ok(LineRead::Oversized(len)) => {
                warn!(job_id = %job_id, len, "Worker stderr: oversized line dropped");
            }
            Err(e) => {
                debug!(job_id = %job_id, error = %e, "Worker stderr closed");
                break;
            }
        }
    }
}
