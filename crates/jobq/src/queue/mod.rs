use std::{
    collections::HashSet,
    fmt::Display,
    path::{Path, PathBuf},
    process::Command,
    thread,
    time::{Duration, Instant},
};

use libc::{RUSAGE_SELF, timeval};

use crate::template::{self, UnknownDirective};

pub mod local;
pub mod pbs;
pub mod slurm;
pub mod timer;

pub use timer::Timer;

/// the environment variable through which submit scripts export the
/// coordination endpoint to the worker command
pub const ENDPOINT_VAR: &str = "QMREF_ENDPOINT";

/// wrap `s` in single quotes so the shell takes it literally
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// the number of times to retry a failed submission before giving up
const MAX_RETRIES: usize = 5;

/// Everything needed to build and submit one job: the directory the job runs
/// in, the base name of its submit script, and the shell commands it runs
#[derive(Clone, Debug, PartialEq)]
pub struct JobSpec {
    pub dir: PathBuf,
    pub name: String,
    pub commands: Vec<String>,
}

impl JobSpec {
    /// the path of the submit script for a queue using `ext` as its script
    /// extension
    pub fn script(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", self.name))
    }
}

/// A submitted job, identified by the id the queue returned for it
#[derive(Clone, Debug)]
pub struct JobHandle {
    pub id: String,
    pub script: PathBuf,
    pub submitted: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// the job is no longer known to the queue
    Done,

    /// the job was still in the queue after the contained duration, which
    /// exceeds the queue's timeout
    TimedOut(Duration),
}

#[derive(Debug)]
pub enum QueueError {
    Io(PathBuf, std::io::Error),

    /// the submit command kept failing, with the last stderr it printed
    Submit { script: PathBuf, msg: String },

    /// the status command failed or printed something unexpected
    Status(String),

    Template(UnknownDirective),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Io(path, e) => {
                write!(f, "failed to access {} with `{e}`", path.display())
            }
            QueueError::Submit { script, msg } => write!(
                f,
                "failed to submit {} after {MAX_RETRIES} retries: {msg}",
                script.display()
            ),
            QueueError::Status(msg) => write!(f, "queue status failed: {msg}"),
            QueueError::Template(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<UnknownDirective> for QueueError {
    fn from(value: UnknownDirective) -> Self {
        Self::Template(value)
    }
}

/// run the submit command in `cmd`, retrying up to [MAX_RETRIES] times with a
/// pause of `sleep_int` seconds between attempts. returns the last
/// whitespace-separated field of the command's stdout, which is where both
/// `sbatch` and `qsub` print the job id
pub(crate) fn submit_inner(
    cmd: &mut Command,
    script: &Path,
    sleep_int: usize,
) -> Result<String, QueueError> {
    let mut retries = MAX_RETRIES;
    loop {
        let s = cmd
            .output()
            .map_err(|e| QueueError::Io(script.to_owned(), e))?;
        if s.status.success() {
            let raw = String::from_utf8_lossy(&s.stdout);
            return Ok(raw.split_whitespace().last().unwrap_or("").to_owned());
        }
        let msg = String::from_utf8_lossy(&s.stderr).trim().to_owned();
        if retries == 0 {
            return Err(QueueError::Submit {
                script: script.to_owned(),
                msg,
            });
        }
        log::warn!(
            "failed to submit {} with `{msg}`, retrying {retries} more times",
            script.display()
        );
        retries -= 1;
        thread::sleep(Duration::from_secs(sleep_int as u64));
    }
}

pub trait Submit: SubQueue {
    /// submit `filename` to the queue and return the jobid
    fn submit(&self, filename: &Path) -> Result<String, QueueError> {
        let mut cmd = Command::new(self.submit_command());
        cmd.arg(filename);
        submit_inner(&mut cmd, filename, self.sleep_int())
    }
}

/// a trait for all of the script-independent parts of a [Queue]
pub trait SubQueue {
    /// the extension to append to submit scripts for this type of Queue
    const SCRIPT_EXT: &'static str;

    fn submit_command(&self) -> &str;

    /// the interval in seconds between status checks
    fn sleep_int(&self) -> usize;

    /// how long to wait for a single job before giving up on it. `None` waits
    /// indefinitely
    fn timeout(&self) -> Option<Duration>;

    /// the output of the command to check the status of jobs in the queue
    fn stat_cmd(&self) -> Result<String, QueueError>;

    /// return a HashSet of jobs found in the queue based on the output of
    /// `stat_cmd`
    fn status(&self) -> Result<HashSet<String>, QueueError>;
}

/// The job-submission capability: write a submit script for a [JobSpec], hand
/// it to the queue, and wait for the queue to finish with it
pub trait Queue: SubQueue + Submit {
    fn default_submit_script(&self) -> String;

    fn template(&self) -> &Option<String>;

    /// the coordination endpoint passed to every job, if any
    fn endpoint(&self) -> Option<&str>;

    /// write a submit script to `filename` running each of `commands` in turn.
    /// the header comes from `self.template` if set, or from
    /// `default_submit_script` otherwise, and may use the `{{.basename}}`,
    /// `{{.filename}}`, and `{{.endpoint}}` directives
    fn write_submit_script(
        &self,
        commands: impl IntoIterator<Item = String>,
        filename: &Path,
    ) -> Result<(), QueueError> {
        use std::fmt::Write;
        let basename = filename
            .file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let fname = filename.to_string_lossy();
        let endpoint = self.endpoint().unwrap_or("");
        let header = self
            .template()
            .clone()
            .unwrap_or_else(|| self.default_submit_script());
        let mut body = template::expand(
            &header,
            &[
                ("basename", basename.as_ref()),
                ("filename", fname.as_ref()),
                ("endpoint", endpoint),
            ],
        )?;
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        if let Some(endpoint) = self.endpoint() {
            writeln!(body, "export {ENDPOINT_VAR}={}", shell_quote(endpoint))
                .unwrap();
        }
        for cmd in commands {
            writeln!(body, "{cmd}").unwrap();
        }
        std::fs::write(filename, body)
            .map_err(|e| QueueError::Io(filename.to_owned(), e))
    }

    /// write the submit script for `spec` into `spec.dir` and submit it
    fn submit_job(&self, spec: &JobSpec) -> Result<JobHandle, QueueError> {
        let script = spec.script(Self::SCRIPT_EXT);
        self.write_submit_script(spec.commands.iter().cloned(), &script)?;
        let id = self.submit(&script)?;
        log::debug!("submitted {} as job {id}", script.display());
        Ok(JobHandle {
            id,
            script,
            submitted: Instant::now(),
        })
    }

    /// block until the job in `handle` leaves the queue or has been waiting
    /// longer than `self.timeout()`
    fn await_completion(
        &self,
        handle: &JobHandle,
    ) -> Result<JobStatus, QueueError> {
        let mut iter = 0;
        loop {
            if !self.status()?.contains(&handle.id) {
                return Ok(JobStatus::Done);
            }
            let elapsed = handle.submitted.elapsed();
            if let Some(timeout) = self.timeout() {
                if elapsed > timeout {
                    log::error!(
                        "job {} ({}) timed out after {:.1} s",
                        handle.id,
                        handle.script.display(),
                        elapsed.as_secs_f64()
                    );
                    return Ok(JobStatus::TimedOut(elapsed));
                }
            }
            wait(self.sleep_int(), iter, &handle.id);
            iter += 1;
        }
    }
}

fn to_secs(time: timeval) -> f64 {
    time.tv_sec as f64 + time.tv_usec as f64 / 1e6
}

/// return the CPU time used by the current process in seconds
fn get_cpu_time() -> f64 {
    unsafe {
        let mut rusage = std::mem::MaybeUninit::uninit();
        let res = libc::getrusage(RUSAGE_SELF, rusage.as_mut_ptr());
        if res != 0 {
            return 0.0;
        }
        let rusage = rusage.assume_init();
        to_secs(rusage.ru_stime) + to_secs(rusage.ru_utime)
    }
}

fn wait(sleep_int: usize, iter: usize, job_id: &str) {
    let date = jiff::Zoned::now().strftime("%Y-%m-%d %H:%M:%S");
    eprintln!(
        "[iter {iter} {date} {:.1} CPU s] waiting on job {job_id}",
        get_cpu_time()
    );
    thread::sleep(Duration::from_secs(sleep_int as u64));
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// a queue whose jobs stay in the queue for a fixed number of polls
    struct Sticky {
        polls: Cell<usize>,
        timeout: Option<Duration>,
        template: Option<String>,
    }

    impl SubQueue for Sticky {
        const SCRIPT_EXT: &'static str = "sh";

        fn submit_command(&self) -> &str {
            "true"
        }

        fn sleep_int(&self) -> usize {
            0
        }

        fn timeout(&self) -> Option<Duration> {
            self.timeout
        }

        fn stat_cmd(&self) -> Result<String, QueueError> {
            Ok(String::new())
        }

        fn status(&self) -> Result<HashSet<String>, QueueError> {
            let n = self.polls.get();
            if n == 0 {
                return Ok(HashSet::new());
            }
            self.polls.set(n - 1);
            Ok(HashSet::from(["7".to_owned()]))
        }
    }

    impl Submit for Sticky {
        fn submit(&self, _filename: &Path) -> Result<String, QueueError> {
            Ok("7".to_owned())
        }
    }

    impl Queue for Sticky {
        fn default_submit_script(&self) -> String {
            "#!/bin/bash\n#NAME {{.basename}}".to_owned()
        }

        fn template(&self) -> &Option<String> {
            &self.template
        }

        fn endpoint(&self) -> Option<&str> {
            Some("tcp://sched:8786")
        }
    }

    #[test]
    fn submit_job_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let q = Sticky {
            polls: Cell::new(0),
            timeout: None,
            template: None,
        };
        let spec = JobSpec {
            dir: dir.path().to_owned(),
            name: "job".to_owned(),
            commands: vec!["echo one".to_owned(), "echo two".to_owned()],
        };
        let handle = q.submit_job(&spec).unwrap();
        assert_eq!(handle.id, "7");
        assert_eq!(handle.script, dir.path().join("job.sh"));
        let got = std::fs::read_to_string(&handle.script).unwrap();
        assert_eq!(
            got,
            "#!/bin/bash
#NAME job.sh
export QMREF_ENDPOINT='tcp://sched:8786'
echo one
echo two
"
        );
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("tcp://h:1"), "'tcp://h:1'");
        assert_eq!(shell_quote("a b;$(rm x)"), "'a b;$(rm x)'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn await_polls_until_done() {
        let q = Sticky {
            polls: Cell::new(3),
            timeout: None,
            template: None,
        };
        let handle = JobHandle {
            id: "7".to_owned(),
            script: PathBuf::from("job.sh"),
            submitted: Instant::now(),
        };
        assert_eq!(q.await_completion(&handle).unwrap(), JobStatus::Done);
        assert_eq!(q.polls.get(), 0);
    }

    #[test]
    fn await_times_out() {
        let q = Sticky {
            polls: Cell::new(usize::MAX),
            timeout: Some(Duration::ZERO),
            template: None,
        };
        let handle = JobHandle {
            id: "7".to_owned(),
            script: PathBuf::from("job.sh"),
            submitted: Instant::now() - Duration::from_secs(1),
        };
        let got = q.await_completion(&handle).unwrap();
        assert!(matches!(got, JobStatus::TimedOut(_)));
    }
}
