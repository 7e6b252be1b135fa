use std::{collections::HashSet, path::Path, process::Command, time::Duration};

use super::{Queue, QueueError, SubQueue, Submit};

/// Minimal implementation for running jobs directly with bash. Each submission
/// runs to completion before `submit` returns, so jobs are never found in the
/// queue afterwards
#[derive(Debug, Default)]
pub struct Local {
    pub template: Option<String>,
    pub endpoint: Option<String>,
}

impl Local {
    pub fn new(template: Option<String>, endpoint: Option<String>) -> Self {
        Self { template, endpoint }
    }
}

impl Submit for Local {
    /// run `filename` with bash and return its path as the job id. a failing
    /// script is logged but not retried, since rerunning it would only repeat
    /// the failure; the missing output is reported by whoever reads it
    fn submit(&self, filename: &Path) -> Result<String, QueueError> {
        let s = Command::new(self.submit_command())
            .arg(filename)
            .output()
            .map_err(|e| QueueError::Io(filename.to_owned(), e))?;
        if !s.status.success() {
            log::warn!(
                "{} exited with {}: `{}`",
                filename.display(),
                s.status,
                String::from_utf8_lossy(&s.stderr).trim()
            );
        }
        Ok(filename.to_string_lossy().into_owned())
    }
}

impl Queue for Local {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn default_submit_script(&self) -> String {
        "#!/bin/bash\n".into()
    }
}

impl SubQueue for Local {
    const SCRIPT_EXT: &'static str = "sh";

    fn submit_command(&self) -> &str {
        "bash"
    }

    fn sleep_int(&self) -> usize {
        1
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn stat_cmd(&self) -> Result<String, QueueError> {
        Ok(String::new())
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        Ok(HashSet::new())
    }
}
