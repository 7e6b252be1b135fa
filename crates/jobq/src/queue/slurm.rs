use std::{collections::HashSet, process::Command, time::Duration};

use super::{Queue, QueueError, SubQueue, Submit};

/// Slurm is a type for holding the information for submitting a slurm job.
#[derive(Debug)]
pub struct Slurm {
    sleep_int: usize,
    timeout: Option<Duration>,
    endpoint: Option<String>,
    pub(crate) template: Option<String>,
}

impl Slurm {
    pub fn new(
        sleep_int: usize,
        timeout: Option<Duration>,
        endpoint: Option<String>,
        template: Option<String>,
    ) -> Self {
        Self {
            sleep_int,
            timeout,
            endpoint,
            template,
        }
    }
}

impl Submit for Slurm {}

impl Queue for Slurm {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn default_submit_script(&self) -> String {
        "#!/bin/bash
#SBATCH --job-name={{.basename}}
#SBATCH --ntasks=1
#SBATCH --cpus-per-task=1
#SBATCH --no-requeue
#SBATCH --mem=8gb
#SBATCH -o {{.filename}}.out
"
        .to_owned()
    }
}

impl SubQueue for Slurm {
    const SCRIPT_EXT: &'static str = "slurm";

    fn submit_command(&self) -> &str {
        "sbatch"
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// run `squeue -u $USER`. form of the output is:
    ///
    ///    JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
    /// 30627992   compute  c3oh-   mdavis  R 46-17:12:23      1 node2
    fn stat_cmd(&self) -> Result<String, QueueError> {
        let user = std::env::var("USER").map_err(|_| {
            QueueError::Status("couldn't find $USER env var".to_owned())
        })?;
        let status = Command::new("squeue")
            .args(["-u", &user])
            .output()
            .map_err(|e| {
                QueueError::Status(format!("failed to run squeue with {e}"))
            })?;
        if !status.status.success() {
            return Err(QueueError::Status(format!(
                "squeue failed with `{}`",
                String::from_utf8_lossy(&status.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&status.stdout).into_owned())
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        parse_squeue(&self.stat_cmd()?)
    }
}

fn parse_squeue(output: &str) -> Result<HashSet<String>, QueueError> {
    let mut ret = HashSet::new();
    for line in output.lines() {
        if line.contains("JOBID") || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<_> = line.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(QueueError::Status(format!(
                "unexpected squeue line `{line}`"
            )));
        }
        // exclude completing jobs to combat stuck completing bug
        if fields[4] != "CG" {
            ret.insert(fields[0].to_string());
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn slurm() -> Slurm {
        Slurm {
            sleep_int: 1,
            timeout: None,
            endpoint: Some("tcp://10.0.0.1:8786".to_owned()),
            template: None,
        }
    }

    #[test]
    fn default_script() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        slurm()
            .write_submit_script(
                ["(cd pts/0 && worker geom.xyz)".to_owned()],
                tmp.path(),
            )
            .unwrap();
        let got = std::fs::read_to_string(tmp).unwrap();
        let got: Vec<&str> = got
            .lines()
            .filter(|l| {
                !(l.starts_with("#SBATCH --job-name")
                    || l.starts_with("#SBATCH -o"))
            })
            .collect();
        let got = got.join("\n");
        assert_snapshot!(got);
    }

    #[test]
    fn user_template() {
        let mut q = slurm();
        q.template = Some(
            "#!/bin/bash\n#SBATCH --job-name={{.basename}}\n\
             #SBATCH --partition=gpu\n"
                .to_owned(),
        );
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("job.slurm");
        q.write_submit_script(["run".to_owned()], &script).unwrap();
        let got = std::fs::read_to_string(&script).unwrap();
        assert_eq!(
            got,
            "#!/bin/bash
#SBATCH --job-name=job.slurm
#SBATCH --partition=gpu
export QMREF_ENDPOINT='tcp://10.0.0.1:8786'
run
"
        );
    }

    #[test]
    fn squeue() {
        let got = parse_squeue(
            "   JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
30627992   compute  c3oh-   mdavis  R 46-17:12:23      1 node2
30627993   compute  c3oh-   mdavis CG       0:01      1 node3
30627994   compute  c3oh-   mdavis PD       0:00      1 (Priority)
",
        )
        .unwrap();
        assert_eq!(
            got,
            HashSet::from(["30627992".to_owned(), "30627994".to_owned()])
        );
        assert!(parse_squeue("garbage line\n").is_err());
    }
}
