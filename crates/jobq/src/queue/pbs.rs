use std::{collections::HashSet, path::Path, process::Command, time::Duration};

use super::{Queue, QueueError, SubQueue, Submit, submit_inner};

/// Pbs is a type for holding the information for submitting a pbs job.
#[derive(Debug)]
pub struct Pbs {
    pub sleep_int: usize,
    pub timeout: Option<Duration>,
    pub endpoint: Option<String>,
    pub template: Option<String>,
}

impl Pbs {
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

impl Submit for Pbs {
    /// submit `filename` with qsub. qsub reports ids like `819446.maple`, but
    /// qstat only shows the numeric part, so the server suffix is dropped
    fn submit(&self, filename: &Path) -> Result<String, QueueError> {
        let mut cmd = Command::new(self.submit_command());
        cmd.arg(filename);
        let id = submit_inner(&mut cmd, filename, self.sleep_int)?;
        Ok(strip_server(&id).to_owned())
    }
}

fn strip_server(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}

impl Queue for Pbs {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn default_submit_script(&self) -> String {
        "#!/bin/sh
#PBS -N {{.basename}}
#PBS -S /bin/bash
#PBS -j oe
#PBS -o {{.filename}}.out
#PBS -W umask=022
#PBS -l walltime=1000:00:00
#PBS -l ncpus=1
#PBS -l mem=8gb

cd $PBS_O_WORKDIR
"
        .to_owned()
    }
}

impl SubQueue for Pbs {
    const SCRIPT_EXT: &'static str = "pbs";

    fn submit_command(&self) -> &str {
        "qsub"
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// run `qstat -u $USER`. form of the output is:
    ///
    /// maple:
    ///                                                     Req'd  Req'd   Elap
    /// Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
    /// ------- -------- -------- ---------- ------ --- --- ------ ----- - -----
    /// 819446  user     queue    C6HNpts      5085   1   1    8gb 26784 R 00:00
    fn stat_cmd(&self) -> Result<String, QueueError> {
        let user = std::env::var("USER").map_err(|_| {
            QueueError::Status("couldn't find $USER env var".to_owned())
        })?;
        let status = Command::new("qstat")
            .args(["-u", &user])
            .output()
            .map_err(|e| {
                QueueError::Status(format!(
                    "failed to run `qstat -u {user}` with {e}"
                ))
            })?;
        if !status.status.success() {
            return Err(QueueError::Status(format!(
                "qstat failed with `{}`",
                String::from_utf8_lossy(&status.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&status.stdout).into_owned())
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        parse_qstat(&self.stat_cmd()?)
    }
}

fn parse_qstat(output: &str) -> Result<HashSet<String>, QueueError> {
    let mut ret = HashSet::new();
    // skip to the end of the header, marked by a line of dashed rules
    let lines = output
        .lines()
        .skip_while(|l| {
            !(l.trim_start().starts_with("---")
                && l.chars().all(|c| c == '-' || c.is_whitespace()))
        })
        .skip(1);
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<_> = line.split_whitespace().collect();
        if fields.len() != 11 {
            return Err(QueueError::Status(format!(
                "unexpected qstat line `{line}`"
            )));
        }
        ret.insert(strip_server(fields[0]).to_string());
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn pbs() -> Pbs {
        Pbs {
            sleep_int: 1,
            timeout: None,
            endpoint: None,
            template: None,
        }
    }

    #[test]
    fn default_script() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        pbs()
            .write_submit_script(
                [
                    "(cd pts/0 && worker geom.xyz)".to_owned(),
                    "(cd pts/1 && worker geom.xyz)".to_owned(),
                ],
                tmp.path(),
            )
            .unwrap();
        let got = std::fs::read_to_string(tmp).unwrap();
        let got: Vec<&str> = got
            .lines()
            .filter(|l| !(l.starts_with("#PBS -N") || l.starts_with("#PBS -o")))
            .collect();
        let got = got.join("\n");
        assert_snapshot!(got);
    }

    #[test]
    fn qstat() {
        let got = parse_qstat(
            "
maple:
                                                    Req'd  Req'd   Elap
Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
------- -------- -------- ---------- ------ --- --- ------ ----- - -----
819446  user     queue    C6HNpts      5085   1   1    8gb 26784 R 00:00
819447.maple  user     queue    C6HNpts      5086   1   1    8gb 26784 Q 00:00
",
        )
        .unwrap();
        assert_eq!(
            got,
            HashSet::from(["819446".to_owned(), "819447".to_owned()])
        );
    }

    #[test]
    fn qstat_no_jobs() {
        let got = parse_qstat(
            "
maple:
                                                    Req'd  Req'd   Elap
Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
------- -------- -------- ---------- ------ --- --- ------ ----- - -----
",
        )
        .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn qstat_bad_line() {
        let got = parse_qstat(
            "
Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
------- -------- -------- ---------- ------ --- --- ------ ----- - -----
819446  user     queue
",
        );
        assert!(matches!(got, Err(QueueError::Status(_))));
    }

    #[test]
    fn qstat_empty() {
        assert!(parse_qstat("").unwrap().is_empty());
    }

    #[test]
    fn server_suffix() {
        assert_eq!(strip_server("819446.maple"), "819446");
        assert_eq!(strip_server("819446"), "819446");
    }
}
