//! Configuration settings for a qmref run

use std::{
    collections::HashSet,
    fmt::Display,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::surface::DEFAULT_SCALE_FACTORS;


/// the directives available to the worker command template
pub const COMMAND_DIRECTIVES: [&str; 6] =
    ["dir", "batch", "geom", "surface", "results", "endpoint"];

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Toml(PathBuf, toml::de::Error),

    /// the file parsed but the settings make no sense together
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(p, e) => {
                write!(f, "failed to read {} with `{e}`", p.display())
            }
            ConfigError::Toml(p, e) => write!(
                f,
                "failed to deserialize config file {} with {e}",
                p.display()
            ),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Templates can either be literal strings in the config file, or the name of a
/// file to be loaded
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum TemplateSrc {
    Literal(String),
    File { file: String },
}

impl TemplateSrc {
    fn load(self) -> Result<String, ConfigError> {
        match self {
            TemplateSrc::Literal(s) => Ok(s),
            TemplateSrc::File { file } => read_to_string(&file)
                .map_err(|e| ConfigError::Io(PathBuf::from(file), e)),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    /// A name for the target, used for its output directory unless `dir` is
    /// given.
    name: String,

    /// The multi-frame XYZ file holding the snapshots to compute.
    trajectory: String,

    /// The number of batches, and thus jobs, to split the trajectory into.
    batches: usize,

    /// Whether to sample surface points around each snapshot and request ESP
    /// values at them. Defaults to false.
    esp: Option<bool>,

    /// The directory to hold the batch directories and the final dataset.
    /// Defaults to `name`.
    dir: Option<String>,
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The queuing system to run jobs with. Currently-supported values are
    /// "local", which uses bash to run each job directly, "pbs", and "slurm".
    queue: Queue,

    /// The interval in seconds to wait between checks of the queue for
    /// finished jobs. Defaults to 5.
    sleep_int: Option<usize>,

    /// The address of the coordination service for workers to report to. This
    /// is exported to every job as QMREF_ENDPOINT and can be spliced into
    /// either template with the {{.endpoint}} directive.
    endpoint: Option<String>,

    /// The template for the header of each submit script. Supported formatting
    /// directives are {{.basename}} for the base name of the submit script,
    /// {{.filename}} for its full path, and {{.endpoint}}.
    queue_template: Option<TemplateSrc>,

    /// The command each job runs, from inside its batch directory. Supported
    /// formatting directives are {{.dir}}, {{.batch}}, {{.geom}},
    /// {{.surface}}, {{.results}}, and {{.endpoint}}.
    command: TemplateSrc,

    /// The maximum time in seconds to wait for any one job after it is
    /// submitted. Defaults to waiting forever.
    timeout: Option<u64>,

    /// The seed for surface sampling. Defaults to a random seed, which is
    /// printed so the run can be reproduced.
    seed: Option<u64>,

    /// The factors to scale van der Waals radii by when building sampling
    /// surfaces. Defaults to [1.4, 1.6, 1.8, 2.0].
    scale_factors: Option<Vec<f64>>,

    /// The largest difference in any coordinate, in Å, tolerated between
    /// stored geometries and the trajectory. Defaults to 1e-6.
    tolerance: Option<f64>,

    /// Whether to write each batch's geometry from the trajectory when its
    /// directory is empty. Defaults to true.
    stage: Option<bool>,

    /// Whether to write the finished batches preceding a failed one to
    /// dataset.partial.json. Defaults to false.
    partial: Option<bool>,

    /// The maximum number of threads to use. Defaults to 0, which means to use
    /// as many threads as there are CPUs.
    threads: Option<usize>,

    target: Vec<RawTarget>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Queue {
    #[serde(alias = "pbs")]
    Pbs,
    #[serde(alias = "slurm")]
    Slurm,
    #[serde(alias = "local")]
    Local,
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Queue::Pbs => "pbs",
                Queue::Slurm => "slurm",
                Queue::Local => "local",
            }
        )
    }
}

/// One trajectory to compute reference data for
#[derive(Clone, Serialize, PartialEq, Debug)]
pub struct Target {
    pub name: String,
    pub trajectory: PathBuf,
    pub batches: usize,
    pub esp: bool,

    /// the root of the batch directories
    pub dir: PathBuf,
}

impl From<RawTarget> for Target {
    fn from(rt: RawTarget) -> Self {
        Self {
            dir: PathBuf::from(rt.dir.as_ref().unwrap_or(&rt.name)),
            name: rt.name,
            trajectory: PathBuf::from(rt.trajectory),
            batches: rt.batches,
            esp: rt.esp.unwrap_or(false),
        }
    }
}

/// Construct a full `Config` using [Config::load] on a TOML file
#[derive(Clone, Serialize, PartialEq, Debug)]
pub struct Config {
    pub queue: Queue,

    /// how long to sleep between intervals polling running jobs
    pub sleep_int: usize,

    pub endpoint: Option<String>,

    /// the optional template to use for the queuing system. If this is not
    /// provided, the queue's implementation of
    /// [jobq::queue::Queue::default_submit_script] will be used
    pub queue_template: Option<String>,

    /// the worker command template
    pub command: String,

    /// per-job timeout in seconds
    pub timeout: Option<u64>,

    pub seed: Option<u64>,
    pub scale_factors: Vec<f64>,
    pub tolerance: f64,
    pub stage: bool,
    pub partial: bool,
    pub threads: usize,
    pub targets: Vec<Target>,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(rc: RawConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            queue: rc.queue,
            sleep_int: rc.sleep_int.unwrap_or(5),
            endpoint: rc.endpoint,
            queue_template: rc
                .queue_template
                .map(TemplateSrc::load)
                .transpose()?,
            command: rc.command.load()?,
            timeout: rc.timeout,
            seed: rc.seed,
            scale_factors: rc
                .scale_factors
                .unwrap_or_else(|| DEFAULT_SCALE_FACTORS.to_vec()),
            tolerance: rc.tolerance.unwrap_or(1e-6),
            stage: rc.stage.unwrap_or(true),
            partial: rc.partial.unwrap_or(false),
            threads: rc.threads.unwrap_or(0),
            targets: rc.target.into_iter().map(Target::from).collect(),
        })
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    /// parse and validate a config from TOML. template files are read relative
    /// to the current directory
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, Path::new("<string>"))
    }
}

impl Config {
    /// load a [Config] from the TOML file specified by `filename` and check it
    /// with [Config::validate]
    pub fn load(filename: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let filename = filename.as_ref();
        let contents = read_to_string(filename)
            .map_err(|e| ConfigError::Io(filename.to_owned(), e))?;
        Self::parse(&contents, filename)
    }

    /// parse and validate the TOML in `contents`, naming `path` in errors
    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)
            .map_err(|e| ConfigError::Toml(path.to_owned(), e))?;
        let ret = Self::try_from(raw)?;
        ret.validate()?;
        Ok(ret)
    }

    /// check that the settings in `self` make any sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.targets.is_empty() {
            return invalid("no targets given".to_owned());
        }
        let mut names = HashSet::new();
        for t in &self.targets {
            if !names.insert(&t.name) {
                return invalid(format!("duplicate target name {}", t.name));
            }
            if t.batches == 0 {
                return invalid(format!("target {} has zero batches", t.name));
            }
        }
        if self.scale_factors.is_empty() {
            return invalid("scale_factors is empty".to_owned());
        }
        if let Some(s) = self
            .scale_factors
            .iter()
            .find(|s| !s.is_finite() || **s <= 0.0)
        {
            return invalid(format!("scale factor {s} is not positive"));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return invalid(format!("tolerance {} is negative", self.tolerance));
        }
        let vars: Vec<_> =
            COMMAND_DIRECTIVES.iter().map(|d| (*d, "")).collect();
        if let Err(e) = jobq::template::expand(&self.command, &vars) {
            return invalid(format!("in command: {e}"));
        }
        Ok(())
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            queue,
            sleep_int,
            endpoint,
            queue_template,
            command,
            timeout,
            seed,
            scale_factors,
            tolerance,
            stage,
            partial,
            threads,
            targets,
        } = self;
        write!(
            f,
            "
Configuration Options:
queue = {queue}
sleep_int = {sleep_int}
endpoint = {}
queue_template = {}
command = {command}
timeout = {timeout:?}
seed = {seed:?}
scale_factors = {scale_factors:?}
tolerance = {tolerance:e}
stage = {stage}
partial = {partial}
threads = {threads}
",
            endpoint.as_deref().unwrap_or(""),
            queue_template.as_deref().unwrap_or(""),
        )?;
        for t in targets {
            writeln!(
                f,
                "target = {} ({} in {} batches{}) in {}",
                t.name,
                t.trajectory.display(),
                t.batches,
                if t.esp { " with ESP" } else { "" },
                t.dir.display()
            )?;
        }
        Ok(())
    }
}
