use std::{fs::File, os::unix::prelude::AsRawFd, time::Duration};

use clap::Parser;
use jobq::queue::{Queue, local::Local, pbs::Pbs, slurm::Slurm};
use qmref::{
    config::{self, Config},
    die, driver,
    surface::ShrakeRupley,
};

/// reference energies, forces, and electrostatic potentials for trajectory
/// snapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// input file
    #[arg(value_parser)]
    infile: String,

    /// Set the maximum number of threads to use. Overrides the value in the
    /// input file, where the default of 0 means to use as many threads as there
    /// are CPUs.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Serialize the input file to JSON and exit.
    #[arg(short, long, default_value_t = false, hide = true)]
    json: bool,
}

fn run<Q: Queue>(config: &Config, queue: &Q) {
    match driver::run(config, queue, &ShrakeRupley::default()) {
        Ok(summaries) => {
            for s in summaries {
                println!("{s}\n");
            }
        }
        Err(e) => {
            log::error!("{e}");
            die!("{e}");
        }
    }
}

fn main() -> Result<(), std::io::Error> {
    env_logger::init();
    let args = Args::parse();
    let config = match Config::load(&args.infile) {
        Ok(c) => c,
        Err(e) => die!("{e}"),
    };
    if args.json {
        match serde_json::to_string(&config) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                die!("failed to serialize {} with {e}", args.infile);
            }
        };
        return Ok(());
    }

    let outfile = File::create("qmref.out")?;
    let logfile = File::create("qmref.log")?;
    let out_fd = outfile.as_raw_fd();
    let log_fd = logfile.as_raw_fd();
    // redirect stdout to outfile and stderr to logfile
    unsafe {
        libc::dup2(out_fd, 1);
        libc::dup2(log_fd, 2);
    }
    println!("PID: {}", std::process::id());
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("{config}");
    jobq::max_threads(args.threads.unwrap_or(config.threads));

    let timeout = config.timeout.map(Duration::from_secs);
    let template = config.queue_template.clone();
    let endpoint = config.endpoint.clone();
    match config.queue {
        config::Queue::Local => run(&config, &Local::new(template, endpoint)),
        config::Queue::Slurm => run(
            &config,
            &Slurm::new(config.sleep_int, timeout, endpoint, template),
        ),
        config::Queue::Pbs => run(
            &config,
            &Pbs::new(config.sleep_int, timeout, endpoint, template),
        ),
    }

    println!("normal termination of qmref");

    Ok(())
}
