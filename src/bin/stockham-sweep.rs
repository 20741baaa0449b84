use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};
use stockham_cl::host::{DEFAULT_LOCAL_MEM_SIZE, DEFAULT_MAX_WORK_GROUP_SIZE};
use stockham_cl::{ComputeDevice, HostDevice, KernelTemplate, Sweep, SweepConfig, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceKind {
    /// In-process simulator
    Host,
    /// Default OpenCL device (needs the `opencl` feature)
    Opencl,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Probe, benchmark and verify the Stockham FFT kernel over a size sweep"
)]
struct Cli {
    #[arg(long, value_enum, default_value_t = DeviceKind::Host)]
    device: DeviceKind,
    /// Kernel template to use instead of the built-in one
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long)]
    min_size: Option<usize>,
    /// Exclusive upper bound on the input size
    #[arg(long)]
    max_size: Option<usize>,
    /// Measured launches per size
    #[arg(long)]
    iterations: Option<usize>,
    /// Unmeasured launches per size
    #[arg(long)]
    warmup: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Absolute tolerance per complex component
    #[arg(long)]
    tolerance: Option<f32>,
    #[arg(long)]
    no_verify: bool,
    /// Exit with status 1 if any size fails verification
    #[arg(long)]
    fail_on_mismatch: bool,
    #[arg(long)]
    max_probe_attempts: Option<usize>,
    #[arg(long)]
    build_options: Option<String>,
    /// Local memory of the host simulator, in bytes
    #[arg(long, default_value_t = DEFAULT_LOCAL_MEM_SIZE)]
    host_local_mem: u64,
    /// Work-group limit of the host simulator
    #[arg(long, default_value_t = DEFAULT_MAX_WORK_GROUP_SIZE)]
    host_max_work_group: usize,
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> Result<SweepConfig> {
        let mut cfg =
            SweepConfig::from_env().context("reading STOCKHAM_CL_* environment")?;
        if let Some(v) = self.min_size {
            cfg.min_size = v;
        }
        if let Some(v) = self.max_size {
            cfg.max_size = v;
        }
        if let Some(v) = self.iterations {
            cfg.iterations = v;
        }
        if let Some(v) = self.warmup {
            cfg.warmup = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.tolerance {
            cfg.tolerance = v;
        }
        if let Some(v) = self.max_probe_attempts {
            cfg.max_probe_attempts = v;
        }
        if let Some(v) = &self.build_options {
            cfg.build_options = v.clone();
        }
        if self.no_verify {
            cfg.verify = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn template(&self) -> Result<KernelTemplate> {
        match &self.template {
            Some(path) => KernelTemplate::from_file(path)
                .with_context(|| format!("loading kernel template {}", path.display())),
            None => Ok(KernelTemplate::builtin()),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn sweep<D: ComputeDevice>(
    device: &D,
    template: &KernelTemplate,
    config: &SweepConfig,
) -> Result<SweepReport> {
    Sweep::new(device, template, config)
        .run()
        .with_context(|| format!("sweep on {}", device.name()))
}

#[cfg(feature = "opencl")]
fn sweep_opencl(template: &KernelTemplate, config: &SweepConfig) -> Result<SweepReport> {
    let device = stockham_cl::opencl::ClDevice::new_default()
        .context("opening OpenCL device")?;
    sweep(&device, template, config)
}

#[cfg(not(feature = "opencl"))]
fn sweep_opencl(_: &KernelTemplate, _: &SweepConfig) -> Result<SweepReport> {
    anyhow::bail!("built without the `opencl` feature; rebuild with `--features opencl`")
}

fn print_report(report: &SweepReport) {
    println!(
        "{:>10} {:>10} {:>8} {:>8} {:>10} {:>10}  verified",
        "n", "per_thread", "max_wg", "global", "builds", "avg_us"
    );
    for r in &report.completed {
        let verified = match &r.verification {
            None => "skipped",
            Some(v) if v.passed() => "ok",
            Some(_) => "MISMATCH",
        };
        println!(
            "{:>10} {:>10} {:>8} {:>8} {:>10} {:>10}  {}",
            r.size,
            r.per_thread,
            r.max_work_group_size,
            r.global_work_size,
            r.probe_attempts,
            r.timing.average_us,
            verified
        );
    }
    if let Some(stop) = &report.stopped {
        println!("stopped: {stop:?}");
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = cli.config()?;
    let template = cli.template()?;
    let report = match cli.device {
        DeviceKind::Host => {
            let device = HostDevice::new()
                .with_local_mem_size(cli.host_local_mem)
                .with_max_work_group_size(cli.host_max_work_group);
            sweep(&device, &template, &config)?
        }
        DeviceKind::Opencl => sweep_opencl(&template, &config)?,
    };
    print_report(&report);
    if let Some(m) = report.first_mismatch() {
        if cli.fail_on_mismatch {
            error!("{m}");
            return Ok(ExitCode::FAILURE);
        }
    }
    info!("{} size(s) completed", report.completed.len());
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
