//! Command-line driver for the polar compute job.
//!
//! ```bash
//! polar-ptx -w 1920 -h 1080 --kernel shader.spv --format png
//! ```
//!
//! Exits with status 0 when the image was written and 1 after a reported
//! failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};

use polar_engine::device::{ClassRequirement, DeviceClass, MemoryProperties, WgpuDriver, WgpuInit};
use polar_engine::logging::{init_logging, LoggingConfig};
use polar_engine::output::OutputFormat;
use polar_engine::{JobConfig, JobError};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum DeviceClassArg {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Any,
}

impl From<DeviceClassArg> for ClassRequirement {
    fn from(arg: DeviceClassArg) -> Self {
        match arg {
            DeviceClassArg::Discrete => ClassRequirement::Discrete,
            DeviceClassArg::Integrated => ClassRequirement::Exactly(DeviceClass::Integrated),
            DeviceClassArg::Virtual => ClassRequirement::Exactly(DeviceClass::Virtual),
            DeviceClassArg::Cpu => ClassRequirement::Exactly(DeviceClass::Cpu),
            DeviceClassArg::Any => ClassRequirement::Any,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum MemoryArg {
    /// Device-local memory the host maps directly
    Unified,
    /// Device-local only; the result is copied to a staging buffer
    DeviceLocal,
}

impl From<MemoryArg> for MemoryProperties {
    fn from(arg: MemoryArg) -> Self {
        match arg {
            MemoryArg::Unified => JobConfig::UNIFIED_MEMORY,
            MemoryArg::DeviceLocal => MemoryProperties::DEVICE_LOCAL,
        }
    }
}

fn parse_backends(s: &str) -> Result<wgpu::Backends, String> {
    let backends = wgpu::Backends::from_comma_list(s);
    if backends.is_empty() {
        return Err(format!("no known backend in '{s}'"));
    }
    Ok(backends)
}

/// Dispatch a compute kernel over a surface and save the result as an image
#[derive(Parser, Debug)]
#[command(name = "polar-ptx", version, disable_help_flag = true)]
struct Cli {
    /// Surface width in pixels
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Surface height in pixels
    #[arg(short = 'h', long)]
    height: Option<u32>,

    /// Edge length of the kernel's square workgroup
    #[arg(long, default_value_t = JobConfig::DEFAULT_WORKGROUP_SIZE)]
    workgroup: u32,

    /// Output image format: png, pam or ppm
    #[arg(long, default_value = "png", value_parser = OutputFormat::from_str)]
    format: OutputFormat,

    /// Kernel bytecode (SPIR-V or WGSL)
    #[arg(long, default_value = JobConfig::DEFAULT_KERNEL_PATH)]
    kernel: PathBuf,

    /// Directory the image is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Required adapter class
    #[arg(long, value_enum, default_value_t = DeviceClassArg::Discrete)]
    device_class: DeviceClassArg,

    /// Memory the result buffer lives in
    #[arg(long, value_enum, default_value_t = MemoryArg::Unified)]
    memory: MemoryArg,

    /// Comma-separated wgpu backends (e.g. "vulkan,dx12")
    #[arg(long, value_parser = parse_backends)]
    backends: Option<wgpu::Backends>,

    /// Log filter in env_logger syntax; overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    /// Both sizes are required; their values are checked by validation.
    fn job_config(&self) -> Result<JobConfig, JobError> {
        let width = self.width.ok_or_else(|| JobError::Configuration("missing --width".into()))?;
        let height = self.height.ok_or_else(|| JobError::Configuration("missing --height".into()))?;
        Ok(JobConfig {
            workgroup_size: self.workgroup,
            output_format: self.format,
            kernel_path: self.kernel.clone(),
            output_dir: self.out_dir.clone(),
            device_class: self.device_class.into(),
            result_memory: self.memory.into(),
            ..JobConfig::new(width, height)
        })
    }

    fn wgpu_init(&self) -> WgpuInit {
        let mut init = WgpuInit::default();
        if let Some(backends) = self.backends {
            init.backends = backends;
        }
        init
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.job_config()?;
    println!("Width: {}, Height: {}", config.width, config.height);

    let driver = WgpuDriver::new(cli.wgpu_init());
    let report = polar_engine::run_to_file(&driver, &config).context("compute job failed")?;

    log::info!(
        "{} ({}): {}x{}x{} workgroups, {} result bytes, {:?} readback",
        report.adapter,
        report.backend,
        report.grid.x,
        report.grid.y,
        report.grid.z,
        report.result_bytes,
        report.readback
    );
    if let Some(path) = &report.output {
        println!("{}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..Default::default()
    });

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<JobError>() {
                Some(job) => log::error!("[{:?}] {e:#}", job.kind()),
                None => log::error!("{e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_height_flag_is_not_help() {
        let cli = Cli::try_parse_from(["polar-ptx", "-w", "4", "-h", "2"]).unwrap();
        let config = cli.job_config().unwrap();
        assert_eq!((config.width, config.height), (4, 2));
        assert_eq!(config.output_format, OutputFormat::Png);
        assert_eq!(config.device_class, ClassRequirement::Discrete);
        config.validate().unwrap();
    }

    #[test]
    fn missing_size_is_reported_as_missing() {
        let cli = Cli::try_parse_from(["polar-ptx", "-w", "4"]).unwrap();
        let err = cli.job_config().unwrap_err();
        assert_eq!(err.kind(), polar_engine::ErrorKind::Configuration);
        assert!(err.to_string().contains("missing --height"), "{err}");

        let cli = Cli::try_parse_from(["polar-ptx", "-h", "2"]).unwrap();
        assert!(cli.job_config().unwrap_err().to_string().contains("missing --width"));
    }

    #[test]
    fn zero_size_fails_validation() {
        let cli = Cli::try_parse_from(["polar-ptx", "-w", "4", "-h", "0"]).unwrap();
        let err = cli.job_config().unwrap().validate().unwrap_err();
        assert_eq!(err.kind(), polar_engine::ErrorKind::Configuration);
    }

    #[test]
    fn options_map_onto_config() {
        let cli = Cli::try_parse_from([
            "polar-ptx",
            "--width",
            "8",
            "--height",
            "8",
            "--format",
            "ppm",
            "--device-class",
            "cpu",
            "--memory",
            "device-local",
            "--backends",
            "vulkan",
        ])
        .unwrap();
        let config = cli.job_config().unwrap();
        assert_eq!(config.output_format, OutputFormat::Ppm);
        assert_eq!(config.device_class, ClassRequirement::Exactly(DeviceClass::Cpu));
        assert_eq!(config.result_memory, MemoryProperties::DEVICE_LOCAL);
        assert_eq!(cli.wgpu_init().backends, wgpu::Backends::VULKAN);

        assert!(Cli::try_parse_from(["polar-ptx", "--backends", "nope"]).is_err());
    }
}
