//! GPU Vector Add - Run an element-wise addition kernel through OpenCL
//!
//! This application enumerates OpenCL platforms and devices, compiles a
//! trivial `c[i] = a[i] + b[i]` kernel for the selected device, dispatches it
//! and prints the values read back from device memory.

mod backend;
mod kernel;
mod opencl;

use crate::backend::{HostBackend, VectorAdd};
use crate::kernel::{sample_inputs, vector_add_source, Element, ADD_KERNEL_NAME};
use crate::opencl::{device_type_name, list_devices, ComputeProcessor, ProcessorConfig};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use opencl3::{
    device::{
        CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
        CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    },
    types::cl_device_type,
};
use std::path::{Path, PathBuf};

/// Device type filter accepted on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DeviceKind {
    All,
    Gpu,
    Cpu,
    Accelerator,
    Default,
}

impl DeviceKind {
    fn bits(self) -> cl_device_type {
        match self {
            DeviceKind::All => CL_DEVICE_TYPE_ALL,
            DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceKind::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
            DeviceKind::Default => CL_DEVICE_TYPE_DEFAULT,
        }
    }
}

/// Element type of the input and output arrays
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ElementKind {
    F32,
    F64,
    I32,
}

/// Command line arguments for the vector add demo
#[derive(Parser, Debug)]
#[clap(
    name = "gpuadd",
    about = "Enumerate OpenCL devices and add two vectors with a compute kernel.",
    version
)]
struct Args {
    /// Number of elements (e.g., 10, 4K, 1M). K and M multiply by 1024 and 1024^2.
    #[clap(short = 'n', long, value_parser = parse_count_string, default_value = "10")]
    length: usize,

    /// Device index to use within the platform (0 for first device)
    #[clap(short, long, default_value = "0")]
    device: usize,

    /// OpenCL platform index
    #[clap(short, long, default_value = "0")]
    platform: usize,

    /// Device type to enumerate and select from
    #[clap(short = 't', long, value_enum, default_value = "all")]
    device_type: DeviceKind,

    /// Element type of the arrays
    #[clap(short, long, value_enum, default_value = "f32")]
    element: ElementKind,

    /// Load the kernel source from a file instead of the built-in one.
    /// The kernel must take (a, b, c) global buffers of the element type.
    #[clap(long)]
    kernel_file: Option<PathBuf>,

    /// Kernel entry point name
    #[clap(long, default_value = ADD_KERNEL_NAME)]
    kernel_name: String,

    /// Compare the device output against a host computation
    #[clap(long)]
    verify: bool,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// List available OpenCL platforms and devices and exit
    #[clap(long)]
    list_devices: bool,
}

/// Parses an element count (e.g., "10", "4K", "1M").
pub(crate) fn parse_count_string(count_str: &str) -> Result<usize> {
    let count_str = count_str.trim().to_uppercase();
    let (num_part, suffix) = count_str.split_at(
        count_str
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(count_str.len()),
    );

    let num: usize = num_part.parse().context("Invalid element count")?;

    let count = match suffix {
        "" => Some(num),
        "K" => num.checked_mul(1024),
        "M" => num.checked_mul(1024 * 1024),
        _ => bail!("Invalid count suffix: '{}'. Use K or M.", suffix),
    };
    count.context("Element count overflows")
}

fn format_values<T: Element>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reads the kernel from `path`, or generates the built-in add kernel for `T`.
fn load_kernel_source<T: Element>(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read kernel source {}", path.display())),
        None => Ok(vector_add_source::<T>()),
    }
}

/// Compares device output against the host reference.
fn check_results<T: Element>(actual: &[T], expected: &[T]) -> Result<()> {
    if actual.len() != expected.len() {
        bail!(
            "Verification failed: got {} elements, expected {}",
            actual.len(),
            expected.len()
        );
    }
    let mismatches = actual
        .iter()
        .zip(expected)
        .filter(|(x, y)| !x.approx_eq(**y))
        .count();
    if mismatches > 0 {
        bail!(
            "Verification failed: {} of {} elements differ",
            mismatches,
            actual.len()
        );
    }
    Ok(())
}

fn run<T: Element>(processor: &mut ComputeProcessor, args: &Args) -> Result<()> {
    let source = load_kernel_source::<T>(args.kernel_file.as_deref())?;

    let (a, b) = sample_inputs::<T>(args.length);
    log::info!(
        "Adding {} {} elements with kernel '{}' on {}",
        args.length,
        T::CL_TYPE,
        args.kernel_name,
        processor.device_name()
    );

    let c = processor.run_binary(&source, &args.kernel_name, &a, &b)?;
    println!("{}", format_values(&c));

    if args.verify {
        let expected = HostBackend.add(&a, &b)?;
        check_results(&c, &expected)?;
        log::info!("Verification passed for {} elements", c.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        return list_devices(args.device_type.bits());
    }

    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    log::info!("Starting GPU vector add");

    let config = ProcessorConfig {
        platform_index: args.platform,
        device_index: args.device,
        device_type: args.device_type.bits(),
    };

    log::info!(
        "Selecting {} device {} on platform {}",
        device_type_name(config.device_type),
        config.device_index,
        config.platform_index
    );

    let mut processor =
        ComputeProcessor::new(&config).context("Failed to initialise OpenCL device")?;

    match args.element {
        ElementKind::F32 => run::<f32>(&mut processor, &args)?,
        ElementKind::F64 => run::<f64>(&mut processor, &args)?,
        ElementKind::I32 => run::<i32>(&mut processor, &args)?,
    }

    log::info!("Done.");
    Ok(())
}
