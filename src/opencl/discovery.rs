//! Platform and device enumeration.

use anyhow::{Context, Result};
use opencl3::{
    device::{
        get_device_ids, Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_CPU,
        CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    },
    error_codes::ClError,
    platform::{get_platforms, Platform},
    types::cl_device_type,
};
use std::fmt;

const UNKNOWN: &str = "Unknown";

fn or_unknown<E>(attr: std::result::Result<String, E>) -> String {
    attr.unwrap_or_else(|_| UNKNOWN.to_string())
}

/// Human readable name for a device type bitfield.
pub fn device_type_name(device_type: cl_device_type) -> &'static str {
    if device_type & CL_DEVICE_TYPE_CPU != 0 {
        "CPU"
    } else if device_type & CL_DEVICE_TYPE_GPU != 0 {
        "GPU"
    } else if device_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        "ACCELERATOR"
    } else if device_type & CL_DEVICE_TYPE_DEFAULT != 0 {
        "DEFAULT"
    } else {
        "UNKNOWN"
    }
}

/// Descriptive attributes of a platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformSummary {
    pub profile: String,
    pub version: String,
    pub name: String,
    pub vendor: String,
    pub extensions: String,
}

impl PlatformSummary {
    pub fn query(platform: &Platform) -> Self {
        Self {
            profile: or_unknown(platform.profile()),
            version: or_unknown(platform.version()),
            name: or_unknown(platform.name()),
            vendor: or_unknown(platform.vendor()),
            extensions: or_unknown(platform.extensions()),
        }
    }
}

impl fmt::Display for PlatformSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CL_PLATFORM_PROFILE: {}", self.profile)?;
        writeln!(f, "CL_PLATFORM_VERSION: {}", self.version)?;
        writeln!(f, "CL_PLATFORM_NAME: {}", self.name)?;
        writeln!(f, "CL_PLATFORM_VENDOR: {}", self.vendor)?;
        writeln!(f, "CL_PLATFORM_EXTENSIONS: {}", self.extensions)
    }
}

/// Descriptive attributes of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub name: String,
    pub device_type: cl_device_type,
    pub vendor: String,
    pub version: String,
    pub driver_version: String,
    pub max_compute_units: Option<u32>,
    pub max_work_item_sizes: Option<Vec<usize>>,
}

impl DeviceSummary {
    pub fn query(device: &Device) -> Self {
        Self {
            name: or_unknown(device.name()),
            device_type: device.dev_type().unwrap_or(0),
            vendor: or_unknown(device.vendor()),
            version: or_unknown(device.version()),
            driver_version: or_unknown(device.driver_version()),
            max_compute_units: device.max_compute_units().ok(),
            max_work_item_sizes: device.max_work_item_sizes().ok(),
        }
    }
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CL_DEVICE_NAME: {}", self.name)?;
        writeln!(f, "CL_DEVICE_TYPE: {}", device_type_name(self.device_type))?;
        writeln!(f, "CL_DEVICE_VENDOR: {}", self.vendor)?;
        writeln!(f, "CL_DEVICE_VERSION: {}", self.version)?;
        writeln!(f, "CL_DRIVER_VERSION: {}", self.driver_version)?;
        match self.max_compute_units {
            Some(units) => writeln!(f, "CL_DEVICE_MAX_COMPUTE_UNITS: {}", units)?,
            None => writeln!(f, "CL_DEVICE_MAX_COMPUTE_UNITS: {}", UNKNOWN)?,
        }
        match &self.max_work_item_sizes {
            Some(sizes) => writeln!(f, "CL_DEVICE_MAX_WORK_ITEM_SIZES: {:?}", sizes),
            None => writeln!(f, "CL_DEVICE_MAX_WORK_ITEM_SIZES: {}", UNKNOWN),
        }
    }
}

/// One line of the `--list-devices` table.
fn device_line(index: usize, device: &DeviceSummary, global_mem_bytes: Option<u64>) -> String {
    let memory = match global_mem_bytes {
        Some(bytes) => format!("{} MB", bytes / (1024 * 1024)),
        None => UNKNOWN.to_string(),
    };
    format!(
        "  Device {}: {} ({}) [{}] - Memory: {}",
        index,
        device.name,
        device.vendor,
        device_type_name(device.device_type),
        memory
    )
}

/// Logs every platform and its devices of `device_type`.
///
/// Failures are logged and end enumeration of the affected scope; they are
/// never returned.
pub fn enumerate_platforms(device_type: cl_device_type) {
    let platforms = match get_platforms() {
        Ok(p) => p,
        Err(e) => {
            log::error!("Error getting platform IDs: {}", e);
            return;
        }
    };
    log::info!("Number of platforms: {}", platforms.len());

    for platform in &platforms {
        log::info!("{}", PlatformSummary::query(platform));
        enumerate_devices(platform, device_type);
    }
}

fn enumerate_devices(platform: &Platform, device_type: cl_device_type) {
    let device_ids = match get_device_ids(platform.id(), device_type) {
        Ok(ids) => ids,
        Err(e) => {
            log::error!("Error getting device IDs: {}", ClError(e));
            return;
        }
    };
    log::info!("Number of devices: {}", device_ids.len());

    for id in device_ids {
        log::info!("{}", DeviceSummary::query(&Device::new(id)));
    }
}

/// Prints available platforms and devices to stdout.
pub fn list_devices(device_type: cl_device_type) -> Result<()> {
    println!("Available OpenCL Platforms and Devices:");
    let platforms = get_platforms().context("Failed to get OpenCL platforms")?;
    if platforms.is_empty() {
        println!("  No OpenCL platforms found.");
        return Ok(());
    }

    for (plat_idx, platform) in platforms.iter().enumerate() {
        println!("\nPlatform {}: {}", plat_idx, or_unknown(platform.name()));

        match get_device_ids(platform.id(), device_type) {
            Ok(device_ids) if device_ids.is_empty() => {
                println!("  No matching devices found on this platform.");
            }
            Ok(device_ids) => {
                for (dev_idx, device_id) in device_ids.into_iter().enumerate() {
                    let device = Device::new(device_id);
                    let summary = DeviceSummary::query(&device);
                    println!("{}", device_line(dev_idx, &summary, device.global_mem_size().ok()));
                }
            }
            Err(e) => {
                println!("  Error getting devices for this platform: {}", ClError(e));
            }
        }
    }
    Ok(())
}
