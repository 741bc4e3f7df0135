//! Device selection, kernel compilation, buffers and dispatch.

use crate::kernel::Element;
use crate::opencl::discovery::{device_type_name, enumerate_platforms};

use anyhow::{anyhow, ensure, Context as _, Result};
use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{get_device_ids, Device, CL_DEVICE_TYPE_ALL},
    error_codes::ClError,
    kernel::Kernel,
    memory::{Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY},
    platform::get_platforms,
    program::Program,
    types::{cl_device_type, cl_uint, CL_BLOCKING},
};
use std::ffi::c_void;
use std::ptr;

/// Which device to run on.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// OpenCL platform index
    pub platform_index: usize,
    /// Device index within the platform, counted among devices of `device_type`
    pub device_index: usize,
    /// Device type filter used for both enumeration and selection
    pub device_type: cl_device_type,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            platform_index: 0,
            device_index: 0,
            device_type: CL_DEVICE_TYPE_ALL,
        }
    }
}

/// A compiled program and the kernel created from it.
struct LoadedKernel {
    // Field order matters: the kernel is released before its program.
    kernel: Kernel,
    _program: Program,
    name: String,
}

/// Owns the context and queue on one device plus the currently loaded kernel.
///
/// Driver objects are released when the processor is dropped. Buffers created
/// by the processor are independent handles and are released when they go out
/// of scope.
pub struct ComputeProcessor {
    // Dropped top to bottom: kernel, queue, then context.
    loaded: Option<LoadedKernel>,
    queue: CommandQueue,
    context: Context,
    device: Device,
    device_name: String,
    extensions: String,
}

impl ComputeProcessor {
    /// Enumerates platforms (logging only) and opens the configured device.
    pub fn new(config: &ProcessorConfig) -> Result<Self> {
        enumerate_platforms(config.device_type);

        let platforms = get_platforms().context("Failed to get OpenCL platforms")?;
        let platform = platforms.get(config.platform_index).ok_or_else(|| {
            anyhow!(
                "Platform index {} out of range ({} platform(s) available)",
                config.platform_index,
                platforms.len()
            )
        })?;

        let device_ids = get_device_ids(platform.id(), config.device_type)
            .map_err(ClError)
            .with_context(|| {
                format!(
                    "Failed to get {} devices for platform {}",
                    device_type_name(config.device_type),
                    config.platform_index
                )
            })?;
        let device_id = *device_ids.get(config.device_index).ok_or_else(|| {
            anyhow!(
                "Device index {} out of range ({} device(s) on platform {})",
                config.device_index,
                device_ids.len(),
                config.platform_index
            )
        })?;
        let device = Device::new(device_id);
        let device_name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let extensions = device.extensions().unwrap_or_default();

        log::info!(
            "Using device {} ({}) on platform {}",
            config.device_index,
            device_name,
            config.platform_index
        );

        let context = Context::from_device(&device)
            .with_context(|| format!("Failed to create context on {}", device_name))?;
        log::debug!("Created context");

        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .context("Failed to create command queue")?;
        log::debug!("Created command queue");

        Ok(Self {
            loaded: None,
            queue,
            context,
            device,
            device_name,
            extensions,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether the device advertises `extension`.
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.split_whitespace().any(|e| e == extension)
    }

    /// Builds `source` for the device and creates the kernel `name` from it,
    /// replacing any previously loaded kernel.
    pub fn create_kernel(&mut self, source: &str, name: &str) -> Result<()> {
        let program = Program::create_and_build_from_source(&self.context, source, "")
            .map_err(|build_log| {
                anyhow!("Failed to build program for {}:\n{}", self.device_name, build_log)
            })?;
        log::debug!("Built program");

        let kernel = Kernel::create(&program, name)
            .with_context(|| format!("Failed to create kernel '{}'", name))?;
        log::debug!("Created kernel '{}'", name);

        self.loaded = Some(LoadedKernel {
            kernel,
            _program: program,
            name: name.to_string(),
        });
        Ok(())
    }

    fn kernel(&self) -> Result<&LoadedKernel> {
        self.loaded
            .as_ref()
            .context("No kernel loaded; call create_kernel first")
    }

    /// Creates a read-only buffer initialised with a copy of `data`.
    pub fn create_read_only_buffer<T: Element>(&self, data: &[T]) -> Result<Buffer<T>> {
        ensure!(!data.is_empty(), "Cannot create an empty device buffer");
        // SAFETY: CL_MEM_COPY_HOST_PTR copies `data.len()` elements during the
        // call; the driver never writes through the pointer.
        let buffer = unsafe {
            Buffer::<T>::create(
                &self.context,
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                data.len(),
                data.as_ptr() as *mut c_void,
            )
        }
        .with_context(|| format!("Failed to create read-only buffer of {} elements", data.len()))?;
        log::debug!("Created read-only {} buffer of {} elements", T::CL_TYPE, data.len());
        Ok(buffer)
    }

    /// Creates an uninitialised write-only buffer of `len` elements.
    pub fn create_write_only_buffer<T: Element>(&self, len: usize) -> Result<Buffer<T>> {
        ensure!(len > 0, "Cannot create an empty device buffer");
        // SAFETY: no host pointer is passed.
        let buffer = unsafe {
            Buffer::<T>::create(&self.context, CL_MEM_WRITE_ONLY, len, ptr::null_mut())
        }
        .with_context(|| format!("Failed to create write-only buffer of {} elements", len))?;
        log::debug!("Created write-only {} buffer of {} elements", T::CL_TYPE, len);
        Ok(buffer)
    }

    /// Binds `buffer` to kernel argument `index`.
    pub fn set_kernel_arg<T: Element>(&self, index: cl_uint, buffer: &Buffer<T>) -> Result<()> {
        let loaded = self.kernel()?;
        // SAFETY: the argument is a cl_mem handle, matching a __global pointer
        // parameter; the buffer outlives the dispatch because reads are blocking.
        unsafe { loaded.kernel.set_arg(index, &buffer.get()) }
            .with_context(|| format!("Failed to set argument {} of kernel '{}'", index, loaded.name))
    }

    /// Enqueues the loaded kernel over a one-dimensional range.
    pub fn execute_kernel(&self, global_work_size: usize) -> Result<()> {
        let loaded = self.kernel()?;
        ensure!(global_work_size > 0, "Global work size must be non-zero");
        let global = [global_work_size];
        // SAFETY: all arguments were bound through set_kernel_arg and the
        // global size array lives for the duration of the call.
        unsafe {
            self.queue.enqueue_nd_range_kernel(
                loaded.kernel.get(),
                1,
                ptr::null(),
                global.as_ptr(),
                ptr::null(),
                &[],
            )
        }
        .with_context(|| format!("Failed to enqueue kernel '{}'", loaded.name))?;
        log::debug!("Enqueued '{}' over {} work items", loaded.name, global_work_size);
        Ok(())
    }

    /// Blocking read of `output.len()` elements from the start of `buffer`.
    pub fn read_results<T: Element>(&self, buffer: &Buffer<T>, output: &mut [T]) -> Result<()> {
        let capacity = buffer
            .size()
            .context("Failed to query buffer size")?
            / std::mem::size_of::<T>();
        ensure!(
            output.len() <= capacity,
            "Read of {} elements exceeds buffer of {} elements",
            output.len(),
            capacity
        );
        // SAFETY: blocking read into a host slice no larger than the buffer.
        unsafe {
            self.queue
                .enqueue_read_buffer(buffer, CL_BLOCKING, 0, output, &[])
        }
        .context("Failed to read results from device")?;
        log::debug!("Read {} elements back from device", output.len());
        Ok(())
    }
}

impl Drop for ComputeProcessor {
    fn drop(&mut self) {
        log::debug!(
            "Releasing OpenCL resources on {} (device {:?})",
            self.device_name,
            self.device.id()
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kernel::{sample_inputs, vector_add_source, ADD_KERNEL_NAME};
    use approx::assert_relative_eq;

    /// Opens the default device, or `None` when no runtime or device is present.
    pub(crate) fn open_default() -> Option<ComputeProcessor> {
        match ComputeProcessor::new(&ProcessorConfig::default()) {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Skipping: no usable OpenCL device ({:#})", e);
                None
            }
        }
    }

    #[test]
    fn default_config_selects_first_device() {
        let config = ProcessorConfig::default();
        assert_eq!(config.platform_index, 0);
        assert_eq!(config.device_index, 0);
        assert_eq!(config.device_type, CL_DEVICE_TYPE_ALL);
    }

    #[test]
    fn out_of_range_platform_is_an_error() {
        let config = ProcessorConfig {
            platform_index: usize::MAX,
            ..ProcessorConfig::default()
        };
        assert!(ComputeProcessor::new(&config).is_err());
    }

    #[test]
    fn out_of_range_device_names_index_and_count() {
        if open_default().is_none() {
            return;
        }
        let config = ProcessorConfig {
            device_index: 4096,
            ..ProcessorConfig::default()
        };
        let Err(e) = ComputeProcessor::new(&config) else {
            panic!("device 4096 should not exist");
        };
        let msg = e.to_string();
        assert!(msg.starts_with("Device index 4096 out of range ("), "{}", msg);
        assert!(msg.contains(" device(s) on platform 0)"), "{}", msg);
    }

    #[test]
    fn dispatch_without_kernel_fails() {
        let Some(processor) = open_default() else { return };
        let err = processor.execute_kernel(4).unwrap_err();
        assert!(err.to_string().contains("No kernel loaded"));
    }

    #[test]
    fn build_error_is_reported() {
        let Some(mut processor) = open_default() else { return };
        let err = processor
            .create_kernel("__kernel void add(__global float *a) { a[0] = ; }", "add")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to build program"));
    }

    #[test]
    fn step_by_step_float_add() {
        let Some(mut processor) = open_default() else { return };
        let n = 10;
        let (a, b) = sample_inputs::<f32>(n);
        processor
            .create_kernel(&vector_add_source::<f32>(), ADD_KERNEL_NAME)
            .unwrap();

        let mem_a = processor.create_read_only_buffer(&a).unwrap();
        let mem_b = processor.create_read_only_buffer(&b).unwrap();
        let mem_c = processor.create_write_only_buffer::<f32>(n).unwrap();
        processor.set_kernel_arg(0, &mem_a).unwrap();
        processor.set_kernel_arg(1, &mem_b).unwrap();
        processor.set_kernel_arg(2, &mem_c).unwrap();
        processor.execute_kernel(n).unwrap();

        let mut c = vec![0.0f32; n];
        processor.read_results(&mem_c, &mut c).unwrap();
        for value in c {
            assert_relative_eq!(value, n as f32);
        }
    }

    #[test]
    fn oversized_read_is_rejected() {
        let Some(processor) = open_default() else { return };
        let mem = processor.create_write_only_buffer::<i32>(4).unwrap();
        let mut out = vec![0i32; 5];
        assert!(processor.read_results(&mem, &mut out).is_err());
    }

    #[test]
    fn empty_buffers_are_rejected() {
        let Some(processor) = open_default() else { return };
        assert!(processor.create_read_only_buffer::<f32>(&[]).is_err());
        assert!(processor.create_write_only_buffer::<f32>(0).is_err());
    }
}
