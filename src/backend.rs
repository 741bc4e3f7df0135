use anyhow::{bail, ensure, Result};

use crate::kernel::{vector_add_source, Element, ADD_KERNEL_NAME};
use crate::opencl::ComputeProcessor;

/// Element-wise addition shared by the device and host implementations
pub trait VectorAdd {
    /// Returns `a[i] + b[i]` for every `i`. Both slices must have equal length.
    fn add<T: Element>(&mut self, a: &[T], b: &[T]) -> Result<Vec<T>>;
}

fn check_operands<T>(a: &[T], b: &[T]) -> Result<()> {
    ensure!(
        a.len() == b.len(),
        "Operand lengths differ: {} vs {}",
        a.len(),
        b.len()
    );
    Ok(())
}

/// Reference implementation on the CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostBackend;

impl VectorAdd for HostBackend {
    fn add<T: Element>(&mut self, a: &[T], b: &[T]) -> Result<Vec<T>> {
        check_operands(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| x.add(*y)).collect())
    }
}

impl ComputeProcessor {
    /// Runs an arbitrary three-buffer kernel `(a, b, c)` over `a.len()` work items.
    pub fn run_binary<T: Element>(
        &mut self,
        source: &str,
        kernel_name: &str,
        a: &[T],
        b: &[T],
    ) -> Result<Vec<T>> {
        check_operands(a, b)?;
        if a.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(ext) = T::EXTENSION {
            if !self.supports(ext) {
                bail!(
                    "{} does not support {} (required for {} elements)",
                    self.device_name(),
                    ext,
                    T::CL_TYPE
                );
            }
        }

        let n = a.len();
        self.create_kernel(source, kernel_name)?;

        let mem_a = self.create_read_only_buffer(a)?;
        let mem_b = self.create_read_only_buffer(b)?;
        let mem_c = self.create_write_only_buffer::<T>(n)?;

        self.set_kernel_arg(0, &mem_a)?;
        self.set_kernel_arg(1, &mem_b)?;
        self.set_kernel_arg(2, &mem_c)?;

        self.execute_kernel(n)?;

        let mut c = vec![T::default(); n];
        self.read_results(&mem_c, &mut c)?;
        log::debug!("Releasing device buffers");
        Ok(c)
    }
}

impl VectorAdd for ComputeProcessor {
    fn add<T: Element>(&mut self, a: &[T], b: &[T]) -> Result<Vec<T>> {
        self.run_binary(&vector_add_source::<T>(), ADD_KERNEL_NAME, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sample_inputs;
    use crate::opencl::open_default;
    use approx::assert_relative_eq;

    #[test]
    fn host_adds_elementwise() {
        let sum = HostBackend.add(&[1i32, 2, 3], &[10, 20, 30]).unwrap();
        assert_eq!(sum, vec![11, 22, 33]);
    }

    #[test]
    fn host_rejects_mismatched_lengths() {
        let err = HostBackend.add(&[1.0f32, 2.0], &[1.0]).unwrap_err();
        assert!(err.to_string().contains("2 vs 1"));
    }

    #[test]
    fn host_empty_is_empty() {
        let sum = HostBackend.add::<f64>(&[], &[]).unwrap();
        assert!(sum.is_empty());
    }

    #[test]
    fn device_float_matches_host() {
        let Some(mut processor) = open_default() else { return };
        let (a, b) = sample_inputs::<f32>(1000);
        let expected = HostBackend.add(&a, &b).unwrap();
        let actual = processor.add(&a, &b).unwrap();
        assert_eq!(actual.len(), expected.len());
        for (x, y) in actual.iter().zip(&expected) {
            assert_relative_eq!(*x, *y);
        }
    }

    #[test]
    fn device_int_is_exact() {
        let Some(mut processor) = open_default() else { return };
        let a: Vec<i32> = vec![1 << 30, -5, 0, 7];
        let b: Vec<i32> = vec![1, 5, 0, -8];
        let actual = processor.add(&a, &b).unwrap();
        assert_eq!(actual, vec![(1 << 30) + 1, 0, 0, -1]);
    }

    #[test]
    fn device_double_requires_fp64() {
        let Some(mut processor) = open_default() else { return };
        let (a, b) = sample_inputs::<f64>(16);
        let result = processor.add(&a, &b);
        if processor.supports("cl_khr_fp64") {
            assert!(result.unwrap().iter().all(|&v| v == 16.0));
        } else {
            assert!(result.unwrap_err().to_string().contains("cl_khr_fp64"));
        }
    }

    #[test]
    fn device_runs_custom_kernel_name() {
        let Some(mut processor) = open_default() else { return };
        let source = "__kernel void my_add(__global const int *a, __global const int *b, __global int *c) {\n\
                      \x20   int i = get_global_id(0);\n\
                      \x20   c[i] = a[i] + 2 * b[i];\n\
                      }\n";
        let actual = processor
            .run_binary(source, "my_add", &[1i32, 2, 3], &[10, 20, 30])
            .unwrap();
        assert_eq!(actual, vec![21, 42, 63]);
    }

    #[test]
    fn device_unknown_kernel_name_fails() {
        let Some(mut processor) = open_default() else { return };
        let err = processor
            .run_binary(&vector_add_source::<f32>(), "my_add", &[1.0f32], &[2.0])
            .unwrap_err();
        assert!(err.to_string().contains("Failed to create kernel 'my_add'"));
    }

    #[test]
    fn device_empty_skips_dispatch() {
        let Some(mut processor) = open_default() else { return };
        assert!(processor.add::<f32>(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn device_rejects_mismatched_lengths() {
        let Some(mut processor) = open_default() else { return };
        assert!(processor.add(&[1.0f32; 3], &[1.0f32; 4]).is_err());
    }
}
