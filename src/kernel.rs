//! Element types and the vector addition kernel source.

use opencl3::types::{cl_double, cl_float, cl_int};
use std::fmt::{Debug, Display};

/// Name of the entry point in the generated kernel source.
pub const ADD_KERNEL_NAME: &str = "add";

/// A numeric element that can live in a device buffer and be added on both
/// host and device.
pub trait Element: Copy + Default + PartialEq + Debug + Display + Send + Sync + 'static {
    /// OpenCL C spelling of the type.
    const CL_TYPE: &'static str;
    /// Device extension needed to use the type in a kernel, if any.
    const EXTENSION: Option<&'static str> = None;

    /// Host-side addition matching what the kernel computes.
    fn add(self, other: Self) -> Self;

    fn from_index(i: usize) -> Self;

    /// Equality used when checking device output against the host result.
    fn approx_eq(self, other: Self) -> bool {
        self == other
    }
}

impl Element for cl_float {
    const CL_TYPE: &'static str = "float";

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn from_index(i: usize) -> Self {
        i as cl_float
    }

    fn approx_eq(self, other: Self) -> bool {
        self == other || (self - other).abs() <= 1e-6 * self.abs().max(other.abs())
    }
}

impl Element for cl_double {
    const CL_TYPE: &'static str = "double";
    const EXTENSION: Option<&'static str> = Some("cl_khr_fp64");

    fn add(self, other: Self) -> Self {
        self + other
    }

    fn from_index(i: usize) -> Self {
        i as cl_double
    }

    fn approx_eq(self, other: Self) -> bool {
        self == other || (self - other).abs() <= 1e-12 * self.abs().max(other.abs())
    }
}

impl Element for cl_int {
    const CL_TYPE: &'static str = "int";

    // Devices wrap on overflow; mirror that instead of panicking in debug builds.
    fn add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }

    fn from_index(i: usize) -> Self {
        i as cl_int
    }
}

/// Generates the element-wise addition kernel for `T`.
///
/// The kernel is named [`ADD_KERNEL_NAME`] and takes `(a, b, c)` where `a` and
/// `b` are read and `c[i] = a[i] + b[i]` is written for every work item.
pub fn vector_add_source<T: Element>() -> String {
    let mut src = String::new();
    if let Some(ext) = T::EXTENSION {
        src.push_str(&format!("#pragma OPENCL EXTENSION {} : enable\n", ext));
    }
    src.push_str(&format!(
        "__kernel void {name}(__global const {ty} *a, __global const {ty} *b, __global {ty} *c) {{\n\
         \x20   int i = get_global_id(0);\n\
         \x20   c[i] = a[i] + b[i];\n\
         }}\n",
        name = ADD_KERNEL_NAME,
        ty = T::CL_TYPE,
    ));
    src
}

/// Builds the demo inputs: `a[i] = i` and `b[i] = n - i`, so every sum is `n`.
pub fn sample_inputs<T: Element>(n: usize) -> (Vec<T>, Vec<T>) {
    let a = (0..n).map(T::from_index).collect();
    let b = (0..n).map(|i| T::from_index(n - i)).collect();
    (a, b)
}
