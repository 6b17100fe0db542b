//! Kernel implementations.
//!
//! This modules contains the actual implementation of the host kernels and the source code of the
//! device kernels.

#[cfg(any(feature = "opencl", feature = "cuda"))]
pub mod device {
    //! Device kernel sources.

    use crate::utils::{Precision, StreamFloat};

    use std::mem::size_of;

    /// Represents a device program.
    ///
    /// As there is no generic way of writing of function that will execute on an accelerator in
    /// Rust, the kernels are written in the syntax of the target framework (OpenCL C or PTX) and
    /// imported as raw text. The sources are written once for both precisions and specialized
    /// with [`DeviceKernel::source_for`].
    pub struct DeviceKernel {
        kernel_names: [&'static str; 6],
        kernel_source: &'static str,
    }

    impl DeviceKernel {
        /// Creates a `DeviceKernel` from the entry points it defines (in the order `init`, `copy`,
        /// `mul`, `add`, `triad`, `dot`) and its source code (generally a file's contents).
        pub const fn new(kernel_names: [&'static str; 6], kernel_source: &'static str) -> Self {
            Self {
                kernel_names,
                kernel_source,
            }
        }

        pub fn init(&self) -> &'static str {
            self.kernel_names[0]
        }

        pub fn copy(&self) -> &'static str {
            self.kernel_names[1]
        }

        pub fn mul(&self) -> &'static str {
            self.kernel_names[2]
        }

        pub fn add(&self) -> &'static str {
            self.kernel_names[3]
        }

        pub fn triad(&self) -> &'static str {
            self.kernel_names[4]
        }

        pub fn dot(&self) -> &'static str {
            self.kernel_names[5]
        }

        /// Returns the source code specialized for the element type `T`.
        ///
        /// The OpenCL source is parameterized by a `TYPE` macro, the PTX template by `$TY`
        /// (register type), `$SHIFT` (log2 of the element size) and `$ZERO` (zero literal).
        pub fn source_for<T: StreamFloat>(&self) -> String {
            let zero = match T::PRECISION {
                Precision::Single => "0f00000000",
                Precision::Double => "0d0000000000000000",
            };
            let fp64 = match T::PRECISION {
                Precision::Single => "",
                Precision::Double => "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n",
            };
            let header = format!("{fp64}#define TYPE {}\n", T::CL_TYPE);

            if self.kernel_source.contains("$TY") {
                self.kernel_source
                    .replace("$TY", T::PTX_TYPE)
                    .replace("$SHIFT", &size_of::<T>().trailing_zeros().to_string())
                    .replace("$ZERO", zero)
            } else {
                header + self.kernel_source
            }
        }
    }

    /// Entry points and source code of the OpenCL kernels.
    pub static CL_STREAM: DeviceKernel = DeviceKernel::new(
        [
            "stream_init",
            "stream_copy",
            "stream_mul",
            "stream_add",
            "stream_triad",
            "stream_dot",
        ],
        include_str!("../kernels/opencl/stream.cl"),
    );

    /// Entry points and PTX template of the NVIDIA CUDA kernels.
    pub static CUDA_STREAM: DeviceKernel = DeviceKernel::new(
        ["init", "copy", "mul", "add", "triad", "dot"],
        include_str!("../kernels/cuda/stream.ptx"),
    );

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn opencl_source_is_specialized() {
            let src = CL_STREAM.source_for::<f64>();
            assert!(src.starts_with("#pragma OPENCL EXTENSION cl_khr_fp64"));
            assert!(src.contains("#define TYPE double"));
            assert!(CL_STREAM.source_for::<f32>().starts_with("#define TYPE float"));
            for name in CL_STREAM.kernel_names {
                assert!(src.contains(name));
            }
        }

        #[test]
        fn ptx_template_is_fully_substituted() {
            let ptx = CUDA_STREAM.source_for::<f32>();
            assert!(!ptx.contains('$'));
            assert!(ptx.contains("ld.global.f32"));
            assert!(ptx.contains("shl.b64 %rd9, %rd5, 2;"));

            let ptx = CUDA_STREAM.source_for::<f64>();
            assert!(ptx.contains("0d0000000000000000"));
            assert!(ptx.contains("shl.b64 %rd9, %rd5, 3;"));
            for name in CUDA_STREAM.kernel_names {
                assert!(ptx.contains(&format!(".entry {name}(")));
            }
        }
    }
}

pub mod host {
    //! Host kernel implementations.
    //!
    //! Each kernel comes in three flavours: a naive indexed loop, a sequential iterator chain and a
    //! parallel iterator chain. The parallel implementations rely on the [`rayon`][1] crate and
    //! run on whichever thread pool they are called from.
    //!
    //! The dot products accumulate in double precision whatever the element type.
    //!
    //! [1]: https://crates.io/crates/rayon

    use rayon::prelude::*;

    use crate::utils::StreamFloat;

    // Naive implementation of the fill operation (unidiomatic Rust).
    pub fn fill<T: StreamFloat>(value: T, x: &mut [T]) {
        for i in 0..x.len() {
            x[i] = value;
        }
    }

    // Naive implementation of the copy kernel (unidiomatic Rust).
    pub fn copy<T: StreamFloat>(a: &[T], c: &mut [T]) {
        for i in 0..c.len() {
            c[i] = a[i];
        }
    }

    // Naive implementation of the mul kernel (unidiomatic Rust).
    pub fn mul<T: StreamFloat>(scalar: T, c: &[T], b: &mut [T]) {
        for i in 0..b.len() {
            b[i] = scalar * c[i];
        }
    }

    // Naive implementation of the add kernel (unidiomatic Rust).
    pub fn add<T: StreamFloat>(a: &[T], b: &[T], c: &mut [T]) {
        for i in 0..c.len() {
            c[i] = a[i] + b[i];
        }
    }

    // Naive implementation of the triad kernel (unidiomatic Rust).
    pub fn triad<T: StreamFloat>(scalar: T, b: &[T], c: &[T], a: &mut [T]) {
        for i in 0..a.len() {
            a[i] = b[i] + scalar * c[i];
        }
    }

    // Naive implementation of the dot kernel (unidiomatic Rust).
    pub fn dot<T: StreamFloat>(a: &[T], b: &[T]) -> f64 {
        let mut sum = 0.0;
        for i in 0..a.len() {
            sum += a[i].widen() * b[i].widen();
        }
        sum
    }

    // Idiomatic Rust implementation of the fill operation (using iterators).
    pub fn iter_fill<T: StreamFloat>(value: T, x: &mut [T]) {
        x.iter_mut().for_each(|xi| *xi = value);
    }

    // Idiomatic Rust implementation of the copy kernel (using iterators).
    pub fn iter_copy<T: StreamFloat>(a: &[T], c: &mut [T]) {
        c.iter_mut().zip(a.iter()).for_each(|(ci, ai)| *ci = *ai);
    }

    // Idiomatic Rust implementation of the mul kernel (using iterators).
    pub fn iter_mul<T: StreamFloat>(scalar: T, c: &[T], b: &mut [T]) {
        b.iter_mut()
            .zip(c.iter())
            .for_each(|(bi, ci)| *bi = scalar * *ci);
    }

    // Idiomatic Rust implementation of the add kernel (using iterators).
    pub fn iter_add<T: StreamFloat>(a: &[T], b: &[T], c: &mut [T]) {
        c.iter_mut()
            .zip(a.iter().zip(b.iter()))
            .for_each(|(ci, (ai, bi))| *ci = *ai + *bi);
    }

    // Idiomatic Rust implementation of the triad kernel (using iterators).
    pub fn iter_triad<T: StreamFloat>(scalar: T, b: &[T], c: &[T], a: &mut [T]) {
        a.iter_mut()
            .zip(b.iter().zip(c.iter()))
            .for_each(|(ai, (bi, ci))| *ai = *bi + scalar * *ci);
    }

    // Idiomatic Rust implementation of the dot kernel (using iterators).
    pub fn iter_dot<T: StreamFloat>(a: &[T], b: &[T]) -> f64 {
        a.iter()
            .zip(b.iter())
            .fold(0.0, |acc, (ai, bi)| acc + ai.widen() * bi.widen())
    }

    // Parallel implementation of the fill operation (using `rayon`'s parallel iterators).
    pub fn par_iter_fill<T: StreamFloat>(value: T, x: &mut [T]) {
        x.par_iter_mut().for_each(|xi| *xi = value);
    }

    // Parallel implementation of the copy kernel (using `rayon`'s parallel iterators).
    pub fn par_iter_copy<T: StreamFloat>(a: &[T], c: &mut [T]) {
        c.par_iter_mut()
            .zip(a.par_iter())
            .for_each(|(ci, ai)| *ci = *ai);
    }

    // Parallel implementation of the mul kernel (using `rayon`'s parallel iterators).
    pub fn par_iter_mul<T: StreamFloat>(scalar: T, c: &[T], b: &mut [T]) {
        b.par_iter_mut()
            .zip(c.par_iter())
            .for_each(|(bi, ci)| *bi = scalar * *ci);
    }

    // Parallel implementation of the add kernel (using `rayon`'s parallel iterators).
    pub fn par_iter_add<T: StreamFloat>(a: &[T], b: &[T], c: &mut [T]) {
        c.par_iter_mut()
            .zip(a.par_iter().zip(b.par_iter()))
            .for_each(|(ci, (ai, bi))| *ci = *ai + *bi);
    }

    // Parallel implementation of the triad kernel (using `rayon`'s parallel iterators).
    pub fn par_iter_triad<T: StreamFloat>(scalar: T, b: &[T], c: &[T], a: &mut [T]) {
        a.par_iter_mut()
            .zip(b.par_iter().zip(c.par_iter()))
            .for_each(|(ai, (bi, ci))| *ai = *bi + scalar * *ci);
    }

    // Parallel implementation of the dot kernel (using `rayon`'s parallel iterators).
    pub fn par_iter_dot<T: StreamFloat>(a: &[T], b: &[T]) -> f64 {
        a.par_iter()
            .zip(b.par_iter())
            .map(|(ai, bi)| ai.widen() * bi.widen())
            .sum()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn flavours_agree() {
            let a: Vec<f64> = (0..1000).map(|i| i as f64 * 0.5).collect();
            let b: Vec<f64> = (0..1000).map(|i| 1000.0 - i as f64).collect();

            let (mut c0, mut c1, mut c2) = (vec![0.0; 1000], vec![0.0; 1000], vec![0.0; 1000]);
            add(&a, &b, &mut c0);
            iter_add(&a, &b, &mut c1);
            par_iter_add(&a, &b, &mut c2);
            assert_eq!(c0, c1);
            assert_eq!(c0, c2);

            let (mut a0, mut a1, mut a2) = (a.clone(), a.clone(), a.clone());
            triad(0.4, &b, &c0, &mut a0);
            iter_triad(0.4, &b, &c0, &mut a1);
            par_iter_triad(0.4, &b, &c0, &mut a2);
            assert_eq!(a0, a1);
            assert_eq!(a0, a2);

            // Integer-valued products, so every summation order is exact.
            let expected: f64 = (0..1000).map(|i| (i as f64 * 0.5) * (1000.0 - i as f64)).sum();
            assert_eq!(dot(&a, &b), expected);
            assert_eq!(iter_dot(&a, &b), expected);
            assert_eq!(par_iter_dot(&a, &b), expected);
        }

        #[test]
        fn single_precision_dot_accumulates_in_double() {
            // 2^24 + 1 is not representable in f32: a native accumulator would stall at 2^24.
            let n = (1 << 24) + 1;
            let ones = vec![1.0_f32; n];
            assert_eq!(iter_dot(&ones, &ones), n as f64);
            assert_eq!(par_iter_dot(&ones, &ones), n as f64);
        }

        #[test]
        fn copy_and_mul() {
            let a = vec![1.5_f32; 16];
            let mut c = vec![0.0; 16];
            let mut b = vec![0.0; 16];
            par_iter_copy(&a, &mut c);
            par_iter_mul(2.0, &c, &mut b);
            assert!(c.iter().all(|&x| x == 1.5));
            assert!(b.iter().all(|&x| x == 3.0));

            par_iter_fill(7.0, &mut b);
            fill(7.0, &mut c);
            iter_fill(7.0, &mut b);
            assert_eq!(b, c);
        }
    }
}
