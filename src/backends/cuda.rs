//! NVIDIA CUDA backend.
//!
//! The kernels are loaded from PTX through the [`cust`][1] crate and launched on a non-blocking
//! stream, which is synchronized before every call returns. The CUDA context is owned by the
//! provider and released after the module, the stream and the device buffers.
//!
//! [1]: https://crates.io/crates/cust

use super::{check_array_size, Stream, UNKNOWN_DEVICE_DRIVER, UNKNOWN_DEVICE_NAME};
use crate::{
    consts::{BLOCK_SIZE_1D, DOT_BLOCK_SIZE, DOT_NUM_BLOCKS},
    errors::{BackendError, BackendResult},
    kernels::device::CUDA_STREAM,
    utils::StreamFloat,
};

use cust::{
    function::{BlockSize, Function, GridSize},
    prelude::*,
    stream::Stream as CuStream,
    CudaApiVersion, CudaFlags,
};
use log::debug;

use std::mem::size_of;

/// NVIDIA CUDA kernel provider.
// NOTE: fields are dropped in declaration order, the context must come last.
pub struct CudaStream<T: StreamFloat> {
    d_a: DeviceBuffer<T>,
    d_b: DeviceBuffer<T>,
    d_c: DeviceBuffer<T>,
    d_sums: DeviceBuffer<T>,
    module: Module,
    stream: CuStream,
    scalar: T,
    array_size: usize,
    device_name: String,
    _ctx: Context,
}

fn select_device(index: usize) -> BackendResult<Device> {
    cust::init(CudaFlags::empty()).map_err(BackendError::unavailable)?;
    let count = Device::num_devices().map_err(BackendError::unavailable)? as usize;
    if index >= count {
        return Err(BackendError::Unavailable(format!(
            "no CUDA device with index {index} ({count} available)"
        )));
    }
    Device::get_device(index as u32).map_err(BackendError::unavailable)
}

impl<T: StreamFloat> CudaStream<T> {
    pub fn new(array_size: usize, device_index: usize, scalar: T) -> BackendResult<Self> {
        check_array_size(array_size)?;
        let device = select_device(device_index)?;
        let device_name = device.name().map_err(BackendError::unavailable)?;
        debug!("CUDA device {device_index}: {device_name}");

        // Initialize CUDA context
        let ctx = Context::new(device).map_err(BackendError::unavailable)?;

        let total = device.total_memory().map_err(BackendError::unavailable)?;
        let nb_bytes = array_size
            .checked_mul(3 * size_of::<T>())
            .ok_or_else(|| BackendError::allocation("array size overflows"))?;
        if nb_bytes > total {
            return Err(BackendError::Allocation(format!(
                "{nb_bytes} bytes exceed the device's {total} bytes of memory"
            )));
        }

        // Create CUDA module from the specialized PTX
        let module = Module::from_ptx(CUDA_STREAM.source_for::<T>(), &[])
            .map_err(BackendError::unavailable)?;

        // Create CUDA stream
        let stream =
            CuStream::new(StreamFlags::NON_BLOCKING, None).map_err(BackendError::unavailable)?;

        // Create device-side vectors, filled by `init_arrays`
        let (d_a, d_b, d_c, d_sums) = unsafe {
            (
                DeviceBuffer::uninitialized(array_size).map_err(BackendError::allocation)?,
                DeviceBuffer::uninitialized(array_size).map_err(BackendError::allocation)?,
                DeviceBuffer::uninitialized(array_size).map_err(BackendError::allocation)?,
                DeviceBuffer::uninitialized(DOT_NUM_BLOCKS * DOT_BLOCK_SIZE)
                    .map_err(BackendError::allocation)?,
            )
        };

        Ok(Self {
            d_a,
            d_b,
            d_c,
            d_sums,
            module,
            stream,
            scalar,
            array_size,
            device_name,
            _ctx: ctx,
        })
    }

    fn sizes(&self) -> (GridSize, BlockSize) {
        let block_size = BlockSize::x(BLOCK_SIZE_1D as u32);
        let grid_size = GridSize::x(((self.array_size + BLOCK_SIZE_1D - 1) / BLOCK_SIZE_1D) as u32);
        (grid_size, block_size)
    }

    fn function(&self, name: &str) -> BackendResult<Function<'_>> {
        self.module
            .get_function(name)
            .map_err(BackendError::execution)
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.stream.synchronize().map_err(BackendError::execution)
    }
}

impl<T: StreamFloat> Stream<T> for CudaStream<T> {
    fn init_arrays(&mut self, init_a: T, init_b: T, init_c: T) -> BackendResult<()> {
        let kernel = self.function(CUDA_STREAM.init())?;
        let (grid_size, block_size) = self.sizes();
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_a.as_device_ptr(),
                    self.d_b.as_device_ptr(),
                    self.d_c.as_device_ptr(),
                    init_a,
                    init_b,
                    init_c,
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()
    }

    fn read_arrays(&self) -> BackendResult<(Vec<T>, Vec<T>, Vec<T>)> {
        let mut h_a = vec![T::zero(); self.array_size];
        let mut h_b = vec![T::zero(); self.array_size];
        let mut h_c = vec![T::zero(); self.array_size];
        self.d_a.copy_to(&mut h_a).map_err(BackendError::execution)?;
        self.d_b.copy_to(&mut h_b).map_err(BackendError::execution)?;
        self.d_c.copy_to(&mut h_c).map_err(BackendError::execution)?;
        Ok((h_a, h_b, h_c))
    }

    fn copy(&mut self) -> BackendResult<()> {
        let kernel = self.function(CUDA_STREAM.copy())?;
        let (grid_size, block_size) = self.sizes();
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_a.as_device_ptr(),
                    self.d_c.as_device_ptr(),
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()
    }

    fn mul(&mut self) -> BackendResult<()> {
        let kernel = self.function(CUDA_STREAM.mul())?;
        let (grid_size, block_size) = self.sizes();
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_b.as_device_ptr(),
                    self.d_c.as_device_ptr(),
                    self.scalar,
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()
    }

    fn add(&mut self) -> BackendResult<()> {
        let kernel = self.function(CUDA_STREAM.add())?;
        let (grid_size, block_size) = self.sizes();
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_a.as_device_ptr(),
                    self.d_b.as_device_ptr(),
                    self.d_c.as_device_ptr(),
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()
    }

    fn triad(&mut self) -> BackendResult<()> {
        let kernel = self.function(CUDA_STREAM.triad())?;
        let (grid_size, block_size) = self.sizes();
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_a.as_device_ptr(),
                    self.d_b.as_device_ptr(),
                    self.d_c.as_device_ptr(),
                    self.scalar,
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()
    }

    fn dot(&mut self) -> BackendResult<T> {
        let kernel = self.function(CUDA_STREAM.dot())?;
        let grid_size = GridSize::x(DOT_NUM_BLOCKS as u32);
        let block_size = BlockSize::x(DOT_BLOCK_SIZE as u32);
        let stream = &self.stream;
        unsafe {
            launch!(
                kernel<<<grid_size, block_size, 0, stream>>>(
                    self.d_a.as_device_ptr(),
                    self.d_b.as_device_ptr(),
                    self.d_sums.as_device_ptr(),
                    self.array_size,
                )
            )
            .map_err(BackendError::execution)?;
        }
        self.synchronize()?;

        let mut h_sums = vec![T::zero(); self.d_sums.len()];
        self.d_sums
            .copy_to(&mut h_sums)
            .map_err(BackendError::execution)?;
        Ok(T::from_f64_lossy(
            h_sums.into_iter().fold(0.0, |acc, s| acc + s.widen()),
        ))
    }

    fn array_size(&self) -> usize {
        self.array_size
    }

    fn description(&self) -> String {
        format!("CUDA ({})", self.device_name)
    }
}

pub fn list_devices() -> BackendResult<Vec<String>> {
    cust::init(CudaFlags::empty()).map_err(BackendError::unavailable)?;
    let count = Device::num_devices().map_err(BackendError::unavailable)?;
    (0..count)
        .map(|i| {
            let device = Device::get_device(i).map_err(BackendError::unavailable)?;
            let name = device
                .name()
                .unwrap_or_else(|_| UNKNOWN_DEVICE_NAME.to_string());
            Ok(format!("{i}: {name}"))
        })
        .collect()
}

pub fn device_name(index: usize) -> String {
    select_device(index)
        .ok()
        .and_then(|device| device.name().ok())
        .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
}

pub fn device_driver(index: usize) -> String {
    select_device(index)
        .ok()
        .and_then(|_| CudaApiVersion::get().ok())
        .map(|v| format!("CUDA {}.{}", v.major(), v.minor()))
        .unwrap_or_else(|| UNKNOWN_DEVICE_DRIVER.to_string())
}
