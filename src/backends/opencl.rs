//! OpenCL backend.
//!
//! The arrays live in device buffers created through the [`ocl`][1] crate's program-queue object.
//! Each kernel is enqueued on the queue and the queue is finished before the call returns.
//!
//! [1]: https://crates.io/crates/ocl

use super::{check_array_size, Stream, UNKNOWN_DEVICE_DRIVER, UNKNOWN_DEVICE_NAME};
use crate::{
    consts::{BLOCK_SIZE_1D, DOT_BLOCK_SIZE, DOT_NUM_BLOCKS},
    errors::{BackendError, BackendResult},
    kernels::device::CL_STREAM,
    utils::StreamFloat,
};

use log::debug;
use ocl::{
    enums::{DeviceInfo, DeviceInfoResult},
    Buffer, Device, Kernel, Platform, ProQue, SpatialDims,
};

use std::mem::size_of;

/// OpenCL kernel provider.
pub struct OclStream<T: StreamFloat> {
    pro_que: ProQue,
    a: Buffer<T>,
    b: Buffer<T>,
    c: Buffer<T>,
    sums: Buffer<T>,
    copy_kernel: Kernel,
    mul_kernel: Kernel,
    add_kernel: Kernel,
    triad_kernel: Kernel,
    dot_kernel: Kernel,
    array_size: usize,
    device_name: String,
}

/// Every device of every platform, in enumeration order.
fn devices() -> BackendResult<Vec<(Platform, Device)>> {
    let mut all = Vec::new();
    for platform in Platform::list() {
        let devices = Device::list_all(platform).map_err(BackendError::unavailable)?;
        all.extend(devices.into_iter().map(|device| (platform, device)));
    }
    Ok(all)
}

fn select_device(index: usize) -> BackendResult<(Platform, Device)> {
    devices()?.into_iter().nth(index).ok_or_else(|| {
        BackendError::Unavailable(format!("no OpenCL device with index {index}"))
    })
}

impl<T: StreamFloat> OclStream<T> {
    pub fn new(array_size: usize, device_index: usize, scalar: T) -> BackendResult<Self> {
        check_array_size(array_size)?;
        let (platform, device) = select_device(device_index)?;
        let device_name = device.name().map_err(BackendError::unavailable)?;
        debug!("OpenCL device {device_index}: {device_name}");

        // Fail before touching the device if the arrays cannot fit
        let nb_bytes = array_size
            .checked_mul(size_of::<T>())
            .ok_or_else(|| BackendError::allocation("array size overflows"))?;
        if let Ok(DeviceInfoResult::MaxMemAllocSize(max)) = device.info(DeviceInfo::MaxMemAllocSize)
        {
            if nb_bytes as u64 > max {
                return Err(BackendError::Allocation(format!(
                    "{nb_bytes} bytes per array exceed the device's maximum allocation of {max} bytes"
                )));
            }
        }
        if let Ok(DeviceInfoResult::GlobalMemSize(total)) = device.info(DeviceInfo::GlobalMemSize) {
            if 3 * nb_bytes as u64 > total {
                return Err(BackendError::Allocation(format!(
                    "{} bytes exceed the device's {total} bytes of global memory",
                    3 * nb_bytes
                )));
            }
        }

        // Create OpenCL program-queue object
        let pro_que = ProQue::builder()
            .platform(platform)
            .device(device)
            .src(CL_STREAM.source_for::<T>())
            .dims(array_size)
            .build()
            .map_err(BackendError::unavailable)?;

        // Create device vectors
        let a = pro_que
            .buffer_builder::<T>()
            .len(array_size)
            .build()
            .map_err(BackendError::allocation)?;
        let b = pro_que
            .buffer_builder::<T>()
            .len(array_size)
            .build()
            .map_err(BackendError::allocation)?;
        let c = pro_que
            .buffer_builder::<T>()
            .len(array_size)
            .build()
            .map_err(BackendError::allocation)?;
        let sums = pro_que
            .buffer_builder::<T>()
            .len(DOT_NUM_BLOCKS)
            .build()
            .map_err(BackendError::allocation)?;

        let n = array_size as u64;
        let mut copy_kernel = pro_que
            .kernel_builder(CL_STREAM.copy())
            .arg(&a)
            .arg(&c)
            .arg(n)
            .build()
            .map_err(BackendError::unavailable)?;
        let mut mul_kernel = pro_que
            .kernel_builder(CL_STREAM.mul())
            .arg(&b)
            .arg(&c)
            .arg(scalar)
            .arg(n)
            .build()
            .map_err(BackendError::unavailable)?;
        let mut add_kernel = pro_que
            .kernel_builder(CL_STREAM.add())
            .arg(&a)
            .arg(&b)
            .arg(&c)
            .arg(n)
            .build()
            .map_err(BackendError::unavailable)?;
        let mut triad_kernel = pro_que
            .kernel_builder(CL_STREAM.triad())
            .arg(&a)
            .arg(&b)
            .arg(&c)
            .arg(scalar)
            .arg(n)
            .build()
            .map_err(BackendError::unavailable)?;
        let dot_kernel = pro_que
            .kernel_builder(CL_STREAM.dot())
            .global_work_size(DOT_NUM_BLOCKS * DOT_BLOCK_SIZE)
            .local_work_size(DOT_BLOCK_SIZE)
            .arg(&a)
            .arg(&b)
            .arg(&sums)
            .arg_local::<T>(DOT_BLOCK_SIZE)
            .arg(n)
            .build()
            .map_err(BackendError::unavailable)?;

        if array_size >= BLOCK_SIZE_1D && array_size % BLOCK_SIZE_1D == 0 {
            for kernel in [
                &mut copy_kernel,
                &mut mul_kernel,
                &mut add_kernel,
                &mut triad_kernel,
            ] {
                kernel.set_default_local_work_size(SpatialDims::One(BLOCK_SIZE_1D));
            }
        }

        Ok(Self {
            pro_que,
            a,
            b,
            c,
            sums,
            copy_kernel,
            mul_kernel,
            add_kernel,
            triad_kernel,
            dot_kernel,
            array_size,
            device_name,
        })
    }

    fn enqueue(&self, kernel: &Kernel) -> BackendResult<()> {
        unsafe {
            kernel.enq().map_err(BackendError::execution)?;
        }
        self.pro_que
            .queue()
            .finish()
            .map_err(BackendError::execution)
    }

    fn read(&self, buffer: &Buffer<T>, len: usize) -> BackendResult<Vec<T>> {
        let mut host = vec![T::zero(); len];
        buffer
            .read(&mut host)
            .enq()
            .map_err(BackendError::execution)?;
        Ok(host)
    }
}

impl<T: StreamFloat> Stream<T> for OclStream<T> {
    fn init_arrays(&mut self, init_a: T, init_b: T, init_c: T) -> BackendResult<()> {
        let kernel = self
            .pro_que
            .kernel_builder(CL_STREAM.init())
            .arg(&self.a)
            .arg(&self.b)
            .arg(&self.c)
            .arg(init_a)
            .arg(init_b)
            .arg(init_c)
            .arg(self.array_size as u64)
            .build()
            .map_err(BackendError::execution)?;
        self.enqueue(&kernel)
    }

    fn read_arrays(&self) -> BackendResult<(Vec<T>, Vec<T>, Vec<T>)> {
        Ok((
            self.read(&self.a, self.array_size)?,
            self.read(&self.b, self.array_size)?,
            self.read(&self.c, self.array_size)?,
        ))
    }

    fn copy(&mut self) -> BackendResult<()> {
        self.enqueue(&self.copy_kernel)
    }

    fn mul(&mut self) -> BackendResult<()> {
        self.enqueue(&self.mul_kernel)
    }

    fn add(&mut self) -> BackendResult<()> {
        self.enqueue(&self.add_kernel)
    }

    fn triad(&mut self) -> BackendResult<()> {
        self.enqueue(&self.triad_kernel)
    }

    fn dot(&mut self) -> BackendResult<T> {
        self.enqueue(&self.dot_kernel)?;
        let sum = self
            .read(&self.sums, DOT_NUM_BLOCKS)?
            .into_iter()
            .fold(0.0, |acc, s| acc + s.widen());
        Ok(T::from_f64_lossy(sum))
    }

    fn array_size(&self) -> usize {
        self.array_size
    }

    fn description(&self) -> String {
        format!("OpenCL ({})", self.device_name)
    }
}

pub fn list_devices() -> BackendResult<Vec<String>> {
    Ok(devices()?
        .into_iter()
        .enumerate()
        .map(|(i, (_, device))| {
            format!(
                "{i}: {}",
                device
                    .name()
                    .unwrap_or_else(|_| UNKNOWN_DEVICE_NAME.to_string())
            )
        })
        .collect())
}

pub fn device_name(index: usize) -> String {
    select_device(index)
        .ok()
        .and_then(|(_, device)| device.name().ok())
        .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
}

pub fn device_driver(index: usize) -> String {
    select_device(index)
        .ok()
        .and_then(|(_, device)| device.info(DeviceInfo::DriverVersion).ok())
        .map(|info| info.to_string())
        .unwrap_or_else(|| UNKNOWN_DEVICE_DRIVER.to_string())
}
