//! Emulated accelerator device.
//!
//! A `Device` owns a dedicated worker pool that stands in for a GPU queue.
//! Memory handed to the device lives in `DeviceBuffer`s whose contents host
//! code cannot read: the only ways out are `Device::download` (an explicit,
//! counted transfer) or a kernel launched on the same device, which receives
//! a `KernelContext` granting read access. Kernels are issued asynchronously
//! and hand back a `Pending` handle.

use crate::error::ErrorKind;
use log::debug;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to start device worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("buffer belongs to device {buffer}, not device {device}")]
    ForeignBuffer { device: u64, buffer: u64 },
    #[error("kernel panicked: {0}")]
    KernelPanicked(String),
    #[error("device queue disconnected before the kernel completed")]
    Disconnected,
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::ForeignBuffer { .. } => ErrorKind::PreconditionViolation,
            _ => ErrorKind::Internal,
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// Label used for worker thread names and diagnostics
    pub name: String,
    /// Worker threads backing the device queue
    pub threads: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "vismatch-gpu".to_string(),
            threads: num_cpus::get().max(1),
        }
    }
}

/// Host/device traffic observed on one device since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub uploads: usize,
    pub downloads: usize,
    pub bytes_uploaded: usize,
    pub bytes_downloaded: usize,
    pub kernels_launched: usize,
}

#[derive(Default)]
struct Counters {
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    bytes_uploaded: AtomicUsize,
    bytes_downloaded: AtomicUsize,
    kernels_launched: AtomicUsize,
}

struct DeviceInner {
    id: u64,
    name: String,
    pool: rayon::ThreadPool,
    counters: Counters,
}

/// Cheaply clonable handle to one emulated device
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("threads", &self.inner.pool.current_num_threads())
            .finish()
    }
}

impl Device {
    pub fn new(config: &DeviceConfig) -> DeviceResult<Self> {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let prefix = config.name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()?;

        debug!(
            "device {} ({}) online with {} workers",
            id,
            config.name,
            pool.current_num_threads()
        );

        Ok(Self {
            inner: Arc::new(DeviceInner {
                id,
                name: config.name.clone(),
                pool,
                counters: Counters::default(),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stats(&self) -> TransferStats {
        let c = &self.inner.counters;
        TransferStats {
            uploads: c.uploads.load(Ordering::Relaxed),
            downloads: c.downloads.load(Ordering::Relaxed),
            bytes_uploaded: c.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: c.bytes_downloaded.load(Ordering::Relaxed),
            kernels_launched: c.kernels_launched.load(Ordering::Relaxed),
        }
    }

    /// Copy host memory into a new device-resident buffer.
    pub fn upload<T: Copy + Send + Sync>(&self, host: &[T]) -> DeviceBuffer<T> {
        let c = &self.inner.counters;
        c.uploads.fetch_add(1, Ordering::Relaxed);
        c.bytes_uploaded
            .fetch_add(std::mem::size_of_val(host), Ordering::Relaxed);
        DeviceBuffer {
            device: self.inner.id,
            data: Arc::from(host),
        }
    }

    /// Copy a device buffer back into host memory.
    pub fn download<T: Copy>(&self, buffer: &DeviceBuffer<T>) -> DeviceResult<Vec<T>> {
        self.check(buffer)?;
        let c = &self.inner.counters;
        c.downloads.fetch_add(1, Ordering::Relaxed);
        c.bytes_downloaded
            .fetch_add(std::mem::size_of_val(&buffer.data[..]), Ordering::Relaxed);
        Ok(buffer.data.to_vec())
    }

    /// Fail unless `buffer` was allocated on this device.
    pub fn check<T>(&self, buffer: &DeviceBuffer<T>) -> DeviceResult<()> {
        if buffer.device != self.inner.id {
            return Err(DeviceError::ForeignBuffer {
                device: self.inner.id,
                buffer: buffer.device,
            });
        }
        Ok(())
    }

    /// Issue `kernel` on the device queue without waiting for it.
    ///
    /// A panicking kernel is reported through the returned handle as
    /// `DeviceError::KernelPanicked`.
    pub fn launch<O, E, F>(&self, kernel: F) -> Pending<O, E>
    where
        O: Send + 'static,
        E: From<DeviceError> + Send + 'static,
        F: FnOnce(&KernelContext) -> Result<O, E> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let ctx = KernelContext {
            device: self.inner.id,
        };
        self.inner
            .counters
            .kernels_launched
            .fetch_add(1, Ordering::Relaxed);

        self.inner.pool.spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| kernel(&ctx))) {
                Ok(result) => result,
                Err(payload) => Err(E::from(DeviceError::KernelPanicked(panic_message(
                    payload.as_ref(),
                )))),
            };
            // Receiver may already be gone if the caller dropped the handle.
            let _ = tx.send(outcome);
        });

        Pending { rx }
    }
}

/// Best-effort text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a kernel that was issued but may not have finished yet
#[must_use = "kernels run asynchronously; call wait() to obtain the result"]
pub struct Pending<O, E = DeviceError> {
    rx: mpsc::Receiver<Result<O, E>>,
}

impl<O, E: From<DeviceError>> Pending<O, E> {
    /// Block until the kernel completes.
    pub fn wait(self) -> Result<O, E> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(E::from(DeviceError::Disconnected)))
    }
}

/// Capability handed to running kernels; only a device can create one.
#[derive(Debug)]
pub struct KernelContext {
    device: u64,
}

impl KernelContext {
    pub fn device_id(&self) -> u64 {
        self.device
    }

    /// Keep a kernel result resident on the device.
    pub fn alloc<T: Send + Sync>(&self, data: Vec<T>) -> DeviceBuffer<T> {
        DeviceBuffer {
            device: self.device,
            data: Arc::from(data),
        }
    }
}

/// Device-resident, immutable memory
pub struct DeviceBuffer<T> {
    device: u64,
    data: Arc<[T]>,
}

impl<T> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            device: self.device,
            data: Arc::clone(&self.data),
        }
    }
}

impl<T> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("len", &self.data.len())
            .finish()
    }
}

impl<T> DeviceBuffer<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn device_id(&self) -> u64 {
        self.device
    }

    /// Contents for constructor validation; no transfer is recorded.
    pub(crate) fn contents(&self) -> &[T] {
        &self.data
    }

    /// Read access from inside a kernel running on the owning device.
    pub fn view<'a>(&'a self, ctx: &KernelContext) -> DeviceResult<&'a [T]> {
        if ctx.device != self.device {
            return Err(DeviceError::ForeignBuffer {
                device: ctx.device,
                buffer: self.device,
            });
        }
        Ok(&self.data)
    }
}
