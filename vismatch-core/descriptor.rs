use crate::device::{Device, DeviceBuffer, DeviceResult, KernelContext};
use crate::error::ErrorKind;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor data has {len} values, expected {rows}x{cols}")]
    Shape { rows: usize, cols: usize, len: usize },
    #[error("descriptor row {row} has width {actual}, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("descriptor value at row {row}, column {col} is not finite")]
    NonFinite { row: usize, col: usize },
}

impl DescriptorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionViolation
    }
}

/// Element type of a descriptor matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DescriptorKind {
    /// Packed bit strings, one byte per column
    Binary,
    Float,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Binary => write!(f, "binary"),
            DescriptorKind::Float => write!(f, "float"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HostData {
    Binary(Vec<u8>),
    Float(Vec<f32>),
}

/// Host-resident descriptor matrix, one row per keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSet {
    rows: usize,
    cols: usize,
    data: HostData,
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self::empty(DescriptorKind::Float, 0)
    }
}

fn check_shape(rows: usize, cols: usize, len: usize) -> Result<(), DescriptorError> {
    if rows.checked_mul(cols) != Some(len) {
        return Err(DescriptorError::Shape { rows, cols, len });
    }
    Ok(())
}

/// Float rows must be finite: a NaN distance compares false against
/// everything and would hide the true nearest neighbour.
fn check_finite(cols: usize, data: &[f32]) -> Result<(), DescriptorError> {
    match data.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(DescriptorError::NonFinite {
            row: i / cols.max(1),
            col: i % cols.max(1),
        }),
        None => Ok(()),
    }
}

fn flatten_rows<T: Copy, R: AsRef<[T]>>(rows: &[R]) -> Result<(usize, Vec<T>), DescriptorError> {
    let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
    let mut data = Vec::with_capacity(rows.len() * cols);
    for (row, r) in rows.iter().enumerate() {
        let r = r.as_ref();
        if r.len() != cols {
            return Err(DescriptorError::RaggedRows {
                row,
                expected: cols,
                actual: r.len(),
            });
        }
        data.extend_from_slice(r);
    }
    Ok((cols, data))
}

impl DescriptorSet {
    /// Zero rows of the given kind and width
    pub fn empty(kind: DescriptorKind, cols: usize) -> Self {
        let data = match kind {
            DescriptorKind::Binary => HostData::Binary(Vec::new()),
            DescriptorKind::Float => HostData::Float(Vec::new()),
        };
        Self { rows: 0, cols, data }
    }

    pub fn binary(rows: usize, cols: usize, data: Vec<u8>) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            data: HostData::Binary(data),
        })
    }

    pub fn float(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, data.len())?;
        check_finite(cols, &data)?;
        Ok(Self {
            rows,
            cols,
            data: HostData::Float(data),
        })
    }

    pub fn from_binary_rows<R: AsRef<[u8]>>(rows: &[R]) -> Result<Self, DescriptorError> {
        let (cols, data) = flatten_rows(rows)?;
        Self::binary(rows.len(), cols, data)
    }

    pub fn from_float_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, DescriptorError> {
        let (cols, data) = flatten_rows(rows)?;
        Self::float(rows.len(), cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn kind(&self) -> DescriptorKind {
        match self.data {
            HostData::Binary(_) => DescriptorKind::Binary,
            HostData::Float(_) => DescriptorKind::Float,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match &self.data {
            HostData::Binary(d) => Some(d),
            HostData::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match &self.data {
            HostData::Float(d) => Some(d),
            HostData::Binary(_) => None,
        }
    }

    pub fn row(&self, i: usize) -> Option<RowRef<'_>> {
        (i < self.rows).then(|| self.view().row(i))
    }

    pub fn view(&self) -> DescriptorView<'_> {
        let data = match &self.data {
            HostData::Binary(d) => ViewData::Binary(d),
            HostData::Float(d) => ViewData::Float(d),
        };
        DescriptorView {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Explicit host-to-device transfer.
    pub fn upload(&self, device: &Device) -> DeviceDescriptors {
        let data = match &self.data {
            HostData::Binary(d) => DeviceData::Binary(device.upload(d)),
            HostData::Float(d) => DeviceData::Float(device.upload(d)),
        };
        DeviceDescriptors {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }
}

/// One descriptor row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowRef<'a> {
    Binary(&'a [u8]),
    Float(&'a [f32]),
}

impl RowRef<'_> {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            RowRef::Binary(_) => DescriptorKind::Binary,
            RowRef::Float(_) => DescriptorKind::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowRef::Binary(r) => r.len(),
            RowRef::Float(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum ViewData<'a> {
    Binary(&'a [u8]),
    Float(&'a [f32]),
}

/// Borrowed descriptor matrix, either host memory or a kernel's view of
/// device memory.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorView<'a> {
    rows: usize,
    cols: usize,
    data: ViewData<'a>,
}

impl<'a> DescriptorView<'a> {
    pub fn binary(rows: usize, cols: usize, data: &'a [u8]) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            data: ViewData::Binary(data),
        })
    }

    pub fn float(rows: usize, cols: usize, data: &'a [f32]) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, data.len())?;
        check_finite(cols, data)?;
        Ok(Self {
            rows,
            cols,
            data: ViewData::Float(data),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn kind(&self) -> DescriptorKind {
        match self.data {
            ViewData::Binary(_) => DescriptorKind::Binary,
            ViewData::Float(_) => DescriptorKind::Float,
        }
    }

    /// Row `i`. Panics if `i >= rows()`.
    #[inline]
    pub fn row(&self, i: usize) -> RowRef<'a> {
        let range = i * self.cols..(i + 1) * self.cols;
        match self.data {
            ViewData::Binary(d) => RowRef::Binary(&d[range]),
            ViewData::Float(d) => RowRef::Float(&d[range]),
        }
    }

    pub fn to_owned_set(&self) -> DescriptorSet {
        let data = match self.data {
            ViewData::Binary(d) => HostData::Binary(d.to_vec()),
            ViewData::Float(d) => HostData::Float(d.to_vec()),
        };
        DescriptorSet {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }
}

#[derive(Debug, Clone)]
enum DeviceData {
    Binary(DeviceBuffer<u8>),
    Float(DeviceBuffer<f32>),
}

/// Device-resident descriptor matrix. Host code reads it only through
/// `download`.
#[derive(Debug, Clone)]
pub struct DeviceDescriptors {
    rows: usize,
    cols: usize,
    data: DeviceData,
}

impl DeviceDescriptors {
    pub fn from_binary(
        rows: usize,
        cols: usize,
        buffer: DeviceBuffer<u8>,
    ) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, buffer.len())?;
        Ok(Self {
            rows,
            cols,
            data: DeviceData::Binary(buffer),
        })
    }

    pub fn from_float(
        rows: usize,
        cols: usize,
        buffer: DeviceBuffer<f32>,
    ) -> Result<Self, DescriptorError> {
        check_shape(rows, cols, buffer.len())?;
        check_finite(cols, buffer.contents())?;
        Ok(Self {
            rows,
            cols,
            data: DeviceData::Float(buffer),
        })
    }

    /// Keep an owned matrix produced inside a kernel on the device.
    pub fn alloc(ctx: &KernelContext, set: DescriptorSet) -> Self {
        let data = match set.data {
            HostData::Binary(d) => DeviceData::Binary(ctx.alloc(d)),
            HostData::Float(d) => DeviceData::Float(ctx.alloc(d)),
        };
        Self {
            rows: set.rows,
            cols: set.cols,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn kind(&self) -> DescriptorKind {
        match self.data {
            DeviceData::Binary(_) => DescriptorKind::Binary,
            DeviceData::Float(_) => DescriptorKind::Float,
        }
    }

    pub fn device_id(&self) -> u64 {
        match &self.data {
            DeviceData::Binary(b) => b.device_id(),
            DeviceData::Float(b) => b.device_id(),
        }
    }

    /// Explicit device-to-host transfer.
    pub fn download(&self, device: &Device) -> DeviceResult<DescriptorSet> {
        let data = match &self.data {
            DeviceData::Binary(b) => HostData::Binary(device.download(b)?),
            DeviceData::Float(b) => HostData::Float(device.download(b)?),
        };
        Ok(DescriptorSet {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn view<'a>(&'a self, ctx: &KernelContext) -> DeviceResult<DescriptorView<'a>> {
        let data = match &self.data {
            DeviceData::Binary(b) => ViewData::Binary(b.view(ctx)?),
            DeviceData::Float(b) => ViewData::Float(b.view(ctx)?),
        };
        Ok(DescriptorView {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}
