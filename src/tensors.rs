//! Memory-reference descriptors.
//!
//! # Memory References
//!
//! A kernel never owns tensor memory. The caller hands it borrowed views made
//! of a data slice, per-axis sizes and per-axis strides (in elements), the
//! same shape as the runtime's memref ABI.
//!
//! ## Design Highlights
//! - The element type is an explicit [`DType`] tag carried by the view
//! - Typed access goes through [`MemRef::as_slice`] / [`MemRefMut::as_mut_slice`],
//!   which fail with [`KernelError::DtypeMismatch`] instead of reinterpreting bytes
//! - Construction checks that every addressed element lies inside the slice,
//!   so kernels can index without going out of bounds
//!
//! ## Example
//!
//! ```rust
//! use ral_kernels::tensors::MemRef;
//! let data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let m = MemRef::contiguous(&data[..], [2, 3]).unwrap();
//! assert_eq!(m.strides(), &[3, 1]);
//! assert_eq!(m.as_slice::<f32>().unwrap()[4], 5.0);
//! ```

use core::fmt;

use crate::error::{KernelError, KernelResult};

/// Element type tag of a memref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    I32,
}

impl DType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 => 8,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types a memref can carry.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Tag stored in the memref for this type.
    const DTYPE: DType;

    #[doc(hidden)]
    fn view<'a>(data: &Data<'a>) -> Option<&'a [Self]>;

    #[doc(hidden)]
    fn view_mut<'s>(data: &'s mut DataMut<'_>) -> Option<&'s mut [Self]>;
}

/// Borrowed, tagged read-only storage.
#[derive(Debug, Clone, Copy)]
pub enum Data<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    I32(&'a [i32]),
}

/// Borrowed, tagged writable storage.
#[derive(Debug)]
pub enum DataMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    I32(&'a mut [i32]),
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn view<'a>(data: &Data<'a>) -> Option<&'a [Self]> {
                match *data {
                    Data::$variant(slice) => Some(slice),
                    _ => None,
                }
            }

            fn view_mut<'s>(data: &'s mut DataMut<'_>) -> Option<&'s mut [Self]> {
                match data {
                    DataMut::$variant(slice) => Some(&mut **slice),
                    _ => None,
                }
            }
        }

        impl<'a> From<&'a [$ty]> for Data<'a> {
            fn from(slice: &'a [$ty]) -> Self {
                Data::$variant(slice)
            }
        }

        impl<'a> From<&'a Vec<$ty>> for Data<'a> {
            fn from(vec: &'a Vec<$ty>) -> Self {
                Data::$variant(vec.as_slice())
            }
        }

        impl<'a> From<&'a mut [$ty]> for DataMut<'a> {
            fn from(slice: &'a mut [$ty]) -> Self {
                DataMut::$variant(slice)
            }
        }

        impl<'a> From<&'a mut Vec<$ty>> for DataMut<'a> {
            fn from(vec: &'a mut Vec<$ty>) -> Self {
                DataMut::$variant(vec.as_mut_slice())
            }
        }
    };
}

impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(i32, I32);

impl Data<'_> {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::F64(s) => s.len(),
            Self::I32(s) => s.len(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            Self::F32(s) => s.as_ptr().cast(),
            Self::F64(s) => s.as_ptr().cast(),
            Self::I32(s) => s.as_ptr().cast(),
        }
    }
}

impl DataMut<'_> {
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::F64(s) => s.len(),
            Self::I32(s) => s.len(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            Self::F32(s) => s.as_ptr().cast(),
            Self::F64(s) => s.as_ptr().cast(),
            Self::I32(s) => s.as_ptr().cast(),
        }
    }
}

/// Sizes and strides of a memref, in elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    sizes: Vec<usize>,
    strides: Vec<usize>,
}

impl Geometry {
    /// Builds a geometry, checking that it addresses at most `len` elements.
    ///
    /// # Errors
    ///
    /// Fails if `sizes` and `strides` differ in length or the addressed extent
    /// exceeds `len`.
    pub fn new(sizes: Vec<usize>, strides: Vec<usize>, len: usize) -> KernelResult<Self> {
        if sizes.len() != strides.len() {
            return Err(KernelError::InvalidMemRef(format!(
                "{} sizes but {} strides",
                sizes.len(),
                strides.len()
            )));
        }
        let geometry = Self { sizes, strides };
        let extent = geometry.extent().ok_or_else(|| {
            KernelError::InvalidMemRef(format!("extent of {:?} overflows", geometry.sizes))
        })?;
        if extent > len {
            return Err(KernelError::InvalidMemRef(format!(
                "sizes {:?} with strides {:?} address {extent} elements, buffer holds {len}",
                geometry.sizes, geometry.strides
            )));
        }
        Ok(geometry)
    }

    /// Row-major strides for `sizes`.
    #[must_use]
    pub fn row_major_strides(sizes: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; sizes.len()];
        for d in (0..sizes.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * sizes[d + 1];
        }
        strides
    }

    /// Number of elements spanned from the base offset, `None` on overflow.
    fn extent(&self) -> Option<usize> {
        if self.sizes.contains(&0) {
            return Some(0);
        }
        self.sizes
            .iter()
            .zip(&self.strides)
            .try_fold(1usize, |acc, (&size, &stride)| {
                (size - 1).checked_mul(stride).and_then(|span| acc.checked_add(span))
            })
    }

    #[must_use]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.sizes.iter().product()
    }

    /// `true` if any axis has size zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sizes.contains(&0)
    }

    /// Product of all axes except the trailing two.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        let lead = self.rank().saturating_sub(2);
        self.sizes[..lead].iter().product()
    }

    /// `true` if the strides are exactly the row-major strides of the sizes.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        self.sizes
            .iter()
            .zip(&self.strides)
            .zip(Self::row_major_strides(&self.sizes))
            .all(|((&size, &stride), dense)| size <= 1 || stride == dense)
    }

    /// Stride between consecutive matrices when the leading axes are
    /// flattened into one batch axis.
    ///
    /// Returns `None` if the leading axes cannot be collapsed. A batch of one
    /// reports a stride of zero.
    #[must_use]
    pub fn batch_stride(&self) -> Option<usize> {
        let lead = self.rank().saturating_sub(2);
        let axes: Vec<usize> = (0..lead).filter(|&d| self.sizes[d] > 1).collect();
        for pair in axes.windows(2) {
            let (outer, inner) = (pair[0], pair[1]);
            if self.strides[outer] != self.strides[inner] * self.sizes[inner] {
                return None;
            }
        }
        Some(axes.last().map_or(0, |&d| self.strides[d]))
    }
}

/// A borrowed, read-only memref.
#[derive(Debug, Clone)]
pub struct MemRef<'a> {
    data: Data<'a>,
    geometry: Geometry,
}

impl<'a> MemRef<'a> {
    /// Wraps `data` with explicit sizes and strides.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidMemRef`] if the view does not fit `data`.
    pub fn new(
        data: impl Into<Data<'a>>,
        sizes: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> KernelResult<Self> {
        let data = data.into();
        let geometry = Geometry::new(sizes.into(), strides.into(), data.len())?;
        Ok(Self { data, geometry })
    }

    /// Wraps `data` as a dense row-major view.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidMemRef`] if `data` is too short.
    pub fn contiguous(data: impl Into<Data<'a>>, sizes: impl Into<Vec<usize>>) -> KernelResult<Self> {
        let sizes = sizes.into();
        let strides = Geometry::row_major_strides(&sizes);
        Self::new(data, sizes, strides)
    }

    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn sizes(&self) -> &[usize] {
        self.geometry.sizes()
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        self.geometry.strides()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.geometry.rank()
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.geometry.num_elements()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Product of all axes except the trailing two.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.geometry.batch_size()
    }

    /// Base address, for diagnostics only.
    #[must_use]
    pub fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Typed view of the underlying slice.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DtypeMismatch`] if `T` is not the stored type.
    pub fn as_slice<T: Element>(&self) -> KernelResult<&'a [T]> {
        T::view(&self.data).ok_or(KernelError::DtypeMismatch {
            expected: T::DTYPE,
            found: self.dtype(),
        })
    }
}

/// A borrowed, writable memref.
#[derive(Debug)]
pub struct MemRefMut<'a> {
    data: DataMut<'a>,
    geometry: Geometry,
}

impl<'a> MemRefMut<'a> {
    /// Wraps `data` with explicit sizes and strides.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidMemRef`] if the view does not fit `data`.
    pub fn new(
        data: impl Into<DataMut<'a>>,
        sizes: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> KernelResult<Self> {
        let data = data.into();
        let geometry = Geometry::new(sizes.into(), strides.into(), data.len())?;
        Ok(Self { data, geometry })
    }

    /// Wraps `data` as a dense row-major view.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidMemRef`] if `data` is too short.
    pub fn contiguous(
        data: impl Into<DataMut<'a>>,
        sizes: impl Into<Vec<usize>>,
    ) -> KernelResult<Self> {
        let sizes = sizes.into();
        let strides = Geometry::row_major_strides(&sizes);
        Self::new(data, sizes, strides)
    }

    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn sizes(&self) -> &[usize] {
        self.geometry.sizes()
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        self.geometry.strides()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.geometry.rank()
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.geometry.num_elements()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty()
    }

    /// Product of all axes except the trailing two.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.geometry.batch_size()
    }

    /// Base address, for diagnostics only.
    #[must_use]
    pub fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Typed writable view of the underlying slice.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DtypeMismatch`] if `T` is not the stored type.
    pub fn as_mut_slice<T: Element>(&mut self) -> KernelResult<&mut [T]> {
        let found = self.dtype();
        T::view_mut(&mut self.data).ok_or(KernelError::DtypeMismatch {
            expected: T::DTYPE,
            found,
        })
    }
}
