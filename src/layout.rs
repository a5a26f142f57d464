//! Layout decoding for compiler-emitted metadata.
//!
//! The compiler describes operand layouts with a flat `i32` array and no
//! length prefix. Which fields it holds, and in which order, follows from the
//! primitive and the operand rank alone. For a rank-`N` convolution:
//!
//! ```text
//! ┌──────────────┬───────────────┬───────────────┬──────────────┬────────────────┐
//! │ input perm   │ filter perm   │ output perm   │ strides      │ dilations      │
//! │ N × i32      │ N × i32       │ N × i32       │ (N - 2) × i32│ (N - 2) × i32  │
//! └──────────────┴───────────────┴───────────────┴──────────────┴────────────────┘
//! ```
//!
//! Entry `i` of a permutation is the physical axis holding logical axis `i`.
//! Placing `'a' + i` at that physical position spells a layout string, which
//! must be one of the closed set in [`FormatTag`]. Anything else (duplicates,
//! out-of-range indices, unknown orderings) is a decode failure.

use core::fmt;

use crate::error::{KernelError, KernelResult, Operand};
use crate::tensors::{DType, Geometry, MemRef, MemRefMut};

const CONV: &str = "conv";

/// Recognized axis orderings, named after their physical layout string.
///
/// Letters name logical axes (`a` outermost logical axis); the string lists
/// them from the outermost to the innermost physical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// `abcd`, e.g. NCHW activations or OIHW filters.
    Abcd,
    /// `acdb`, e.g. NHWC activations or OHWI filters.
    Acdb,
    /// `cdba`, e.g. HWIO filters.
    Cdba,
    /// `abc`, plain rank-3 order.
    Abc,
    /// `acb`, rank-3 with the trailing two axes swapped.
    Acb,
}

impl FormatTag {
    /// Matches a layout string against the recognized set.
    #[must_use]
    pub fn from_bytes(layout: &[u8]) -> Option<Self> {
        match layout {
            b"abcd" => Some(Self::Abcd),
            b"acdb" => Some(Self::Acdb),
            b"cdba" => Some(Self::Cdba),
            b"abc" => Some(Self::Abc),
            b"acb" => Some(Self::Acb),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abcd => "abcd",
            Self::Acdb => "acdb",
            Self::Cdba => "cdba",
            Self::Abc => "abc",
            Self::Acb => "acb",
        }
    }

    #[must_use]
    pub const fn rank(self) -> usize {
        self.as_str().len()
    }

    /// Logical axes listed from the outermost to the innermost physical axis.
    #[must_use]
    pub const fn physical_order(self) -> &'static [usize] {
        match self {
            Self::Abcd => &[0, 1, 2, 3],
            Self::Acdb => &[0, 2, 3, 1],
            Self::Cdba => &[2, 3, 1, 0],
            Self::Abc => &[0, 1, 2],
            Self::Acb => &[0, 2, 1],
        }
    }

    /// The identity layout of `rank`, if recognized.
    #[must_use]
    pub const fn plain(rank: usize) -> Option<Self> {
        match rank {
            3 => Some(Self::Abc),
            4 => Some(Self::Abcd),
            _ => None,
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads metadata values in order, without ever reading past the end.
#[derive(Debug, Clone)]
pub struct MetadataCursor<'m> {
    values: &'m [i32],
    pos: usize,
    operand: Operand,
}

impl<'m> MetadataCursor<'m> {
    #[must_use]
    pub const fn new(values: &'m [i32], operand: Operand) -> Self {
        Self {
            values,
            pos: 0,
            operand,
        }
    }

    /// Fails unless at least `needed` values remain.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::TruncatedMetadata`].
    pub fn require(&self, needed: usize) -> KernelResult<()> {
        let found = self.remaining();
        if found < needed {
            return Err(KernelError::TruncatedMetadata {
                operand: self.operand,
                needed: self.pos + needed,
                found: self.values.len(),
            });
        }
        Ok(())
    }

    /// Consumes the next value.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::TruncatedMetadata`] when exhausted.
    pub fn next_value(&mut self) -> KernelResult<i32> {
        self.require(1)?;
        let value = self.values[self.pos];
        self.pos += 1;
        Ok(value)
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.values.len() - self.pos
    }
}

/// How a permutation is spelled into the layout buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    /// Logical axes `(N, C, spatial…)`.
    Activation,
    /// Encoded as `(I, O, spatial…)`; the two leading markers are swapped so
    /// the decoded logical order is `(O, I, spatial…)`.
    Filter,
}

/// One decoded permutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLayout {
    pub tag: FormatTag,
    /// `perm[i]` is the physical axis of logical axis `i`.
    pub perm: Vec<usize>,
    /// Size of the channel axis: `C` for activations, `I` for filters.
    pub channels: usize,
}

/// Decodes `rank` permutation entries from `cursor` into a layout tag.
///
/// `sizes` are the operand's physical sizes, used to read the channel count.
///
/// # Errors
///
/// [`KernelError::TruncatedMetadata`] if the cursor runs out, and
/// [`KernelError::InvalidLayout`] if the spelled layout is not recognized.
pub fn decode_layout(
    cursor: &mut MetadataCursor<'_>,
    sizes: &[usize],
    role: AxisRole,
    op: &'static str,
    operand: Operand,
) -> KernelResult<DecodedLayout> {
    let rank = sizes.len();
    cursor.require(rank)?;
    let invalid = KernelError::InvalidLayout { op, operand };

    let mut buffer = vec![0u8; rank];
    let mut encoded = Vec::with_capacity(rank);
    for i in 0..rank {
        let value = cursor.next_value()?;
        // out-of-range axes are consumed but leave the buffer unmatched
        let axis = usize::try_from(value).ok().filter(|&axis| axis < rank);
        encoded.push(axis);
        if let Some(axis) = axis {
            let marker = match (role, i) {
                (AxisRole::Filter, 0) => b'b',
                (AxisRole::Filter, 1) => b'a',
                _ => b'a' + i as u8,
            };
            buffer[axis] = marker;
        }
    }

    let tag = FormatTag::from_bytes(&buffer).ok_or(invalid.clone())?;
    let encoded: Vec<usize> = encoded.into_iter().collect::<Option<_>>().ok_or(invalid)?;

    let (perm, channels) = match role {
        AxisRole::Activation => (encoded.clone(), sizes[encoded[1]]),
        AxisRole::Filter => {
            let mut perm = encoded.clone();
            perm.swap(0, 1);
            (perm, sizes[encoded[0]])
        }
    };
    Ok(DecodedLayout {
        tag,
        perm,
        channels,
    })
}

/// A decoded operand in logical axis order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorFormat {
    pub tag: FormatTag,
    pub dtype: DType,
    /// Logical sizes, `dims[i] = sizes[perm[i]]`.
    pub dims: Vec<usize>,
    /// Logical strides, `strides[i] = strides[perm[i]]`.
    pub strides: Vec<usize>,
}

impl TensorFormat {
    fn from_layout(layout: &DecodedLayout, dtype: DType, geometry: &Geometry) -> Self {
        Self {
            tag: layout.tag,
            dtype,
            dims: layout.perm.iter().map(|&p| geometry.sizes()[p]).collect(),
            strides: layout.perm.iter().map(|&p| geometry.strides()[p]).collect(),
        }
    }
}

/// Everything a convolution needs after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    /// `(N, C, spatial…)`
    pub input: TensorFormat,
    /// `(O, I, spatial…)`
    pub filter: TensorFormat,
    /// `(N, O, spatial…)`
    pub output: TensorFormat,
    pub padding_l: Vec<usize>,
    pub padding_r: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub input_channels: usize,
    pub kernel_channels: usize,
    pub groups: usize,
}

fn non_negative(value: i32, what: &str) -> KernelResult<usize> {
    usize::try_from(value)
        .map_err(|_| KernelError::InvalidConvParams(format!("negative {what}: {value}")))
}

fn positive(value: i32, what: &str) -> KernelResult<usize> {
    match usize::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(KernelError::InvalidConvParams(format!(
            "{what} must be positive, got {value}"
        ))),
    }
}

/// The `i32` values a padding or metadata memref declares, in order.
///
/// The backing buffer may be longer than the memref; only the first
/// `num_elements` values belong to it.
fn declared_values<'m>(memref: &MemRef<'m>, operand: Operand) -> KernelResult<&'m [i32]> {
    if !memref.geometry().is_contiguous() {
        return Err(KernelError::InvalidMemRef(format!(
            "{operand} must be a dense vector, got sizes {:?} strides {:?}",
            memref.sizes(),
            memref.strides()
        )));
    }
    let values = memref.as_slice::<i32>()?;
    let declared = memref.num_elements();
    values.get(..declared).ok_or_else(|| {
        KernelError::InvalidMemRef(format!(
            "{operand} declares {declared} values, buffer holds {}",
            values.len()
        ))
    })
}

/// Decodes and checks convolution parameters.
///
/// Fields are consumed in a fixed order: padding pairs, input layout, filter
/// layout, output layout, strides, dilations. The group count is derived as
/// `input_channels / kernel_channels` and must be exact.
///
/// # Errors
///
/// Any layout, metadata, dtype or group failure. Nothing is computed on error.
pub fn parse_conv_params(
    input: &MemRef<'_>,
    kernel: &MemRef<'_>,
    padding: &MemRef<'_>,
    output: &MemRefMut<'_>,
    metadata: &MemRef<'_>,
) -> KernelResult<ConvParams> {
    let rank = input.rank();
    let spatial = rank.saturating_sub(2);

    let pads = declared_values(padding, Operand::Padding)?;
    let mut pad_cursor = MetadataCursor::new(pads, Operand::Padding);
    pad_cursor.require(2 * spatial)?;
    let mut padding_l = Vec::with_capacity(spatial);
    let mut padding_r = Vec::with_capacity(spatial);
    for _ in 0..spatial {
        padding_l.push(non_negative(pad_cursor.next_value()?, "padding")?);
        padding_r.push(non_negative(pad_cursor.next_value()?, "padding")?);
    }

    let meta = declared_values(metadata, Operand::Metadata)?;
    let mut cursor = MetadataCursor::new(meta, Operand::Metadata);
    cursor.require(3 * rank + 2 * spatial)?;

    let input_layout =
        decode_layout(&mut cursor, input.sizes(), AxisRole::Activation, CONV, Operand::Input)?;
    log::debug!("input format: {}", input_layout.tag);
    let filter_layout =
        decode_layout(&mut cursor, kernel.sizes(), AxisRole::Filter, CONV, Operand::Filter)?;
    log::debug!("filter format: {}", filter_layout.tag);
    let output_layout =
        decode_layout(&mut cursor, output.sizes(), AxisRole::Activation, CONV, Operand::Output)?;
    log::debug!("output format: {}", output_layout.tag);

    let strides = (0..spatial)
        .map(|_| positive(cursor.next_value()?, "stride"))
        .collect::<KernelResult<Vec<_>>>()?;
    let dilations = (0..spatial)
        .map(|_| positive(cursor.next_value()?, "dilation"))
        .collect::<KernelResult<Vec<_>>>()?;

    let input_channels = input_layout.channels;
    let kernel_channels = filter_layout.channels;
    let groups = crate::validate::conv_groups(input_channels, kernel_channels)?;
    log::debug!(
        "padding_l = {padding_l:?}, padding_r = {padding_r:?}, strides = {strides:?}, \
         dilations = {dilations:?}, ic = {input_channels}, kc = {kernel_channels}, groups = {groups}"
    );

    crate::validate::check_dtype(CONV, Operand::Input, input.dtype())?;
    crate::validate::check_dtype(CONV, Operand::Filter, kernel.dtype())?;
    crate::validate::check_dtype(CONV, Operand::Output, output.dtype())?;

    Ok(ConvParams {
        input: TensorFormat::from_layout(&input_layout, input.dtype(), input.geometry()),
        filter: TensorFormat::from_layout(&filter_layout, kernel.dtype(), kernel.geometry()),
        output: TensorFormat::from_layout(&output_layout, output.dtype(), output.geometry()),
        padding_l,
        padding_r,
        strides,
        dilations,
        input_channels,
        kernel_channels,
        groups,
    })
}
