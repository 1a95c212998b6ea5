use crate::{Error, Result};
use bitarray::BitArray;
use std::str::FromStr;

/// The widest binary descriptor that can be stored, in bytes.
pub const MAX_BINARY_BYTES: usize = 64;

/// A binary descriptor row. Shorter descriptors leave the trailing bytes zero,
/// which does not affect their Hamming distance.
pub type BinaryDescriptor = BitArray<MAX_BINARY_BYTES>;

/// Whether descriptors are bit strings or real valued vectors.
///
/// The names `DES_BINARY` and `DES_HOG` select the norm used by the
/// brute force matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorKind {
    Binary,
    Float,
}

impl FromStr for DescriptorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DES_BINARY" => Ok(Self::Binary),
            "DES_HOG" => Ok(Self::Float),
            _ => Err(Error::UnknownDescriptorKind(s.to_owned())),
        }
    }
}

/// A set of descriptors, one row per keypoint.
#[derive(Debug, Clone)]
pub enum Descriptors {
    Binary {
        /// Number of significant bytes per row.
        length: usize,
        rows: Vec<BinaryDescriptor>,
    },
    Float {
        dims: usize,
        /// Row-major values, `dims` per descriptor.
        values: Vec<f32>,
    },
}

impl Descriptors {
    /// Pack byte rows of `length` bytes each into a binary set. Shorter rows
    /// are padded with zeros and longer ones truncated.
    pub fn from_bytes<'a>(length: usize, rows: impl IntoIterator<Item = &'a [u8]>) -> Self {
        debug_assert!(length <= MAX_BINARY_BYTES);
        let rows = rows
            .into_iter()
            .map(|bytes| {
                let mut row = BinaryDescriptor::zeros();
                for (dst, &src) in row.bytes_mut().iter_mut().zip(bytes.iter().take(length)) {
                    *dst = src;
                }
                row
            })
            .collect();
        Self::Binary { length, rows }
    }

    pub fn empty(kind: DescriptorKind, width: usize) -> Self {
        match kind {
            DescriptorKind::Binary => Self::Binary {
                length: width,
                rows: vec![],
            },
            DescriptorKind::Float => Self::Float {
                dims: width,
                values: vec![],
            },
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Binary { .. } => DescriptorKind::Binary,
            Self::Float { .. } => DescriptorKind::Float,
        }
    }

    /// Bytes per binary row or dimensions per float row.
    pub fn width(&self) -> usize {
        match self {
            Self::Binary { length, .. } => *length,
            Self::Float { dims, .. } => *dims,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary { rows, .. } => rows.len(),
            Self::Float { dims, values } => {
                if *dims == 0 {
                    0
                } else {
                    values.len() / dims
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn binary_rows(&self) -> Option<&[BinaryDescriptor]> {
        match self {
            Self::Binary { rows, .. } => Some(rows),
            Self::Float { .. } => None,
        }
    }

    /// Iterate over the rows of a float set.
    pub fn float_rows(&self) -> Option<impl Iterator<Item = &[f32]> + Clone + '_> {
        match self {
            Self::Float { dims, values } if *dims > 0 => Some(values.chunks_exact(*dims)),
            _ => None,
        }
    }

    /// Convert to 32-bit floats, one dimension per descriptor byte.
    ///
    /// Float sets are returned unchanged.
    pub fn to_float(&self) -> Descriptors {
        match self {
            Self::Binary { length, rows } => Self::Float {
                dims: *length,
                values: rows
                    .iter()
                    .flat_map(|row| row.bytes()[..*length].iter().map(|&b| f32::from(b)))
                    .collect(),
            },
            Self::Float { .. } => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_descriptor_kind() {
        assert_eq!(
            "DES_BINARY".parse::<DescriptorKind>().unwrap(),
            DescriptorKind::Binary
        );
        assert_eq!(
            "DES_HOG".parse::<DescriptorKind>().unwrap(),
            DescriptorKind::Float
        );
        assert!(matches!(
            "DES_FLOAT".parse::<DescriptorKind>(),
            Err(Error::UnknownDescriptorKind(_))
        ));
    }

    #[test]
    fn binary_to_float_keeps_byte_values() {
        let a = [1u8, 2, 255];
        let b = [0u8, 128, 7];
        let set = Descriptors::from_bytes(3, [&a[..], &b[..]]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.width(), 3);
        let float = set.to_float();
        assert_eq!(float.kind(), DescriptorKind::Float);
        let rows: Vec<&[f32]> = float.float_rows().unwrap().collect();
        assert_eq!(rows[0], &[1.0, 2.0, 255.0][..]);
        assert_eq!(rows[1], &[0.0, 128.0, 7.0][..]);
    }

    #[test]
    fn short_and_long_rows_are_padded_and_truncated() {
        let short = [0xaau8; 2];
        let long = [0x11u8; 6];
        let set = Descriptors::from_bytes(4, [&short[..], &long[..]]);
        let rows = set.binary_rows().unwrap();
        assert_eq!(set.width(), 4);
        assert_eq!(rows[0].bytes()[..4], [0xaa, 0xaa, 0, 0]);
        assert_eq!(rows[1].bytes()[..5], [0x11, 0x11, 0x11, 0x11, 0]);
    }

    #[test]
    fn padding_bytes_stay_zero() {
        let a = [0xffu8; 32];
        let set = Descriptors::from_bytes(32, [&a[..]]);
        let row = &set.binary_rows().unwrap()[0];
        assert!(row.bytes()[32..].iter().all(|&b| b == 0));
        assert!(row.bytes()[..32].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn empty_float_set() {
        let set = Descriptors::empty(DescriptorKind::Float, 128);
        assert!(set.is_empty());
        assert_eq!(set.width(), 128);
    }
}
