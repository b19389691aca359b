use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};
use num_traits::{Num, NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::Values;

/// Iterate over each primitive type, binding `$enc` as a type alias for the native type.
#[macro_export]
macro_rules! match_each_ptype {
    ($self:expr, | $enc:ident | $body:block) => {{
        use $crate::PType;
        match $self {
            PType::I32 => {
                type $enc = i32;
                $body
            }
            PType::I64 => {
                type $enc = i64;
                $body
            }
            PType::F32 => {
                type $enc = f32;
                $body
            }
            PType::F64 => {
                type $enc = f64;
                $body
            }
        }
    }};
}

/// The element type of an [`crate::NdArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PType {
    I32,
    I64,
    F32,
    F64,
}

impl PType {
    /// Width of a single element in bytes.
    pub const fn byte_width(&self) -> usize {
        match self {
            PType::I32 | PType::F32 => 4,
            PType::I64 | PType::F64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, PType::F32 | PType::F64)
    }

    pub const fn is_int(&self) -> bool {
        !self.is_float()
    }
}

impl Display for PType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PType::I32 => write!(f, "i32"),
            PType::I64 => write!(f, "i64"),
            PType::F32 => write!(f, "f32"),
            PType::F64 => write!(f, "f64"),
        }
    }
}

/// A native Rust type that can be stored in an [`crate::NdArray`].
pub trait NativePType:
    Copy + Default + Debug + PartialEq + PartialOrd + Num + NumCast + ToPrimitive + Send + Sync + 'static
{
    const PTYPE: PType;

    fn as_slice(values: &Values) -> Option<&[Self]>;

    fn as_mut_vec(values: &mut Values) -> Option<&mut Vec<Self>>;

    fn into_values(data: Vec<Self>) -> Values;

    fn put_le<B: BufMut>(self, buf: &mut B);

    fn get_le<B: Buf>(buf: &mut B) -> Self;
}

macro_rules! native_ptype {
    ($T:ty, $ptype:ident, $put:ident, $get:ident) => {
        impl NativePType for $T {
            const PTYPE: PType = PType::$ptype;

            fn as_slice(values: &Values) -> Option<&[Self]> {
                match values {
                    Values::$ptype(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn as_mut_vec(values: &mut Values) -> Option<&mut Vec<Self>> {
                match values {
                    Values::$ptype(v) => Some(v),
                    _ => None,
                }
            }

            fn into_values(data: Vec<Self>) -> Values {
                Values::$ptype(data)
            }

            #[inline]
            fn put_le<B: BufMut>(self, buf: &mut B) {
                buf.$put(self)
            }

            #[inline]
            fn get_le<B: Buf>(buf: &mut B) -> Self {
                buf.$get()
            }
        }
    };
}

native_ptype!(i32, I32, put_i32_le, get_i32_le);
native_ptype!(i64, I64, put_i64_le, get_i64_le);
native_ptype!(f32, F32, put_f32_le, get_f32_le);
native_ptype!(f64, F64, put_f64_le, get_f64_le);
