use crate::{WireError, WireResult};
use byteorder::ByteOrder;
use std::mem;

/// Types that know their exact encoded size and how to write themselves
/// into the head of a byte window.
pub trait WireEmit {
    /// Exact number of bytes [`emit`](Self::emit) will produce.
    fn size(&self) -> usize;

    /// Encode into the head of `buf`, returning the bytes written.
    ///
    /// `debug_offset` is the logical position of `buf` within some larger
    /// buffer; it only feeds error messages.
    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize>;
}

/// Types that can be decoded from the head of a byte window.
///
/// The lifetime lets implementations borrow from the input, so ranges and
/// string slices decode without copying. `parse(None, ..)` validates and
/// reports the consumed length without constructing a value.
pub trait WireParse<'de>: WireEmit + Default + Sized {
    /// Decode from the head of `buf` into `dst` (validate-only when
    /// `dst` is `None`), returning the bytes consumed.
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize>;
}

pub(crate) fn too_small_to_read(needed: usize, avail: usize, debug_offset: usize) -> WireError {
    WireError::Overflow(format!(
        "buffer size too small to read ({needed}) bytes out of buffer[{avail}] at offset: {debug_offset}"
    ))
}

pub(crate) fn too_small_to_write(needed: usize, avail: usize, debug_offset: usize) -> WireError {
    WireError::Overflow(format!(
        "buffer size too small to write ({needed}) bytes into buffer[{avail}] at offset: {debug_offset}"
    ))
}

impl WireEmit for u8 {
    fn size(&self) -> usize {
        1
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        if buf.is_empty() {
            return Err(too_small_to_write(1, 0, debug_offset));
        }
        buf[0] = *self;
        Ok(1)
    }
}

impl<'de> WireParse<'de> for u8 {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let Some(byte) = buf.first() else {
            return Err(too_small_to_read(1, 0, debug_offset));
        };
        if let Some(dst) = dst {
            *dst = *byte;
        }
        Ok(1)
    }
}

impl WireEmit for i8 {
    fn size(&self) -> usize {
        1
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        #[allow(clippy::cast_sign_loss)]
        (*self as u8).emit(buf, debug_offset)
    }
}

impl<'de> WireParse<'de> for i8 {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let mut byte = 0_u8;
        let n = u8::parse(dst.is_some().then_some(&mut byte), buf, debug_offset)?;
        if let Some(dst) = dst {
            #[allow(clippy::cast_possible_wrap)]
            {
                *dst = byte as i8;
            }
        }
        Ok(n)
    }
}

// Fixed-width numbers in native byte order; the endian wrappers in
// `endian.rs` reuse the same scheme with an explicit order.
macro_rules! numeric_wire {
    ($t:ty, $read:ident, $write:ident) => {
        impl WireEmit for $t {
            fn size(&self) -> usize {
                mem::size_of::<$t>()
            }

            fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
                const WIDTH: usize = mem::size_of::<$t>();
                if buf.len() < WIDTH {
                    return Err(too_small_to_write(WIDTH, buf.len(), debug_offset));
                }
                byteorder::NativeEndian::$write(&mut buf[..WIDTH], *self);
                Ok(WIDTH)
            }
        }

        impl<'de> WireParse<'de> for $t {
            fn parse(
                dst: Option<&mut Self>,
                buf: &'de [u8],
                debug_offset: usize,
            ) -> WireResult<usize> {
                const WIDTH: usize = mem::size_of::<$t>();
                if buf.len() < WIDTH {
                    return Err(too_small_to_read(WIDTH, buf.len(), debug_offset));
                }
                if let Some(dst) = dst {
                    *dst = byteorder::NativeEndian::$read(&buf[..WIDTH]);
                }
                Ok(WIDTH)
            }
        }
    };
}

numeric_wire!(u16, read_u16, write_u16);
numeric_wire!(i16, read_i16, write_i16);
numeric_wire!(u32, read_u32, write_u32);
numeric_wire!(i32, read_i32, write_i32);
numeric_wire!(u64, read_u64, write_u64);
numeric_wire!(i64, read_i64, write_i64);
numeric_wire!(f32, read_f32, write_f32);
numeric_wire!(f64, read_f64, write_f64);

/// Integer codecs usable as the length or count prefix of a combinator.
///
/// Implemented by the unsigned integers and their endian wrappers; the
/// conversions fail with `BadValue` rather than truncating.
pub trait LengthField: for<'any> WireParse<'any> {
    fn to_usize(&self) -> WireResult<usize>;

    fn from_usize(n: usize) -> WireResult<Self>;
}

macro_rules! length_field {
    ($t:ty) => {
        impl LengthField for $t {
            fn to_usize(&self) -> WireResult<usize> {
                usize::try_from(*self)
                    .map_err(|_| WireError::BadValue(format!("length ({self}) not addressable")))
            }

            fn from_usize(n: usize) -> WireResult<Self> {
                <$t>::try_from(n).map_err(|_| {
                    WireError::BadValue(format!(
                        "length ({n}) not representable in a {}-byte field",
                        mem::size_of::<$t>()
                    ))
                })
            }
        }
    };
}

length_field!(u8);
length_field!(u16);
length_field!(u32);
length_field!(u64);

#[cfg(test)]
mod tests {
    use super::{LengthField, WireEmit, WireParse};
    use crate::ErrorKind;

    #[test]
    fn numeric_roundtrip() {
        let mut buf = [0_u8; 8];
        assert_eq!(0xDEAD_BEEF_u32.emit(&mut buf, 0).unwrap(), 4);
        assert_eq!(u32::parse(None, &buf, 0).unwrap(), 4);

        let mut val = 0_u32;
        u32::parse(Some(&mut val), &buf, 0).unwrap();
        assert_eq!(val, 0xDEAD_BEEF);
    }

    #[test]
    fn short_buffer_is_overflow() {
        let buf = [0_u8; 3];
        let err = u32::parse(None, &buf, 7).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert!(err.to_string().contains("at offset: 7"), "{err}");

        let mut buf = [0_u8; 3];
        assert_eq!(
            1_u32.emit(&mut buf, 0).unwrap_err().kind(),
            ErrorKind::Overflow
        );
    }

    #[test]
    fn length_field_refuses_truncation() {
        assert_eq!(u8::from_usize(255).unwrap(), 255);
        assert_eq!(
            u8::from_usize(256).unwrap_err().kind(),
            ErrorKind::BadValue
        );
        assert_eq!(300_u16.to_usize().unwrap(), 300);
    }
}
