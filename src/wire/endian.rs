use super::codec::{too_small_to_read, too_small_to_write, LengthField, WireEmit, WireParse};
use crate::WireResult;
use byteorder::ByteOrder;
use std::mem;

/// A number stored on the wire in little-endian order.
///
/// Transparent wrapper; construct with `LittleEndian(v)` and read the
/// inner value back out of `.0`. A no-op on little-endian hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LittleEndian<T>(pub T);

/// A number stored on the wire in big-endian order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigEndian<T>(pub T);

impl<T> From<T> for LittleEndian<T> {
    fn from(t: T) -> Self {
        Self(t)
    }
}

impl<T> From<T> for BigEndian<T> {
    fn from(t: T) -> Self {
        Self(t)
    }
}

macro_rules! endian_wire {
    ($wrapper:ident, $order:ty, $t:ty, $read:ident, $write:ident) => {
        impl WireEmit for $wrapper<$t> {
            fn size(&self) -> usize {
                mem::size_of::<$t>()
            }

            fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
                const WIDTH: usize = mem::size_of::<$t>();
                if buf.len() < WIDTH {
                    return Err(too_small_to_write(WIDTH, buf.len(), debug_offset));
                }
                <$order>::$write(&mut buf[..WIDTH], self.0);
                Ok(WIDTH)
            }
        }

        impl<'de> WireParse<'de> for $wrapper<$t> {
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
                    dst.0 = <$order>::$read(&buf[..WIDTH]);
                }
                Ok(WIDTH)
            }
        }
    };
}

macro_rules! endian_wire_both {
    ($t:ty, $read:ident, $write:ident) => {
        endian_wire!(LittleEndian, byteorder::LittleEndian, $t, $read, $write);
        endian_wire!(BigEndian, byteorder::BigEndian, $t, $read, $write);
    };
}

endian_wire_both!(u16, read_u16, write_u16);
endian_wire_both!(i16, read_i16, write_i16);
endian_wire_both!(u32, read_u32, write_u32);
endian_wire_both!(i32, read_i32, write_i32);
endian_wire_both!(u64, read_u64, write_u64);
endian_wire_both!(i64, read_i64, write_i64);
endian_wire_both!(f32, read_f32, write_f32);
endian_wire_both!(f64, read_f64, write_f64);

// Byte order is moot for single bytes, but combinators are generic over
// the prefix codec, so the wrappers still have to parse.
macro_rules! endian_wire_byte {
    ($wrapper:ident) => {
        impl WireEmit for $wrapper<u8> {
            fn size(&self) -> usize {
                1
            }

            fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
                self.0.emit(buf, debug_offset)
            }
        }

        impl<'de> WireParse<'de> for $wrapper<u8> {
            fn parse(
                dst: Option<&mut Self>,
                buf: &'de [u8],
                debug_offset: usize,
            ) -> WireResult<usize> {
                u8::parse(dst.map(|d| &mut d.0), buf, debug_offset)
            }
        }
    };
}

endian_wire_byte!(LittleEndian);
endian_wire_byte!(BigEndian);

macro_rules! endian_length_field {
    ($wrapper:ident, $t:ty) => {
        impl LengthField for $wrapper<$t> {
            fn to_usize(&self) -> WireResult<usize> {
                self.0.to_usize()
            }

            fn from_usize(n: usize) -> WireResult<Self> {
                Ok(Self(<$t>::from_usize(n)?))
            }
        }
    };
}

endian_length_field!(LittleEndian, u8);
endian_length_field!(LittleEndian, u16);
endian_length_field!(LittleEndian, u32);
endian_length_field!(LittleEndian, u64);
endian_length_field!(BigEndian, u8);
endian_length_field!(BigEndian, u16);
endian_length_field!(BigEndian, u32);
endian_length_field!(BigEndian, u64);

#[cfg(test)]
mod tests {
    use super::{BigEndian, LittleEndian};
    use crate::wire::{WireEmit, WireParse};

    #[test]
    fn little_endian_layout() {
        let mut buf = [0_u8; 4];
        LittleEndian(0x0102_0304_u32).emit(&mut buf, 0).unwrap();
        assert_eq!(buf, [4, 3, 2, 1]);

        let mut read = LittleEndian(0_u32);
        LittleEndian::<u32>::parse(Some(&mut read), &buf, 0).unwrap();
        assert_eq!(read.0, 0x0102_0304);
    }

    #[test]
    fn big_endian_layout() {
        let mut buf = [0_u8; 8];
        BigEndian(3_u64).emit(&mut buf, 0).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 3]);

        let mut read = BigEndian(0_u64);
        BigEndian::<u64>::parse(Some(&mut read), &buf, 0).unwrap();
        assert_eq!(read.0, 3);
    }

    #[test]
    fn orders_disagree_on_the_same_bytes() {
        let mut buf = [0_u8; 2];
        BigEndian(0x0100_u16).emit(&mut buf, 0).unwrap();

        let mut le = LittleEndian(0_u16);
        LittleEndian::<u16>::parse(Some(&mut le), &buf, 0).unwrap();
        assert_eq!(le.0, 0x0001);
    }
}
