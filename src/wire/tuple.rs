use super::codec::{WireEmit, WireParse};
use crate::WireResult;

// Tuples concatenate their fields in declaration order. Each step
// advances a running offset; the consumed total is only reported when
// every field landed.
macro_rules! tuple_wire {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: WireEmit),+> WireEmit for ($($name,)+) {
            fn size(&self) -> usize {
                0 $(+ self.$idx.size())+
            }

            fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
                let mut advanced = 0;
                $(
                    advanced += self
                        .$idx
                        .emit(&mut buf[advanced..], debug_offset + advanced)?;
                )+
                Ok(advanced)
            }
        }

        impl<'de, $($name: WireParse<'de>),+> WireParse<'de> for ($($name,)+) {
            fn parse(
                dst: Option<&mut Self>,
                buf: &'de [u8],
                debug_offset: usize,
            ) -> WireResult<usize> {
                let mut advanced = 0;
                match dst {
                    Some(dst) => {
                        $(
                            advanced += $name::parse(
                                Some(&mut dst.$idx),
                                &buf[advanced..],
                                debug_offset + advanced,
                            )?;
                        )+
                    }
                    None => {
                        $(
                            advanced += $name::parse(
                                None::<&mut $name>,
                                &buf[advanced..],
                                debug_offset + advanced,
                            )?;
                        )+
                    }
                }
                Ok(advanced)
            }
        }
    };
}

tuple_wire!(A: 0);
tuple_wire!(A: 0, B: 1);
tuple_wire!(A: 0, B: 1, C: 2);
tuple_wire!(A: 0, B: 1, C: 2, D: 3);
tuple_wire!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_wire!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_wire!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_wire!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
