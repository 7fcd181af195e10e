use super::codec::{LengthField, WireEmit, WireParse};
use crate::{WireError, WireResult};
use std::marker::PhantomData;
use std::mem;

/// A length prefix `L` followed by a `T` payload of exactly that many
/// bytes, e.g. `Packet<BigEndian<u32>, ConstRange>`.
///
/// The prefix is computed from the body on emit; on parse the prefix
/// governs how much of the window the body may see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet<L, T> {
    pub body: T,
    _length: PhantomData<L>,
}

impl<L, T> Packet<L, T> {
    pub fn new(body: T) -> Self {
        Self {
            body,
            _length: PhantomData,
        }
    }

    pub fn into_inner(self) -> T {
        self.body
    }
}

impl<L: LengthField, T: WireEmit> WireEmit for Packet<L, T> {
    fn size(&self) -> usize {
        mem::size_of::<L>() + self.body.size()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        let prefix = L::from_usize(self.body.size())?;
        let mut advanced = prefix.emit(buf, debug_offset)?;
        advanced += self
            .body
            .emit(&mut buf[advanced..], debug_offset + advanced)?;
        Ok(advanced)
    }
}

impl<'de, L: LengthField, T: WireParse<'de>> WireParse<'de> for Packet<L, T> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let mut prefix = L::default();
        let advanced = L::parse(Some(&mut prefix), buf, debug_offset)?;
        let length = prefix.to_usize()?;

        if length > buf.len() - advanced {
            return Err(WireError::Overflow(format!(
                "length prefix ({length}) overruns buffer[{}] at offset: {}",
                buf.len(),
                debug_offset + advanced
            )));
        }

        let window = &buf[advanced..advanced + length];
        T::parse(dst.map(|d| &mut d.body), window, debug_offset + advanced)?;

        // the prefix, not the delegate, decides how far we move
        Ok(advanced + length)
    }
}

#[cfg(test)]
mod tests {
    use super::Packet;
    use crate::wire::{BigEndian, ConstCursor, ConstRange, Cursor};
    use crate::ErrorKind;

    #[test]
    fn packet_load() {
        let message = b"foo";
        let mut buf = [0_u8; 12];
        let mut drc = Cursor::new(&mut buf);
        drc.write_and_advance(&BigEndian(3_u32)).unwrap();
        drc.write_and_advance(&ConstRange::new(message)).unwrap();

        let mut cdrc = ConstCursor::new(&buf);
        let out = cdrc
            .read_and_advance::<Packet<BigEndian<u32>, ConstRange>>()
            .unwrap();
        assert_eq!(out.body.data(), message);
        assert_eq!(cdrc.debug_offset(), 4 + 3);
    }

    #[test]
    fn packet_store() {
        let message = b"foo";
        let mut buf = [0_u8; 12];
        let mut drc = Cursor::new(&mut buf);
        drc.write_and_advance(&Packet::<BigEndian<u32>, _>::new(ConstRange::new(message)))
            .unwrap();
        assert_eq!(drc.debug_offset(), 7);

        let mut cdrc = ConstCursor::new(&buf);
        let out = cdrc
            .read_and_advance::<Packet<BigEndian<u32>, ConstRange>>()
            .unwrap();
        assert_eq!(out.body.data(), message);
    }

    #[test]
    fn lying_prefix_is_overflow() {
        let buf = [9_u8, b'a', b'b']; // claims nine bytes, carries two
        let err = ConstRange::new(&buf)
            .read::<Packet<u8, ConstRange>>(0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
        assert!(err.to_string().contains("length prefix (9)"), "{err}");
    }
}
