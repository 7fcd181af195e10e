use super::codec::{too_small_to_read, too_small_to_write, WireEmit, WireParse};
use crate::WireResult;

/// An opaque run of exactly `N` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> WireEmit for FixedBytes<N> {
    fn size(&self) -> usize {
        N
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        if buf.len() < N {
            return Err(too_small_to_write(N, buf.len(), debug_offset));
        }
        buf[..N].copy_from_slice(&self.0);
        Ok(N)
    }
}

impl<'de, const N: usize> WireParse<'de> for FixedBytes<N> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        if buf.len() < N {
            return Err(too_small_to_read(N, buf.len(), debug_offset));
        }
        if let Some(dst) = dst {
            dst.0.copy_from_slice(&buf[..N]);
        }
        Ok(N)
    }
}
