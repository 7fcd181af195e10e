use super::codec::{WireEmit, WireParse};
use crate::{WireError, WireResult};

/// A `T` followed by a terminator byte `C`, e.g. `Terminated<0, &str>`
/// for a C string.
///
/// Parsing scans for `C` first and hands the delegate everything before
/// it; a window without the terminator is `Overflow`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Terminated<const C: u8, T>(pub T);

impl<const C: u8, T> Terminated<C, T> {
    pub fn new(t: T) -> Self {
        Self(t)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<const C: u8, T: WireEmit> WireEmit for Terminated<C, T> {
    fn size(&self) -> usize {
        self.0.size() + 1
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        let n = self.0.emit(buf, debug_offset)?;
        if buf.len() - n < 1 {
            return Err(WireError::Overflow(format!(
                "couldn't write terminal byte ({C}) in buffer[{}] at offset: {}",
                buf.len(),
                debug_offset + n
            )));
        }
        buf[n] = C;
        Ok(n + 1)
    }
}

impl<'de, const C: u8, T: WireParse<'de>> WireParse<'de> for Terminated<C, T> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let Some(end) = buf.iter().position(|&b| b == C) else {
            return Err(WireError::Overflow(format!(
                "couldn't locate terminal byte ({C}) in buffer[{}] at offset: {debug_offset}",
                buf.len()
            )));
        };
        let n = T::parse(dst.map(|d| &mut d.0), &buf[..end], debug_offset)?;
        Ok(n + 1)
    }
}
