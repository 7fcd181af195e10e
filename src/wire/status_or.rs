use super::codec::{WireEmit, WireParse};
use crate::{ErrorKind, WireError, WireResult};

/// A decoded `T` paired with an optional caller-supplied error override.
///
/// When the underlying codec fails, the override is returned in place of
/// the codec's own error, letting a pipeline substitute a
/// domain-specific failure for a generic `Overflow`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithStatus<T> {
    pub value: T,
    status: Option<(ErrorKind, String)>,
}

impl<T> WithStatus<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            status: None,
        }
    }

    pub fn with_override(value: T, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            value,
            status: Some((kind, message.into())),
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    fn substitute(&self, underlying: WireError) -> WireError {
        match &self.status {
            Some((kind, message)) => WireError::with_kind(*kind, message.clone()),
            None => underlying,
        }
    }
}

impl<T: WireEmit> WireEmit for WithStatus<T> {
    fn size(&self) -> usize {
        self.value.size()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        self.value
            .emit(buf, debug_offset)
            .map_err(|e| self.substitute(e))
    }
}

impl<'de, T: WireParse<'de>> WireParse<'de> for WithStatus<T> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        match dst {
            Some(dst) => T::parse(Some(&mut dst.value), buf, debug_offset)
                .map_err(|e| dst.substitute(e)),
            None => T::parse(None::<&mut T>, buf, debug_offset),
        }
    }
}
