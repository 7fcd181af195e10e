use super::codec::{WireEmit, WireParse};
use super::cursor::ConstCursor;
use super::range::{ConstRange, Range};
use crate::{WireError, WireResult};
use std::marker::PhantomData;

/// A lazy iterator decoding one `T` per step out of a byte range.
///
/// Tracks the greatest validated prefix so the undecoded tail can be
/// recovered ([`unvalidated`](Self::unvalidated)) or reinterpreted as a
/// range of another element type
/// ([`cast_unvalidated`](Self::cast_unvalidated)).
///
/// With a pre-declared element count the iteration ends cleanly once the
/// count is met; running out of bytes first yields a single
/// `Err(Overflow)`. Without a count, only an exactly-exhausted window
/// ends cleanly and a failed step propagates its error. Either way the
/// iterator is fused after an error.
#[derive(Debug, Clone, Copy)]
pub struct TypedRange<'a, T> {
    full: ConstRange<'a>,
    cursor: ConstCursor<'a>,
    elements: Option<usize>,
    validated_bytes: usize,
    validated_elements: usize,
    safely_exhausted: bool,
    failed: bool,
    _element: PhantomData<fn() -> T>,
}

impl<'a, T> TypedRange<'a, T> {
    pub fn new(range: ConstRange<'a>) -> Self {
        Self::with_declared(range, None)
    }

    /// A range that must contain exactly `elements` values.
    pub fn with_elements(range: ConstRange<'a>, elements: usize) -> Self {
        Self::with_declared(range, Some(elements))
    }

    fn with_declared(range: ConstRange<'a>, elements: Option<usize>) -> Self {
        Self {
            full: range,
            cursor: range.into(),
            elements,
            validated_bytes: 0,
            validated_elements: 0,
            safely_exhausted: false,
            failed: false,
            _element: PhantomData,
        }
    }

    pub fn validated_bytes(&self) -> usize {
        self.validated_bytes
    }

    pub fn validated_elements(&self) -> usize {
        self.validated_elements
    }

    /// True once the iteration ended at a declared count or an exactly
    /// empty window, as opposed to a decode failure.
    pub fn safely_exhausted(&self) -> bool {
        self.safely_exhausted
    }

    /// The not-yet-validated tail of the range.
    pub fn unvalidated(&self) -> ConstRange<'a> {
        ConstRange::with_debug_offset(
            &self.full.data()[self.validated_bytes..],
            self.full.debug_offset() + self.validated_bytes,
        )
    }

    /// Reinterprets the unvalidated tail as a range of `U` values.
    pub fn cast_unvalidated<U>(&self) -> TypedRange<'a, U> {
        TypedRange::new(self.unvalidated())
    }

    /// Reinterprets the whole range as a range of `U` values.
    pub fn cast<U>(&self) -> TypedRange<'a, U> {
        TypedRange::new(self.full)
    }
}

impl<'a, T: WireParse<'a>> Iterator for TypedRange<'a, T> {
    type Item = WireResult<T>;

    fn next(&mut self) -> Option<WireResult<T>> {
        if self.failed || self.safely_exhausted {
            return None;
        }

        if let Some(elements) = self.elements {
            if self.validated_elements == elements {
                self.safely_exhausted = true;
                return None;
            }
        }

        if self.cursor.is_empty() {
            if let Some(elements) = self.elements {
                // a declared count must be met exactly
                self.failed = true;
                return Some(Err(WireError::Overflow(format!(
                    "only ({}) elements read out of ({elements}) in buffer[{}] at offset: {}",
                    self.validated_elements,
                    self.full.len(),
                    self.full.debug_offset()
                ))));
            }
            self.safely_exhausted = true;
            return None;
        }

        match self.cursor.read_and_advance::<T>() {
            Ok(t) => {
                self.validated_bytes = self.full.len() - self.cursor.len();
                self.validated_elements += 1;
                Some(Ok(t))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Write-side counterpart of [`TypedRange`]: appends values through the
/// validated prefix of a mutable range.
#[derive(Debug)]
pub struct TypedRangeMut<'a, T> {
    bytes: &'a mut [u8],
    debug_offset: usize,
    elements: Option<usize>,
    validated_bytes: usize,
    validated_elements: usize,
    safely_exhausted: bool,
    _element: PhantomData<fn() -> T>,
}

impl<'a, T> TypedRangeMut<'a, T> {
    pub fn new(range: Range<'a>) -> Self {
        Self::with_declared(range, None)
    }

    pub fn with_elements(range: Range<'a>, elements: usize) -> Self {
        Self::with_declared(range, Some(elements))
    }

    fn with_declared(range: Range<'a>, elements: Option<usize>) -> Self {
        let debug_offset = range.debug_offset();
        Self {
            bytes: range.into_inner(),
            debug_offset,
            elements,
            validated_bytes: 0,
            validated_elements: 0,
            safely_exhausted: false,
            _element: PhantomData,
        }
    }

    pub fn validated_bytes(&self) -> usize {
        self.validated_bytes
    }

    pub fn validated_elements(&self) -> usize {
        self.validated_elements
    }

    pub fn safely_exhausted(&self) -> bool {
        self.safely_exhausted
    }

    /// Appends `value` after the validated prefix. Pushing past a
    /// declared element count is a no-op.
    pub fn push(&mut self, value: &T) -> WireResult<()>
    where
        T: WireEmit,
    {
        if self.safely_exhausted {
            return Ok(());
        }

        let n = value.emit(
            &mut self.bytes[self.validated_bytes..],
            self.debug_offset + self.validated_bytes,
        )?;
        self.validated_bytes += n;
        self.validated_elements += 1;

        if self.elements == Some(self.validated_elements) {
            self.safely_exhausted = true;
        }
        Ok(())
    }

    /// The written prefix, for handing to a reader.
    pub fn validated(&self) -> ConstRange<'_> {
        ConstRange::with_debug_offset(&self.bytes[..self.validated_bytes], self.debug_offset)
    }
}
