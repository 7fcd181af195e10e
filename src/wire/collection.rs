use super::codec::{LengthField, WireEmit, WireParse};
use crate::{WireError, WireResult};
use std::marker::PhantomData;
use std::mem;

/// A count `L` followed by exactly that many `T` elements.
///
/// Short element data is `Overflow`; the emitted count is always
/// `items.len()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counted<L, T> {
    pub items: Vec<T>,
    _count: PhantomData<L>,
}

impl<L, T> Counted<L, T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            _count: PhantomData,
        }
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<L, T> From<Vec<T>> for Counted<L, T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<L: LengthField, T: WireEmit> WireEmit for Counted<L, T> {
    fn size(&self) -> usize {
        mem::size_of::<L>() + self.items.iter().map(WireEmit::size).sum::<usize>()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        let count = L::from_usize(self.items.len())?;
        let mut advanced = count.emit(buf, debug_offset)?;
        for item in &self.items {
            advanced += item.emit(&mut buf[advanced..], debug_offset + advanced)?;
        }
        Ok(advanced)
    }
}

impl<'de, L: LengthField, T: WireParse<'de>> WireParse<'de> for Counted<L, T> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let mut count = L::default();
        let mut advanced = L::parse(Some(&mut count), buf, debug_offset)?;
        let count = count.to_usize()?;

        match dst {
            Some(dst) => {
                dst.items.clear();
                dst.items.reserve(count.min(buf.len() - advanced));
                for _ in 0..count {
                    let mut item = T::default();
                    advanced += T::parse(
                        Some(&mut item),
                        &buf[advanced..],
                        debug_offset + advanced,
                    )?;
                    dst.items.push(item);
                }
            }
            None => {
                for _ in 0..count {
                    advanced +=
                        T::parse(None::<&mut T>, &buf[advanced..], debug_offset + advanced)?;
                }
            }
        }

        Ok(advanced)
    }
}

/// Reads `T` elements until the window is exhausted; emits every element
/// it holds. A mid-element failure aborts the whole parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeAll<T> {
    pub items: Vec<T>,
}

impl<T> ConsumeAll<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for ConsumeAll<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: WireEmit> WireEmit for ConsumeAll<T> {
    fn size(&self) -> usize {
        self.items.iter().map(WireEmit::size).sum()
    }

    fn emit(&self, buf: &mut [u8], debug_offset: usize) -> WireResult<usize> {
        let mut advanced = 0;
        for item in &self.items {
            advanced += item.emit(&mut buf[advanced..], debug_offset + advanced)?;
        }
        Ok(advanced)
    }
}

impl<'de, T: WireParse<'de>> WireParse<'de> for ConsumeAll<T> {
    fn parse(dst: Option<&mut Self>, buf: &'de [u8], debug_offset: usize) -> WireResult<usize> {
        let mut dst = dst;
        if let Some(dst) = dst.as_deref_mut() {
            dst.items.clear();
        }

        let mut advanced = 0;
        while advanced < buf.len() {
            let local = match dst.as_deref_mut() {
                Some(dst) => {
                    let mut item = T::default();
                    let n = T::parse(
                        Some(&mut item),
                        &buf[advanced..],
                        debug_offset + advanced,
                    )?;
                    dst.items.push(item);
                    n
                }
                None => T::parse(None::<&mut T>, &buf[advanced..], debug_offset + advanced)?,
            };
            // zero-length elements cannot make progress
            if local == 0 {
                return Err(WireError::BadValue(format!(
                    "zero-sized element in buffer[{}] at offset: {}",
                    buf.len(),
                    debug_offset + advanced
                )));
            }
            advanced += local;
        }

        Ok(advanced)
    }
}
