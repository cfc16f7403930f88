//! Root regions: memory the collector scans before the heap itself.

use std::{marker::PhantomData, mem, ptr};

const WORD: usize = mem::size_of::<usize>();

/// A word-aligned span of memory whose words may hold heap pointers.
///
/// Typical regions are static data and the active part of a call stack.
/// The collector only reads a region, and only for the duration of one
/// `collect` call.
#[derive(Debug, Clone, Copy)]
pub struct RootRegion<'a> {
    start: *const usize,
    words: usize,
    _marker: PhantomData<&'a [usize]>,
}

impl<'a> RootRegion<'a> {
    pub fn from_words(words: &'a [usize]) -> Self {
        Self {
            start: words.as_ptr(),
            words: words.len(),
            _marker: PhantomData,
        }
    }

    /// Region covering every word of `value`, such as a struct of globals
    /// whose fields hold heap pointers.
    ///
    /// Padding inside `T` is scanned as part of the word containing it, so
    /// `T` should be built from word-sized fields.
    ///
    /// # Panics
    /// If the size or alignment of `T` is not a multiple of the word size.
    pub fn from_ref<T>(value: &'a T) -> Self {
        assert!(
            mem::size_of::<T>() % WORD == 0 && mem::align_of::<T>() % WORD == 0,
            "root {} is not made of whole words",
            std::any::type_name::<T>()
        );
        Self {
            start: ptr::from_ref(value).cast(),
            words: mem::size_of::<T>() / WORD,
            _marker: PhantomData,
        }
    }

    /// Region covering `start..end`.
    ///
    /// # Panics
    /// If either bound is not word aligned or `end` precedes `start`.
    ///
    /// # Safety
    /// The whole span must be readable, initialized memory that stays valid
    /// for `'a`.
    pub unsafe fn from_raw(start: *const u8, end: *const u8) -> Self {
        assert!(
            start.addr() % WORD == 0 && end.addr() % WORD == 0,
            "root region {start:p}..{end:p} is not word aligned"
        );
        assert!(start <= end, "root region {start:p}..{end:p} is inverted");
        Self {
            start: start.cast(),
            words: (end.addr() - start.addr()) / WORD,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words == 0
    }

    #[inline]
    pub(crate) fn start(&self) -> *const usize {
        self.start
    }
}

/// Supplies the root regions of one collection cycle.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(RootRegion<'_>));
}

/// A plain list of root regions.
#[derive(Debug, Default, Clone)]
pub struct RootSet<'a> {
    regions: Vec<RootRegion<'a>>,
}

impl<'a> RootSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, region: RootRegion<'a>) {
        self.regions.push(region);
    }

    pub fn with(mut self, region: RootRegion<'a>) -> Self {
        self.push(region);
        self
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl RootProvider for RootSet<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(RootRegion<'_>)) {
        for region in &self.regions {
            visitor(*region);
        }
    }
}

impl<const N: usize> RootProvider for [RootRegion<'_>; N] {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(RootRegion<'_>)) {
        for region in self.iter() {
            visitor(*region);
        }
    }
}
