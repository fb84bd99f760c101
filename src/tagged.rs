//! Tagged pointers for ABA protection.
//!
//! A compare-and-swap on a bare pointer cannot distinguish "the same node"
//! from "a recycled node that happens to live at the same address". Every
//! atomic link in this crate therefore stores a [`TaggedPtr`]: a pointer and
//! a small generation tag packed into a single machine word. Successful
//! publishes bump the tag, so a thread acting on a stale snapshot fails its
//! CAS even when the raw address has come back around.
//!
//! On 64-bit targets the tag occupies the 16 unused high bits of the
//! pointer, wrapping every 65,536 publishes. On 32-bit targets it occupies
//! the 2 alignment bits, so pointees must be aligned to at least 4 bytes.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(target_pointer_width = "64")]
const TAG_SHIFT: u32 = 48;
#[cfg(target_pointer_width = "64")]
const TAG_MASK: usize = 0xffff << TAG_SHIFT;

#[cfg(target_pointer_width = "32")]
const TAG_SHIFT: u32 = 0;
#[cfg(target_pointer_width = "32")]
const TAG_MASK: usize = 0b11;

/// A pointer and a generation tag packed into one word.
///
/// This is a plain value: it does not own the pointee and copying it copies
/// the word. Two tagged pointers are equal only if both the pointer and the
/// tag match.
pub struct TaggedPtr<N> {
    data: usize,
    _marker: PhantomData<*mut N>,
}

impl<N> TaggedPtr<N> {
    /// The largest tag value; incrementing past it wraps to zero.
    pub const MAX_TAG: usize = TAG_MASK >> TAG_SHIFT;

    /// Returns a null tagged pointer with a tag of zero.
    pub const fn null() -> TaggedPtr<N> {
        TaggedPtr {
            data: 0,
            _marker: PhantomData,
        }
    }

    /// Returns a tagged pointer to `ptr` with a tag of zero.
    ///
    /// `ptr` must not carry bits in the tag position, which holds for any
    /// address the global allocator hands out for a sufficiently aligned `N`.
    pub fn new(ptr: *mut N) -> TaggedPtr<N> {
        debug_assert_eq!(ptr as usize & TAG_MASK, 0);
        TaggedPtr {
            data: ptr as usize,
            _marker: PhantomData,
        }
    }

    /// Returns the pointer with the tag bits cleared.
    pub fn as_ptr(self) -> *mut N {
        (self.data & !TAG_MASK) as *mut N
    }

    /// Returns `true` if the untagged pointer is null.
    pub fn is_null(self) -> bool {
        self.as_ptr().is_null()
    }

    /// Returns the tag.
    pub fn tag(self) -> usize {
        (self.data & TAG_MASK) >> TAG_SHIFT
    }

    /// Returns the same pointer carrying `tag`, reduced modulo the tag width.
    pub fn with_tag(self, tag: usize) -> TaggedPtr<N> {
        TaggedPtr {
            data: (self.data & !TAG_MASK) | ((tag << TAG_SHIFT) & TAG_MASK),
            _marker: PhantomData,
        }
    }

    /// Returns the same pointer carrying `other`'s tag.
    pub fn set_tag(self, other: TaggedPtr<N>) -> TaggedPtr<N> {
        self.with_tag(other.tag())
    }

    /// Returns the same pointer with the tag incremented, wrapping modulo
    /// the tag width.
    pub fn bump_tag(self) -> TaggedPtr<N> {
        self.with_tag(self.tag().wrapping_add(1))
    }

    /// Dereferences the untagged pointer.
    ///
    /// # Safety
    ///
    /// The untagged pointer must be non-null, point to a live `N`, and remain
    /// valid for the chosen lifetime. Callers in this crate rely on nodes
    /// being retained by their container until it is dropped.
    pub unsafe fn deref<'a>(self) -> &'a N {
        unsafe { &*self.as_ptr() }
    }

    fn from_data(data: usize) -> TaggedPtr<N> {
        TaggedPtr {
            data,
            _marker: PhantomData,
        }
    }
}

impl<N> Clone for TaggedPtr<N> {
    fn clone(&self) -> TaggedPtr<N> {
        *self
    }
}

impl<N> Copy for TaggedPtr<N> {}

impl<N> PartialEq for TaggedPtr<N> {
    fn eq(&self, other: &TaggedPtr<N>) -> bool {
        self.data == other.data
    }
}

impl<N> Eq for TaggedPtr<N> {}

impl<N> Default for TaggedPtr<N> {
    fn default() -> TaggedPtr<N> {
        TaggedPtr::null()
    }
}

impl<N> fmt::Debug for TaggedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("ptr", &self.as_ptr())
            .field("tag", &self.tag())
            .finish()
    }
}

/// An atomic cell holding a [`TaggedPtr`].
///
/// The pointer and the tag are loaded, stored, and compare-exchanged as one
/// word, which is what the ABA defence requires: a CAS succeeds only if both
/// halves still match the expected snapshot.
pub struct AtomicTaggedPtr<N> {
    data: AtomicUsize,
    _marker: PhantomData<*mut N>,
}

unsafe impl<N: Sync> Send for AtomicTaggedPtr<N> {}
unsafe impl<N: Sync> Sync for AtomicTaggedPtr<N> {}

impl<N> AtomicTaggedPtr<N> {
    /// Returns a cell holding a null tagged pointer.
    pub const fn null() -> AtomicTaggedPtr<N> {
        AtomicTaggedPtr {
            data: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Returns a cell holding `ptr`.
    pub fn new(ptr: TaggedPtr<N>) -> AtomicTaggedPtr<N> {
        AtomicTaggedPtr {
            data: AtomicUsize::new(ptr.data),
            _marker: PhantomData,
        }
    }

    /// Loads the current value.
    pub fn load(&self, ord: Ordering) -> TaggedPtr<N> {
        TaggedPtr::from_data(self.data.load(ord))
    }

    /// Stores `ptr` into the cell.
    pub fn store(&self, ptr: TaggedPtr<N>, ord: Ordering) {
        self.data.store(ptr.data, ord);
    }

    /// Stores `new` if the cell still holds `current`, pointer and tag both.
    ///
    /// This is a strong compare-exchange: it fails only if the cell actually
    /// differs, and on failure returns the value it held.
    pub fn compare_exchange(
        &self,
        current: TaggedPtr<N>,
        new: TaggedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<N>, TaggedPtr<N>> {
        self.data
            .compare_exchange(current.data, new.data, success, failure)
            .map(TaggedPtr::from_data)
            .map_err(TaggedPtr::from_data)
    }
}

impl<N> Default for AtomicTaggedPtr<N> {
    fn default() -> AtomicTaggedPtr<N> {
        AtomicTaggedPtr::null()
    }
}

impl<N> fmt::Debug for AtomicTaggedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("AtomicTaggedPtr { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::{AtomicTaggedPtr, TaggedPtr};
    use alloc::boxed::Box;
    use core::sync::atomic::Ordering;

    #[test]
    fn null() {
        let p = TaggedPtr::<u64>::null();
        assert!(p.is_null());
        assert_eq!(p.tag(), 0);
        assert_eq!(p, TaggedPtr::default());
    }

    #[test]
    fn pack_unpack() {
        let raw = Box::into_raw(Box::new(7u64));
        let p = TaggedPtr::new(raw);
        assert_eq!(p.as_ptr(), raw);
        assert_eq!(p.tag(), 0);
        assert!(!p.is_null());
        assert_eq!(unsafe { *p.deref() }, 7);
        drop(unsafe { Box::from_raw(raw) });
    }

    #[test]
    fn tag_arithmetic() {
        let raw = Box::into_raw(Box::new(0u64));
        let p = TaggedPtr::new(raw);

        let q = p.with_tag(5);
        assert_eq!(q.as_ptr(), raw);
        assert_eq!(q.tag(), 5);

        assert_eq!(q.bump_tag().tag(), 6);
        assert_eq!(p.set_tag(q).tag(), 5);

        // Incrementing the largest tag wraps to zero without touching the
        // pointer.
        let top = p.with_tag(TaggedPtr::<u64>::MAX_TAG);
        assert_eq!(top.tag(), TaggedPtr::<u64>::MAX_TAG);
        assert_eq!(top.bump_tag().tag(), 0);
        assert_eq!(top.bump_tag().as_ptr(), raw);

        drop(unsafe { Box::from_raw(raw) });
    }

    #[test]
    fn equality_includes_tag() {
        let raw = Box::into_raw(Box::new(0u64));
        let p = TaggedPtr::new(raw);
        assert_eq!(p, p.with_tag(0));
        assert_ne!(p, p.bump_tag());
        assert_ne!(TaggedPtr::<u64>::null(), TaggedPtr::null().with_tag(1));
        drop(unsafe { Box::from_raw(raw) });
    }

    #[test]
    fn compare_exchange_rejects_stale_tag() {
        let raw = Box::into_raw(Box::new(0u64));
        let cell = AtomicTaggedPtr::new(TaggedPtr::new(raw));

        let stale = cell.load(Ordering::Relaxed);
        let fresh = stale.bump_tag();
        assert!(cell
            .compare_exchange(stale, fresh, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok());

        // The address is unchanged but the generation moved on.
        let err = cell
            .compare_exchange(stale, fresh, Ordering::Relaxed, Ordering::Relaxed)
            .unwrap_err();
        assert_eq!(err, fresh);

        drop(unsafe { Box::from_raw(raw) });
    }

    #[test]
    fn tag_wraparound_preserves_pointer() {
        let raw = Box::into_raw(Box::new(0u64));
        let cell = AtomicTaggedPtr::new(TaggedPtr::new(raw));

        // A full cycle of successful publishes on one cell must come back to
        // the starting word with the pointer intact.
        for _ in 0..=TaggedPtr::<u64>::MAX_TAG {
            let cur = cell.load(Ordering::Relaxed);
            assert!(cell
                .compare_exchange(cur, cur.bump_tag(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok());
        }

        let wrapped = cell.load(Ordering::Relaxed);
        assert_eq!(wrapped.as_ptr(), raw);
        assert_eq!(wrapped.tag(), 0);

        drop(unsafe { Box::from_raw(raw) });
    }
}
