use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

use crate::intrusive::{IntrusiveStack, Linked};
use crate::tagged::AtomicTaggedPtr;
use crate::DEFAULT_INITIAL_CAPACITY;

/// A stack node, shuttled between the live list and the free list.
struct Entry<T> {
    /// The link to the entry below, in whichever list this entry is on.
    next: AtomicTaggedPtr<Entry<T>>,

    /// The value. Initialized exactly while the entry is on the live list.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Entry<T> {
    fn vacant() -> Box<Entry<T>> {
        Box::new(Entry {
            next: AtomicTaggedPtr::null(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
    }
}

impl<T> Linked for Entry<T> {
    fn next(&self) -> &AtomicTaggedPtr<Entry<T>> {
        &self.next
    }
}

/// An unbounded multi-producer multi-consumer stack.
///
/// The stack allocates its initial capacity up front and recycles nodes
/// through an internal lock-free free list, so pushing allocates only when
/// the number of live elements exceeds the high-water mark so far. Nodes are
/// returned to the allocator when the stack is dropped, never earlier.
///
/// # Examples
///
/// ```
/// use lockfree_pool::Stack;
///
/// let s = Stack::new();
///
/// s.push('a');
/// s.push('b');
///
/// assert_eq!(s.pop(), Some('b'));
/// assert_eq!(s.pop(), Some('a'));
/// assert!(s.pop().is_none());
/// ```
pub struct Stack<T> {
    /// The live elements, top first.
    live: CachePadded<IntrusiveStack<Entry<T>>>,

    /// Recycled entries awaiting reuse.
    free: CachePadded<IntrusiveStack<Entry<T>>>,

    /// Indicates that dropping a `Stack<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    /// Creates a new stack with the default initial capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let s = Stack::<i32>::new();
    /// ```
    pub fn new() -> Stack<T> {
        Stack::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates a new stack with `cap` pre-allocated nodes.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let s = Stack::<i32>::with_capacity(16);
    /// ```
    pub fn with_capacity(cap: usize) -> Stack<T> {
        let stack = Stack {
            live: CachePadded::new(IntrusiveStack::new()),
            free: CachePadded::new(IntrusiveStack::new()),
            _marker: PhantomData,
        };
        for _ in 0..cap {
            // SAFETY: A fresh allocation is linked into no list.
            unsafe { stack.free.push(Box::into_raw(Entry::vacant())) };
        }
        stack
    }

    /// Pushes an element onto the top of the stack.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let s = Stack::new();
    ///
    /// s.push(10);
    /// s.push(20);
    /// ```
    pub fn push(&self, value: T) {
        // SAFETY: A popped free node is exclusively ours until the live push
        // publishes it, so the plain value write cannot race.
        unsafe {
            let node = self
                .free
                .pop()
                .unwrap_or_else(|| Box::into_raw(Entry::vacant()));
            (*node).value.get().write(MaybeUninit::new(value));
            self.live.push(node);
        }
    }

    /// Pops the element at the top of the stack.
    ///
    /// If the stack is empty, `None` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let s = Stack::new();
    ///
    /// s.push(10);
    /// assert_eq!(s.pop(), Some(10));
    /// assert!(s.pop().is_none());
    /// ```
    pub fn pop(&self) -> Option<T> {
        // SAFETY: Winning the pop CAS grants exclusive access to the entry.
        // The value is moved out before the entry goes back on the free list;
        // the free push is the release that recyclers synchronize with.
        unsafe {
            let node = self.live.pop()?;
            let value = (*node).value.get().read().assume_init();
            self.free.push(node);
            Some(value)
        }
    }

    /// Returns `true` if the stack was empty at some point during the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let s = Stack::new();
    ///
    /// assert!(s.is_empty());
    /// s.push(1);
    /// assert!(!s.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Visits every live element, top first.
    ///
    /// The exclusive borrow guarantees no concurrent pushes or pops while
    /// the traversal runs.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Stack;
    ///
    /// let mut s = Stack::new();
    /// s.push(1);
    /// s.push(2);
    ///
    /// let mut seen = Vec::new();
    /// s.for_each(|v| seen.push(*v));
    /// assert_eq!(seen, [2, 1]);
    /// ```
    pub fn for_each<F: FnMut(&T)>(&mut self, mut f: F) {
        // SAFETY: Live entries hold initialized values and stay valid for
        // the borrow.
        unsafe {
            self.live
                .for_each(|node| f((*(*node).value.get()).assume_init_ref()));
        }
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no concurrent operations; live entries
        // hold initialized values and free entries hold none.
        unsafe {
            self.live.for_each(|node| {
                (*(*node).value.get()).assume_init_drop();
                drop(Box::from_raw(node));
            });
            self.free.for_each(|node| drop(Box::from_raw(node)));
        }
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Stack<T> {
        Stack::new()
    }
}

impl<T> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Stack { .. }")
    }
}
