use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::intrusive::{IntrusiveStack, Linked};
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};
use crate::DEFAULT_INITIAL_CAPACITY;

/// A queue node.
///
/// Over its life a node cycles through three roles: free, sentinel, and
/// data. The value is initialized exactly while the node is a data node;
/// the sentinel's value is stale and never read.
struct Node<T> {
    /// The successor in the live chain, or the entry below on the free list.
    next: AtomicTaggedPtr<Node<T>>,

    /// The value.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    fn vacant() -> Box<Node<T>> {
        Box::new(Node {
            next: AtomicTaggedPtr::null(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
    }
}

impl<T> Linked for Node<T> {
    fn next(&self) -> &AtomicTaggedPtr<Node<T>> {
        &self.next
    }
}

/// An unbounded multi-producer multi-consumer FIFO queue.
///
/// This is the queue of Michael and Scott, "Simple, Fast, and Practical
/// Non-Blocking and Blocking Concurrent Queue Algorithms": a singly linked
/// chain headed by a sentinel node, with elements linked in after the tail
/// and unlinked after the head. Dequeued nodes are recycled through an
/// internal lock-free free list rather than freed, so steady-state operation
/// allocates nothing once [`capacity`] covers the high-water mark, and no
/// node is ever returned to the allocator while the queue is alive.
///
/// Elements pushed by one thread are popped in that thread's push order;
/// pushes from different threads may interleave arbitrarily.
///
/// [`capacity`]: Queue::capacity
///
/// # Examples
///
/// ```
/// use lockfree_pool::Queue;
///
/// let q = Queue::new();
///
/// q.push('a');
/// q.push('b');
///
/// assert_eq!(q.pop(), Some('a'));
/// assert_eq!(q.pop(), Some('b'));
/// assert!(q.pop().is_none());
/// ```
pub struct Queue<T> {
    /// The sentinel. The first live value is in `head.next`.
    head: CachePadded<AtomicTaggedPtr<Node<T>>>,

    /// The last node in the chain, or its predecessor while an enqueue is
    /// mid-flight.
    tail: CachePadded<AtomicTaggedPtr<Node<T>>>,

    /// Recycled nodes awaiting reuse.
    free: CachePadded<IntrusiveStack<Node<T>>>,

    /// Total node count excluding the sentinel. Grows on free-list miss,
    /// never shrinks.
    capacity: AtomicUsize,

    /// Indicates that dropping a `Queue<T>` may drop values of type `T`.
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates a new queue with the default initial capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::<i32>::new();
    /// ```
    pub fn new() -> Queue<T> {
        Queue::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates a new queue with `cap` pre-allocated nodes, plus a sentinel.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::<i32>::with_capacity(16);
    /// assert_eq!(q.capacity(), 16);
    /// ```
    pub fn with_capacity(cap: usize) -> Queue<T> {
        let queue = Queue {
            head: CachePadded::new(AtomicTaggedPtr::null()),
            tail: CachePadded::new(AtomicTaggedPtr::null()),
            free: CachePadded::new(IntrusiveStack::new()),
            capacity: AtomicUsize::new(cap),
            _marker: PhantomData,
        };
        for _ in 0..cap {
            // SAFETY: A fresh allocation is linked into no list.
            unsafe { queue.free.push(Box::into_raw(Node::vacant())) };
        }
        let sentinel = TaggedPtr::new(Box::into_raw(Node::vacant()));
        queue.head.store(sentinel, Ordering::Relaxed);
        queue.tail.store(sentinel, Ordering::Relaxed);
        queue
    }

    /// Takes a node off the free list, allocating one on a miss.
    fn alloc_node(&self) -> *mut Node<T> {
        // SAFETY: Free-list nodes stay valid until the queue is dropped.
        match unsafe { self.free.pop() } {
            Some(node) => node,
            None => {
                self.capacity.fetch_add(1, Ordering::Relaxed);
                Box::into_raw(Node::vacant())
            }
        }
    }

    /// Pushes an element to the back of the queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::new();
    ///
    /// q.push(10);
    /// q.push(20);
    /// ```
    pub fn push(&self, value: T) {
        let node = self.alloc_node();
        // SAFETY: The node is exclusively ours until the link CAS in
        // `enqueue` publishes it.
        unsafe {
            (*node).value.get().write(MaybeUninit::new(value));
            (*node).next.store(TaggedPtr::null(), Ordering::Relaxed);
            self.enqueue(node);
        }
    }

    /// Links `node` in after the last node in the chain.
    ///
    /// # Safety
    ///
    /// `node` must hold an initialized value, have a null `next`, and be
    /// linked into no list.
    unsafe fn enqueue(&self, node: *mut Node<T>) {
        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: Nodes are never freed while the queue is alive, and
            // the tag makes a CAS through a stale snapshot fail.
            let next = unsafe { tail.deref() }.next.load(Ordering::Acquire);

            // The tail and its link must come from one consistent snapshot.
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if next.is_null() {
                // Link the node after the last one. This is where the push
                // becomes visible to consumers.
                let desired = TaggedPtr::new(node).with_tag(next.tag() + 1);
                if unsafe { tail.deref() }
                    .next
                    .compare_exchange(next, desired, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    // Swing the tail to the new node. Failure is benign: the
                    // next operation to observe the lag will advance it.
                    let _ = self.tail.compare_exchange(
                        tail,
                        TaggedPtr::new(node).with_tag(tail.tag() + 1),
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    return;
                }
            } else {
                // The tail has fallen behind the last node; help it along.
                let _ = self.tail.compare_exchange(
                    tail,
                    next.with_tag(tail.tag() + 1),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            }
            backoff.spin();
        }
    }

    /// Pops the element at the front of the queue.
    ///
    /// If the queue is empty, `None` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::new();
    ///
    /// q.push(10);
    /// assert_eq!(q.pop(), Some(10));
    /// assert!(q.pop().is_none());
    /// ```
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: As in `enqueue`, the node outlives the queue and the
            // tag guards the CAS against stale snapshots.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire);

            // The head, tail, and link must come from one consistent
            // snapshot.
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head.as_ptr() == tail.as_ptr() {
                if next.is_null() {
                    // Nothing past the sentinel.
                    return None;
                }
                // The tail has fallen behind the last node; help it along.
                let _ = self.tail.compare_exchange(
                    tail,
                    next.with_tag(tail.tag() + 1),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            if next.is_null() {
                // A lagging tail snapshot; retry for a consistent one.
                continue;
            }

            // Stage a copy of the value before publishing the dequeue. The
            // bytes are interpreted only if the CAS below succeeds; until
            // then a recycler may be rewriting them under our feet, and the
            // copy is discarded unread.
            let value = unsafe { ptr::read((*next.as_ptr()).value.get()) };

            if self
                .head
                .compare_exchange(
                    head,
                    next.with_tag(head.tag() + 1),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                // `next` is the new sentinel; its value lives on in the
                // staged copy. The old sentinel is ours to recycle.
                //
                // SAFETY: The successful CAS proves the snapshot was not
                // stale, so the staged bytes are the initialized value and
                // this thread is the only one that will ever read them. The
                // free push is ordered after the copy, so no recycler can
                // touch the node before the copy completed.
                unsafe {
                    self.free.push(head.as_ptr());
                    return Some(value.assume_init());
                }
            }
            backoff.spin();
        }
    }

    /// Returns `true` if the queue was empty at some point during the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::new();
    ///
    /// assert!(q.is_empty());
    /// q.push(1);
    /// assert!(!q.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.as_ptr() == tail.as_ptr()
    }

    /// Returns the number of nodes owned by the queue, excluding the
    /// sentinel.
    ///
    /// Starts at the initial capacity and grows whenever a push misses the
    /// free list; it never shrinks.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockfree_pool::Queue;
    ///
    /// let q = Queue::with_capacity(2);
    /// assert_eq!(q.capacity(), 2);
    ///
    /// q.push(1);
    /// q.push(2);
    /// q.push(3);
    /// assert_eq!(q.capacity(), 3);
    /// ```
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Drain and drop any values still queued; this also moves every
        // data node onto the free list.
        while self.pop().is_some() {}

        // SAFETY: `&mut self` means no concurrent operations. After the
        // drain the chain is just the sentinel, and every other node sits
        // on the free list with an uninitialized value.
        unsafe {
            self.free.for_each(|node| drop(Box::from_raw(node)));
            drop(Box::from_raw(self.head.load(Ordering::Relaxed).as_ptr()));
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Queue<T> {
        Queue::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Queue { .. }")
    }
}
