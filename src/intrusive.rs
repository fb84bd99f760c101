//! The intrusive Treiber stack underlying every container in this crate.
//!
//! Nodes embed their own link, so the same node type can move between a
//! container's live chain and its free list without any per-membership
//! allocation. The stack never frees a node; ownership of popped nodes
//! passes to the caller, which is what lets the containers recycle them.

use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

/// A node type that embeds its own link.
pub(crate) trait Linked: Sized {
    /// The link to the node below this one.
    fn next(&self) -> &AtomicTaggedPtr<Self>;
}

/// A lock-free intrusive LIFO list of `N` nodes.
///
/// Both `push` and `pop` bump the head's tag on success, so a thread holding
/// a stale head snapshot cannot complete a CAS even if the same node address
/// has been recycled into the head in the meantime.
pub(crate) struct IntrusiveStack<N: Linked> {
    head: AtomicTaggedPtr<N>,
}

impl<N: Linked> IntrusiveStack<N> {
    pub(crate) const fn new() -> IntrusiveStack<N> {
        IntrusiveStack {
            head: AtomicTaggedPtr::null(),
        }
    }

    /// Links `node` at the top.
    ///
    /// # Safety
    ///
    /// `node` must point to a valid node that is not currently linked into
    /// any list, and it must stay valid until it is popped or the list is
    /// dropped.
    pub(crate) unsafe fn push(&self, node: *mut N) {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            // The node is private to this thread until the CAS publishes it.
            unsafe { (*node).next().store(head, Ordering::Relaxed) };
            let desired = TaggedPtr::new(node).with_tag(head.tag() + 1);
            if self
                .head
                .compare_exchange(head, desired, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    /// Unlinks and returns the top node, or `None` if the list is empty.
    ///
    /// The caller receives exclusive ownership of the node; its link still
    /// holds a stale value and must be rewritten before the node is reused.
    ///
    /// # Safety
    ///
    /// Every node previously pushed must still be valid.
    pub(crate) unsafe fn pop(&self) -> Option<*mut N> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // Reading through a possibly stale head is what the tag defends:
            // the node is still allocated, and if it was unlinked in the
            // meantime the CAS below observes a different tag and fails.
            let next = unsafe { head.deref() }.next().load(Ordering::Acquire);
            let desired = TaggedPtr::new(next.as_ptr()).with_tag(head.tag() + 1);
            if self
                .head
                .compare_exchange(head, desired, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head.as_ptr());
            }
            backoff.spin();
        }
    }

    /// Returns `true` if the list was empty at some point during the call.
    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }

    /// Walks the list from the top, passing each node to `f`.
    ///
    /// The next link is read before `f` runs, so `f` may consume the node.
    ///
    /// # Safety
    ///
    /// Every linked node must still be valid. The exclusive borrow rules out
    /// concurrent mutation through this list.
    pub(crate) unsafe fn for_each(&mut self, mut f: impl FnMut(*mut N)) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let node = cur.as_ptr();
            cur = unsafe { (*node).next() }.load(Ordering::Relaxed);
            f(node);
        }
    }
}
