//! Lock-free containers that recycle their nodes.
//!
//! This crate provides unbounded lock-free containers that can be shared
//! among threads:
//!
//! * [`Queue`], a multi-producer multi-consumer FIFO queue based on the
//!   Michael–Scott algorithm.
//! * [`Stack`], a multi-producer multi-consumer LIFO stack based on the
//!   Treiber algorithm.
//!
//! Both containers draw their nodes from an internal lock-free free list and
//! never return a node to the allocator before the container is dropped, so
//! steady-state operation allocates nothing once the initial capacity covers
//! the high-water mark. Every atomic link is a [`TaggedPtr`] packing a
//! pointer and a generation tag into a single word, which is what makes the
//! compare-and-swap loops immune to the ABA problem.

#![cfg_attr(not(feature = "std"), no_std)]
#![doc(test(
    no_crate_inject,
    attr(
        deny(warnings, rust_2018_idioms),
        allow(dead_code, unused_assignments, unused_variables)
    )
))]
#![warn(missing_docs, missing_debug_implementations, unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod intrusive;
mod queue;
mod stack;
mod tagged;

pub use crate::queue::Queue;
pub use crate::stack::Stack;
pub use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

/// The number of nodes a container allocates up front when constructed with
/// [`Queue::new`] or [`Stack::new`].
pub const DEFAULT_INITIAL_CAPACITY: usize = 8192;
