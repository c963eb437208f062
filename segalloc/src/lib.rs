//! A segregated-fit heap allocator over a pluggable heap-extend primitive.
//!
//! The heap is one contiguous byte region obtained from a [`HeapSource`];
//! blocks inside it are addressed by 32-bit word indices, so the whole image
//! is position independent and the bookkeeping fits in half the space of
//! machine pointers. The public interface is the classic dynamic-memory
//! quartet ([`allocate`], [`release`], [`reallocate`], [`zero_allocate`])
//! as methods on a [`SegHeap`] context.
//!
//! # Usage
//! ```
//! use segalloc::{ArenaSource, SegHeap};
//!
//! let mut heap = SegHeap::new(ArenaSource::new(64 * 1024)).unwrap();
//! let p = heap.allocate(24).unwrap();
//! heap.payload_mut(p)[..5].copy_from_slice(b"hello");
//! assert_eq!(&heap.payload(p)[..5], b"hello");
//! heap.release(p);
//! ```
//!
//! # Mode of operation
//! Free blocks are kept in a directory of size-segregated bins living in the
//! heap prologue: a run of exact 8-byte classes, a few coarser classes, and
//! an overflow bin, each a circular doubly linked list threaded through the
//! free blocks themselves. Allocation scans the directory from the request's
//! class upward (exact bins pop their head, coarser bins run a bounded
//! best-fit) and falls back to the *wilderness*, a designated free block at
//! the top of the heap that grows through the source and never sits in a
//! bin. Releases coalesce eagerly with both neighbours via boundary tags and
//! melt back into the wilderness when they touch it.
//!
//! Every block carries a one-word header (size plus allocated bit) and a
//! one-word footer (size only); payloads are 8-byte aligned and at least 8
//! bytes. The [`check`](SegHeap::check) validator re-derives all structural
//! invariants on demand and runs automatically after every mutating
//! operation in debug builds.
//!
//! [`allocate`]: SegHeap::allocate
//! [`release`]: SegHeap::release
//! [`reallocate`]: SegHeap::reallocate
//! [`zero_allocate`]: SegHeap::zero_allocate

mod bins;
mod block;
mod check;
mod heap;
pub mod source;

pub use crate::check::CheckError;
pub use crate::heap::{Ptr, SegHeap};
pub use crate::source::{ArenaSource, HeapSource, MmapSource, SourceExhausted};
