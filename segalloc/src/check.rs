//! Heap validator.
//!
//! Walks the physical block chain from the first header to the wilderness
//! and every bin list in the directory, confirming the structural
//! invariants: alignment, minimum sizes, matching boundary tags, complete
//! coalescing, well-formed doubly linked bins with correctly classed
//! members, and agreement between the two free-block counts. Debug builds
//! run this after every mutating operation; release builds keep it callable
//! but never invoke it automatically.

use thiserror::Error;

use crate::bins::{self, FIRST_WORD, OVERFLOW_BIN};
use crate::block::{self, ALIGN, MIN_BLOCK};
use crate::heap::SegHeap;
use crate::source::HeapSource;

/// A violated heap invariant. The `Display` text is the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("wilderness header at word {0} lies outside the heap")]
    WildOutOfHeap(u32),
    #[error("block at word {0} has unaligned size {1}")]
    UnalignedSize(u32, u32),
    #[error("block at word {0} is smaller than the minimum block")]
    Undersized(u32),
    #[error("block at word {0} runs past the wilderness")]
    Overrun(u32),
    #[error("footer of block at word {0} does not match its header")]
    TagMismatch(u32),
    #[error("adjacent free blocks at word {0}")]
    AdjacentFree(u32),
    #[error("wilderness does not abut the heap end")]
    WildNotLast,
    #[error("bin {0} links to word {1}, which is not a block")]
    BadLink(u32, u32),
    #[error("bin {0} holds a block of the wrong size class at word {1}")]
    WrongBin(u32, u32),
    #[error("bin {0} is not doubly linked at word {1}")]
    NotDoublyLinked(u32, u32),
    #[error("bin {0} holds an allocated block at word {1}")]
    AllocatedInBin(u32, u32),
    #[error("{heap} free blocks in the heap but {lists} across the bins")]
    CountMismatch { heap: u32, lists: u32 },
}

impl<S: HeapSource> SegHeap<S> {
    /// Verifies every structural invariant of the heap, returning the first
    /// violation found.
    pub fn check(&self) -> Result<(), CheckError> {
        let buf = self.buf();
        let words = self.heap_words();

        if self.wild >= words {
            return Err(CheckError::WildOutOfHeap(self.wild));
        }

        // Physical walk: first block up to (excluding) the wilderness.
        let mut w = FIRST_WORD;
        let mut heap_free = 0_u32;
        let mut prev_free = false;

        while w != self.wild {
            let size = block::size(buf, w);
            if size % ALIGN != 0 {
                return Err(CheckError::UnalignedSize(w, size));
            }
            if size < MIN_BLOCK {
                return Err(CheckError::Undersized(w));
            }

            let next = w + size / 4;
            if next > self.wild {
                return Err(CheckError::Overrun(w));
            }
            // The footer must reproduce the header size, or the physical
            // back-walk from the successor would land elsewhere.
            if block::prev(buf, next) != w {
                return Err(CheckError::TagMismatch(w));
            }

            if block::is_free(buf, w) {
                if prev_free {
                    return Err(CheckError::AdjacentFree(w));
                }
                heap_free += 1;
                prev_free = true;
            } else {
                prev_free = false;
            }

            w = next;
        }

        // The wilderness itself: aligned, and its footer one word short of
        // the region end.
        let wsize = block::size(buf, self.wild);
        if wsize % ALIGN != 0 {
            return Err(CheckError::UnalignedSize(self.wild, wsize));
        }
        if self.wild + wsize / 4 + 1 != words {
            return Err(CheckError::WildNotLast);
        }

        // Bin walk: every list doubly linked, every member free and in the
        // bin its size selects.
        let mut list_free = 0_u32;

        for b in 0..=OVERFLOW_BIN {
            let mut prev = b;
            let mut cur = block::load(buf, b);

            while cur != b {
                if cur <= OVERFLOW_BIN || cur >= words || list_free > heap_free {
                    return Err(CheckError::BadLink(b, cur));
                }
                if !block::is_free(buf, cur) {
                    return Err(CheckError::AllocatedInBin(b, cur));
                }
                if bins::bin_index(block::size(buf, cur)) != b {
                    return Err(CheckError::WrongBin(b, cur));
                }
                if block::left(buf, cur) != prev {
                    return Err(CheckError::NotDoublyLinked(b, cur));
                }

                list_free += 1;
                prev = cur;
                cur = block::right(buf, cur);
            }
        }

        if heap_free != list_free {
            return Err(CheckError::CountMismatch {
                heap: heap_free,
                lists: list_free,
            });
        }

        Ok(())
    }
}
