//! Segregated free-list directory.
//!
//! The first [`BIN_COUNT`] words of the heap form the bin directory: one
//! sentinel word per size class. A sentinel holds the word offset of the
//! first block in its bin, or its own index when the bin is empty. Bin lists
//! are circular and doubly linked: a block's backward link points at either
//! the sentinel or the preceding block, and the last block's forward link
//! points back at the sentinel, so sentinel indices and block headers share
//! one offset namespace (sentinels are the offsets `<= OVERFLOW_BIN`).

use static_assertions::const_assert_eq;

use crate::block::{self, ALIGN, MIN_BLOCK, WORD};

/// Exact-size bins, one per 8-byte quantum starting at the minimum block.
pub(crate) const SMALL_BINS: u32 = 8;

/// Bins of 64-byte quanta following the exact bins.
pub(crate) const MED_BINS: u32 = 2;

/// Bins of 3072-byte quanta following the medium bins.
pub(crate) const BIG_BINS: u32 = 8;

/// Directory length: the sized bins plus one overflow bin.
pub(crate) const BIN_COUNT: u32 = SMALL_BINS + MED_BINS + BIG_BINS + 1;

/// Index of the overflow bin, which takes everything too big for the rest.
pub(crate) const OVERFLOW_BIN: u32 = BIN_COUNT - 1;

/// Word index of the first block header, directly after the directory.
pub(crate) const FIRST_WORD: u32 = BIN_COUNT;

/// Byte offset of the first block header.
pub(crate) const FIRST_BYTE: u32 = FIRST_WORD * WORD as u32;

// The directory must end on an 8n+4 boundary so that the first payload
// (one word past the first header) is 8-byte aligned.
const_assert_eq!(FIRST_BYTE % ALIGN, WORD as u32);

/// Maps a padded block size (multiple of 8, >= 16) to its bin index.
#[inline]
pub(crate) fn bin_index(size: u32) -> u32 {
    debug_assert_eq!(size % ALIGN, 0);
    debug_assert!(size >= MIN_BLOCK);

    const SMALL_END: u32 = MIN_BLOCK + SMALL_BINS * 8;
    const MED_END: u32 = SMALL_END + MED_BINS * 64;
    const BIG_END: u32 = MED_END + BIG_BINS * 3072;

    if size < SMALL_END {
        size / 8 - 2
    } else if size < MED_END {
        SMALL_BINS + (size - SMALL_END) / 64
    } else if size < BIG_END {
        SMALL_BINS + MED_BINS + (size - MED_END) / 3072
    } else {
        OVERFLOW_BIN
    }
}

/// First block of bin `b`, or `None` when the bin is empty.
#[inline]
pub(crate) fn first(buf: &[u8], b: u32) -> Option<u32> {
    debug_assert!(b <= OVERFLOW_BIN);
    let head = block::load(buf, b);
    (head != b).then_some(head)
}

/// Links the free block at `w` into the front of the bin chosen by its size.
pub(crate) fn insert(buf: &mut [u8], w: u32) {
    debug_assert!(block::is_free(buf, w));

    let b = bin_index(block::size(buf, w));
    let old_first = block::load(buf, b);

    block::store(buf, b, w);
    block::set_left(buf, w, b);
    if old_first == b {
        // Bin was empty; close the cycle back onto the sentinel.
        block::set_right(buf, w, b);
    } else {
        block::set_right(buf, w, old_first);
        block::set_left(buf, old_first, w);
    }

    debug_assert_eq!(block::load(buf, b), w);
    debug_assert_eq!(block::left(buf, w), b);
}

/// Unlinks the free block at `w` from whichever bin holds it.
pub(crate) fn unlink(buf: &mut [u8], w: u32) {
    let left = block::left(buf, w);
    let right = block::right(buf, w);

    if left <= OVERFLOW_BIN {
        // Backward link is the sentinel itself.
        block::store(buf, left, right);
    } else {
        block::set_right(buf, left, right);
    }
    if right > OVERFLOW_BIN {
        block::set_left(buf, right, left);
    }
}
