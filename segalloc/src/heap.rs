//! The [`SegHeap`] allocator context.
//!
//! Allocation policy in one paragraph: requests are padded to a block size
//! (multiple of 8, at least 16, header and footer included), then the bin
//! directory is scanned from the request's own size class upward. Exact bins
//! hand out their first block; larger bins run a bounded best-fit over their
//! first few entries, trading placement quality for a hard latency bound.
//! Whatever the bins cannot satisfy is carved off the low end of the
//! wilderness, growing the source when the wilderness runs short. Releases
//! coalesce eagerly with both physical neighbours and fold into the
//! wilderness when they touch it, so no two free non-wilderness blocks are
//! ever adjacent.

use std::cmp::min;
use std::fmt;

use tracing::{debug, instrument, trace};

use crate::bins::{self, FIRST_BYTE, FIRST_WORD, OVERFLOW_BIN, SMALL_BINS};
use crate::block::{self, ALIGN, HDR_FTR, MIN_BLOCK, MIN_PAYLOAD, WORD};
use crate::source::{HeapSource, SourceExhausted};

/// Lower bound on a single source extension; amortizes growth calls.
pub(crate) const CHUNK: u32 = 400;

/// How many entries of a non-exact bin the placement engine inspects before
/// settling for the best fit seen so far.
const BEST_FIT_PROBE: u32 = 6;

/// Handle to a live allocation: the byte offset of its payload within the
/// heap. Always 8-byte aligned.
pub type Ptr = u32;

/// A segregated-fit heap over a [`HeapSource`].
///
/// All state lives in the source's byte region itself (bin sentinels in the
/// prologue, boundary tags around every block); the context only remembers
/// where the wilderness currently starts.
pub struct SegHeap<S: HeapSource> {
    source: S,
    /// Header word of the wilderness block.
    pub(crate) wild: u32,
}

impl<S: HeapSource> fmt::Debug for SegHeap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegHeap")
            .field("len", &self.source.len())
            .field("wild", &self.wild)
            .finish()
    }
}

/// Pads a user request up to a legal block size. `None` when the padded
/// size, plus the headroom the wilderness carve keeps behind it, cannot be
/// tracked in 32 bits; no sub-4GiB heap could satisfy such a request, and
/// rejecting it here keeps every later `size + MIN_BLOCK` in range.
fn pad_request(size: usize) -> Option<u32> {
    if size <= MIN_PAYLOAD as usize {
        return Some(MIN_BLOCK);
    }
    let padded =
        size.checked_add((HDR_FTR + ALIGN - 1) as usize)? / ALIGN as usize * ALIGN as usize;
    if padded > (u32::MAX - MIN_BLOCK) as usize {
        return None;
    }
    Some(padded as u32)
}

impl<S: HeapSource> SegHeap<S> {
    /// Initializes a heap on a fresh source: writes the bin directory into
    /// the prologue and turns everything behind it into the wilderness.
    pub fn new(source: S) -> Result<Self, SourceExhausted> {
        debug_assert!(source.is_empty(), "the source must not have been grown");

        let mut heap = SegHeap {
            source,
            wild: FIRST_WORD,
        };
        // Room for the directory, one minimum block, and the slack word that
        // keeps the region end one word past the wilderness footer.
        heap.expand(FIRST_BYTE + MIN_BLOCK + WORD as u32)?;

        let wild_size = heap.source.len() as u32 - (FIRST_BYTE + WORD as u32);
        let buf = heap.source.bytes_mut();
        for b in 0..bins::BIN_COUNT {
            block::store(buf, b, b);
        }
        block::pack(buf, heap.wild, wild_size, true);
        block::pack(buf, heap.wild + wild_size / 4 - 1, wild_size, true);

        heap.debug_check();
        Ok(heap)
    }

    /// Allocates at least `size` usable bytes, 8-byte aligned. Returns
    /// `None` for zero-sized requests and when the source cannot grow.
    #[instrument(level = "debug", skip(self), ret)]
    pub fn allocate(&mut self, size: usize) -> Option<Ptr> {
        self.debug_check();
        if size == 0 {
            return None;
        }
        let padded = pad_request(size)?;

        for b in bins::bin_index(padded)..=OVERFLOW_BIN {
            let Some(head) = bins::first(self.source.bytes(), b) else {
                continue;
            };
            // Exact bins hold one size class only, so the head fits by
            // construction; anything larger gets the bounded best-fit.
            let found = if b < SMALL_BINS {
                Some(head)
            } else {
                self.probe_best(b, head, padded)
            };
            if let Some(w) = found {
                trace!(bin = b, word = w, "placing in binned block");
                return Some(self.place(w, padded));
            }
        }

        trace!("no binned fit, carving from the wilderness");
        self.wild_alloc(padded)
    }

    /// Returns the block at `p` to the heap, coalescing with free physical
    /// neighbours and with the wilderness.
    #[instrument(level = "debug", skip(self))]
    pub fn release(&mut self, p: Ptr) {
        let mut w = p / 4 - 1;

        let buf = self.source.bytes_mut();
        debug_assert!(!block::is_free(buf, w), "block released twice");
        block::mark(buf, w, true);

        if w != FIRST_WORD {
            let prev = block::prev(buf, w);
            if block::is_free(buf, prev) {
                bins::unlink(buf, prev);
                let merged = block::size(buf, prev) + block::size(buf, w);
                w = prev;
                block::pack(buf, w, merged, true);
                block::pack(buf, w + merged / 4 - 1, merged, true);
            }
        }

        if block::next(buf, w) == self.wild {
            // The freed run reaches the wilderness; the wilderness swallows
            // it whole instead of it joining a bin.
            let merged = block::size(buf, self.wild) + block::size(buf, w);
            self.wild = w;
            block::pack(buf, w, merged, true);
            block::pack(buf, w + merged / 4 - 1, merged, true);
        } else {
            let next = block::next(buf, w);
            if block::is_free(buf, next) {
                bins::unlink(buf, next);
                let merged = block::size(buf, w) + block::size(buf, next);
                block::pack(buf, w, merged, true);
                block::pack(buf, w + merged / 4 - 1, merged, true);
            }
            bins::insert(buf, w);
        }

        self.debug_check();
    }

    /// Resizes the allocation at `p` to at least `size` bytes.
    ///
    /// `reallocate(None, n)` allocates; `reallocate(p, 0)` releases and
    /// returns `None`. A block that already holds `size` bytes is returned
    /// unchanged; otherwise the contents move to a fresh allocation and the
    /// old block is released. On failure the old allocation stays intact.
    #[instrument(level = "debug", skip(self), ret)]
    pub fn reallocate(&mut self, p: Option<Ptr>, size: usize) -> Option<Ptr> {
        if size == 0 {
            if let Some(p) = p {
                self.release(p);
            }
            return None;
        }
        let Some(p) = p else {
            return self.allocate(size);
        };

        let w = p / 4 - 1;
        let held = block::size(self.source.bytes(), w);
        if held as usize >= size.saturating_add(HDR_FTR as usize) {
            return Some(p);
        }

        let q = self.allocate(size)?;
        let copy = min(size, (held - HDR_FTR) as usize);
        let buf = self.source.bytes_mut();
        buf.copy_within(p as usize..p as usize + copy, q as usize);
        self.release(p);
        Some(q)
    }

    /// Allocates `count * size` bytes and zeroes them. Returns `None` when
    /// the product overflows or the allocation fails.
    #[instrument(level = "debug", skip(self), ret)]
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<Ptr> {
        let bytes = count.checked_mul(size)?;
        let p = self.allocate(bytes)?;
        let at = p as usize;
        self.source.bytes_mut()[at..at + bytes].fill(0);
        Some(p)
    }

    /// The usable bytes of the allocation at `p`.
    pub fn payload(&self, p: Ptr) -> &[u8] {
        let len = self.payload_len(p);
        &self.source.bytes()[p as usize..p as usize + len]
    }

    /// The usable bytes of the allocation at `p`, writable.
    pub fn payload_mut(&mut self, p: Ptr) -> &mut [u8] {
        let len = self.payload_len(p);
        &mut self.source.bytes_mut()[p as usize..p as usize + len]
    }

    fn payload_len(&self, p: Ptr) -> usize {
        let w = p / 4 - 1;
        let buf = self.source.bytes();
        debug_assert!(!block::is_free(buf, w), "handle does not name a live block");
        (block::size(buf, w) - HDR_FTR) as usize
    }

    /// Total heap length in bytes.
    pub fn heap_size(&self) -> usize {
        self.source.len()
    }

    /// Current size of the wilderness block in bytes. When nothing is
    /// allocated this is the whole heap minus the prologue and the trailing
    /// slack word.
    pub fn wilderness_size(&self) -> usize {
        block::size(self.source.bytes(), self.wild) as usize
    }

    pub(crate) fn buf(&self) -> &[u8] {
        self.source.bytes()
    }

    #[cfg(test)]
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        self.source.bytes_mut()
    }

    pub(crate) fn heap_words(&self) -> u32 {
        (self.source.len() / WORD) as u32
    }

    /// Grows the source by at least `bytes` (and never less than [`CHUNK`]),
    /// returning the actual growth.
    fn expand(&mut self, bytes: u32) -> Result<u32, SourceExhausted> {
        let want = bytes.max(CHUNK);
        let grown = self.source.extend(want as usize)?;
        debug!(want, grown, "extended the heap source");
        Ok(grown as u32)
    }

    /// Bounded best-fit over the first [`BEST_FIT_PROBE`] entries of bin
    /// `b`, starting at `head`. Returns the smallest inspected block that
    /// holds `size`, if any.
    fn probe_best(&self, b: u32, head: u32, size: u32) -> Option<u32> {
        let buf = self.source.bytes();
        let mut best: Option<(u32, u32)> = None;
        let mut cur = head;
        let mut probed = 0;

        while cur != b && probed < BEST_FIT_PROBE {
            let csize = block::size(buf, cur);
            if csize >= size && best.map_or(true, |(bs, _)| csize <= bs) {
                best = Some((csize, cur));
            }
            cur = block::right(buf, cur);
            probed += 1;
        }
        best.map(|(_, w)| w)
    }

    /// Satisfies a request from the free block at `w`: unlinks it, splits
    /// off the tail when the remainder can stand as a block of its own, and
    /// returns the payload handle.
    fn place(&mut self, w: u32, size: u32) -> Ptr {
        let buf = self.source.bytes_mut();
        debug_assert!(block::is_free(buf, w));
        debug_assert!(block::size(buf, w) >= size);

        bins::unlink(buf, w);
        let bsize = block::size(buf, w);

        if bsize >= size + MIN_BLOCK {
            block::pack(buf, w, size, false);
            let tail = w + size / 4;
            block::pack(buf, tail - 1, size, false);

            let rem = bsize - size;
            block::pack(buf, tail, rem, true);
            block::pack(buf, tail + rem / 4 - 1, rem, true);
            bins::insert(buf, tail);
        } else {
            block::mark(buf, w, false);
        }

        self.debug_check();
        (w + 1) * 4
    }

    /// Carves `size` bytes off the low end of the wilderness, growing the
    /// source first when the remainder would drop below a standalone block.
    #[instrument(level = "trace", skip(self))]
    fn wild_alloc(&mut self, size: u32) -> Option<Ptr> {
        let mut wsize = block::size(self.source.bytes(), self.wild);

        if wsize < size + MIN_BLOCK {
            // The branch condition keeps this difference positive even when
            // the wilderness already covers `size` but not the headroom.
            let inc = match self.expand((size + MIN_BLOCK) - wsize) {
                Ok(inc) => inc,
                Err(SourceExhausted) => {
                    debug!(request = size, "source exhausted, allocation fails");
                    return None;
                }
            };
            wsize += inc;
        }
        debug_assert!(wsize >= size + MIN_BLOCK);

        let w = self.wild;
        self.wild = w + size / 4;
        wsize -= size;

        let buf = self.source.bytes_mut();
        block::pack(buf, w, size, false);
        block::pack(buf, self.wild - 1, size, false);
        block::pack(buf, self.wild, wsize, true);
        block::pack(buf, self.wild + wsize / 4 - 1, wsize, true);

        self.debug_check();
        Some((w + 1) * 4)
    }

    #[cfg(debug_assertions)]
    pub(crate) fn debug_check(&self) {
        if let Err(err) = self.check() {
            panic!("heap invariant violated: {err}");
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub(crate) fn debug_check(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ArenaSource;

    #[test]
    fn test_pad_1() {
        assert_eq!(pad_request(1), Some(16));
        assert_eq!(pad_request(8), Some(16));
        assert_eq!(pad_request(9), Some(24));
        assert_eq!(pad_request(24), Some(32));
        assert_eq!(pad_request(3000), Some(3008));
    }

    #[test]
    fn test_pad_2() {
        assert_eq!(pad_request(usize::MAX), None);
        assert_eq!(pad_request(u32::MAX as usize), None);
        // Pads to u32::MAX - 7, which fits 32 bits but leaves no headroom.
        assert_eq!(pad_request((u32::MAX - 20) as usize), None);
        // The largest request whose padded size still leaves MIN_BLOCK of
        // headroom below u32::MAX.
        assert_eq!(pad_request((u32::MAX - 31) as usize), Some(u32::MAX - 23));
    }

    #[test]
    fn test_init_1() {
        let heap = SegHeap::new(ArenaSource::new(64 * 1024)).unwrap();
        // The first extension is CHUNK bytes; everything behind the
        // directory and the slack word is wilderness.
        assert_eq!(heap.wild, FIRST_WORD);
        assert_eq!(
            block::size(heap.buf(), heap.wild),
            CHUNK - FIRST_BYTE - WORD as u32
        );
        assert!(block::is_free(heap.buf(), heap.wild));
        assert!(heap.check().is_ok());
    }

    #[test]
    fn test_init_2() {
        // A source too small for even the prologue fails initialization.
        assert!(SegHeap::new(ArenaSource::new(64)).is_err());
    }

    #[test]
    fn test_alloc_shapes_1() {
        let mut heap = SegHeap::new(ArenaSource::new(64 * 1024)).unwrap();
        let p = heap.allocate(24).unwrap();
        assert_eq!(p % 8, 0);
        assert_eq!(heap.payload(p).len(), 24);

        // The padded block is 32 bytes; payload length reports the usable
        // span past the header, not the request.
        let q = heap.allocate(1).unwrap();
        assert_eq!(heap.payload(q).len(), 8);
    }

    #[test]
    fn test_zero_allocate_1() {
        let mut heap = SegHeap::new(ArenaSource::new(64 * 1024)).unwrap();
        let p = heap.allocate(64).unwrap();
        // Barrier keeps the released block out of the wilderness.
        let _barrier = heap.allocate(64).unwrap();
        heap.payload_mut(p).fill(0xAB);
        heap.release(p);

        let q = heap.zero_allocate(8, 8).unwrap();
        assert_eq!(q, p, "exact bin should recycle the dirtied block");
        assert!(heap.payload(q)[..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_allocate_2() {
        let mut heap = SegHeap::new(ArenaSource::new(64 * 1024)).unwrap();
        assert_eq!(heap.zero_allocate(usize::MAX, 2), None);
        assert_eq!(heap.zero_allocate(0, 8), None);
    }

    #[test]
    fn test_wild_tight_1() {
        // Wilderness larger than the request but short of the split
        // headroom: the carve must extend the source, not underflow.
        let mut heap = SegHeap::new(ArenaSource::new(1 << 20)).unwrap();
        assert_eq!(heap.wilderness_size(), 320);

        // Pads to 312; every bin is empty, so this lands on the wilderness
        // with only 8 spare bytes.
        let p = heap.allocate(300).unwrap();
        assert_eq!(heap.payload(p).len(), 304);
        assert_eq!(heap.wilderness_size(), 320 + CHUNK as usize - 312);
        assert!(heap.check().is_ok());

        heap.release(p);
        assert_eq!(heap.wilderness_size(), heap.heap_size() - 80);
    }

    #[test]
    fn test_oversize_request_1() {
        // A request whose padded size fits u32 but leaves no carve headroom
        // fails cleanly instead of wrapping the wilderness math.
        let mut heap = SegHeap::new(ArenaSource::new(1 << 20)).unwrap();
        assert_eq!(heap.allocate((u32::MAX - 20) as usize), None);
        assert_eq!(heap.reallocate(None, (u32::MAX - 20) as usize), None);
        assert!(heap.check().is_ok());
    }
}
