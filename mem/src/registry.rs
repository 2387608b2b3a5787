use std::collections::HashSet;

use harness_core::{CpuError, HostMemoryBlock, MappedSegment, SegmentMapping, Translator};

/// Tracks page-aligned guest regions and their host-memory backing;
/// rebuilds a translator-visible table of host blocks; supports I/O-only
/// pages.
///
/// Grounded on `exec/src/tb_store.rs`'s concurrent-store discipline for
/// the general shape (an append-mostly collection guarded by the caller's
/// paused-state invariant rather than its own lock — memory-map mutations
/// only ever happen while the machine is paused) and on
/// `linux-user/src/guest_space.rs`'s page-alignment helpers.
pub struct MemoryMapRegistry {
    segments: Vec<SegmentMapping>,
    page_size: u32,
    io_pages: HashSet<u32>,
}

impl MemoryMapRegistry {
    pub fn new(page_size: u32) -> Self {
        Self {
            segments: Vec::new(),
            page_size,
            io_pages: HashSet::new(),
        }
    }

    fn is_page_aligned(&self, addr: u32, size: u32) -> bool {
        let mask = self.page_size - 1;
        addr & mask == 0 && size & mask == 0 && size > 0
    }

    /// Page-aligned key for `set_page_access_via_io`/`clear_page_access_via_io`.
    fn page_key(&self, addr: u32) -> u32 {
        addr & !(self.page_size - 1)
    }

    pub fn segments(&self) -> &[SegmentMapping] {
        &self.segments
    }

    pub fn total_mapped_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.segment.size as u64).sum()
    }

    /// Must run while the machine is paused.
    pub fn map(
        &mut self,
        starting_offset: u32,
        size: u32,
        host_pointer: usize,
        translator: &mut dyn Translator,
    ) -> Result<(), CpuError> {
        if !self.is_page_aligned(starting_offset, size) {
            return Err(CpuError::NotPageAligned { addr: starting_offset, size });
        }
        let candidate = MappedSegment::new(starting_offset, size, host_pointer);
        if self.segments.iter().any(|s| s.segment.overlaps(&candidate)) {
            return Err(CpuError::SegmentOverlap { addr: starting_offset, size });
        }
        self.segments.push(SegmentMapping::new(candidate));
        translator.map_range(starting_offset, size);
        let cache_size = (self.total_mapped_bytes() / 4) as usize;
        translator.set_translation_cache_size(cache_size);
        Ok(())
    }

    /// Must run while the machine is paused.
    pub fn unmap(&mut self, start: u32, end: u32, translator: &mut dyn Translator) -> Result<(), CpuError> {
        let size = end.wrapping_sub(start);
        if !self.is_page_aligned(start, size) {
            return Err(CpuError::NotPageAligned { addr: start, size });
        }
        translator.unmap_range(start, end - 1);

        // Flag the unmapped pages as I/O-only, then rebuild the segment
        // list by trimming/removing whatever our own tracked segments
        // said was mapped there — the translator's only query surface is
        // `is_range_mapped(start, end)`, not an enumeration, so the
        // registry remains the source of truth for *which* ranges it used
        // to track, and asks the translator only to confirm the removal.
        let mut page = start;
        while page < end {
            self.io_pages.insert(self.page_key(page));
            page += self.page_size;
        }

        let mut rebuilt = Vec::with_capacity(self.segments.len());
        for mapping in self.segments.drain(..) {
            let seg = mapping.segment;
            if seg.end() <= start || seg.starting_offset >= end {
                rebuilt.push(mapping);
                continue;
            }
            debug_assert!(
                !translator.is_range_mapped(seg.starting_offset.max(start), seg.end().min(end)),
                "translator still reports the unmapped range as mapped"
            );
            if seg.starting_offset < start {
                let mut left = mapping;
                left.segment.size = start - seg.starting_offset;
                rebuilt.push(left);
            }
            if seg.end() > end {
                let tail_host = seg.host_pointer + (end - seg.starting_offset) as usize;
                rebuilt.push(SegmentMapping::new(MappedSegment::new(end, seg.end() - end, tail_host)));
            }
        }
        self.segments = rebuilt;
        Ok(())
    }

    pub fn set_page_access_via_io(&mut self, addr: u32) {
        self.io_pages.insert(self.page_key(addr));
    }

    pub fn clear_page_access_via_io(&mut self, addr: u32) {
        self.io_pages.remove(&self.page_key(addr));
    }

    pub fn is_accessed_via_io(&self, addr: u32) -> bool {
        self.io_pages.contains(&self.page_key(addr))
    }

    fn segment_index_containing(&self, offset: u32) -> Option<usize> {
        self.segments.iter().position(|s| s.segment.contains(offset))
    }

    /// Lazily materializes the segment containing `offset` and, on its
    /// first touch, rebuilds and republishes the host-blocks table.
    pub fn touch_host_block(&mut self, offset: u32, translator: &mut dyn Translator) {
        let Some(idx) = self.segment_index_containing(offset) else {
            log::warn!("touch_host_block at {offset:#x} outside any mapped segment");
            return;
        };
        let became_touched = self.segments[idx].touch();
        if became_touched {
            self.rebuild_host_blocks(translator);
        }
    }

    fn rebuild_host_blocks(&self, translator: &mut dyn Translator) {
        let blocks: Vec<HostMemoryBlock> = self
            .segments
            .iter()
            .filter(|s| s.is_touched())
            .map(|s| HostMemoryBlock {
                start: s.segment.starting_offset,
                size: s.segment.size,
                host_pointer: s.segment.host_pointer,
                host_block_start: -1,
            })
            .collect();
        let table = harness_core::mem_block::build_host_blocks_table(blocks);
        translator.free_host_blocks();
        translator.set_host_blocks(&table);
    }
}
