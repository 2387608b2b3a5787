/// A contiguous host-memory range backing guest pages, as rebuilt by
/// `harness-mem::registry` and handed to `Translator::set_host_blocks`.
///
/// Blocks are emitted sorted ascending by `host_pointer`; `host_block_start`
/// indexes the first block sharing that pointer, so two guest segments that
/// alias the same host memory (a mirrored ROM, say) can be told apart from
/// two segments that merely sort next to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMemoryBlock {
    pub start: u32,
    pub size: u32,
    pub host_pointer: usize,
    pub host_block_start: i32,
}

/// Sort `blocks` by `host_pointer` and fill in `host_block_start` in place.
///
/// This runs whenever any segment first transitions to touched. It is a
/// free function rather than a method on a collection type because both
/// `harness-mem` (which owns the segment list) and any test double need
/// to produce the exact same table shape without sharing ownership of
/// the registry.
pub fn build_host_blocks_table(mut blocks: Vec<HostMemoryBlock>) -> Vec<HostMemoryBlock> {
    blocks.sort_by_key(|b| b.host_pointer);
    let mut block_start_for_ptr: Option<(usize, i32)> = None;
    for (idx, block) in blocks.iter_mut().enumerate() {
        match block_start_for_ptr {
            Some((ptr, start)) if ptr == block.host_pointer => {
                block.host_block_start = start;
            }
            _ => {
                block.host_block_start = idx as i32;
                block_start_for_ptr = Some((block.host_pointer, idx as i32));
            }
        }
    }
    blocks
}
