use strata_core::{blocks, BlockId, ChunkPos, BLOCK_AIR, CHUNK_SIZE_X, CHUNK_SIZE_Z};

/// Dense block grid for one chunk footprint, `16 x height x 16`.
///
/// Used both as the synthesizer's output buffer and as the grid handed back
/// by external terrain sources. Starts out as all air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBuffer {
    pos: ChunkPos,
    height: usize,
    blocks: Vec<BlockId>,
}

impl ChunkBuffer {
    /// Create an all-air buffer.
    pub fn new(pos: ChunkPos, height: usize) -> Self {
        Self {
            pos,
            height,
            blocks: vec![BLOCK_AIR; CHUNK_SIZE_X * height * CHUNK_SIZE_Z],
        }
    }

    /// Chunk this buffer covers.
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Vertical extent in blocks.
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < CHUNK_SIZE_X);
        debug_assert!(y < self.height);
        debug_assert!(z < CHUNK_SIZE_Z);
        (y * CHUNK_SIZE_Z + z) * CHUNK_SIZE_X + x
    }

    /// Block at a local position; air outside the vertical extent.
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockId {
        if y >= self.height {
            return BLOCK_AIR;
        }
        self.blocks[self.index(x, y, z)]
    }

    /// Overwrite a block. Writes above the vertical extent are ignored.
    pub fn set(&mut self, x: usize, y: usize, z: usize, block: BlockId) {
        if y >= self.height {
            return;
        }
        let idx = self.index(x, y, z);
        self.blocks[idx] = block;
    }

    /// Column at `(x, z)`, bottom first.
    pub fn column(&self, x: usize, z: usize) -> Vec<BlockId> {
        (0..self.height).map(|y| self.get(x, y, z)).collect()
    }

    /// Write a column bottom first; entries past the vertical extent are dropped.
    pub fn set_column(&mut self, x: usize, z: usize, column: &[BlockId]) {
        for (y, block) in column.iter().take(self.height).enumerate() {
            self.set(x, y, z, *block);
        }
    }

    /// Number of non-air blocks.
    pub fn solid_count(&self) -> usize {
        self.blocks.iter().filter(|b| !blocks::is_air(**b)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_air() {
        let buffer = ChunkBuffer::new(ChunkPos::new(0, 0), 64);
        assert_eq!(buffer.solid_count(), 0);
        assert_eq!(buffer.get(15, 63, 15), BLOCK_AIR);
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut buffer = ChunkBuffer::new(ChunkPos::new(1, -1), 32);
        buffer.set(3, 10, 7, 5);
        assert_eq!(buffer.get(3, 10, 7), 5);
        assert_eq!(buffer.get(7, 10, 3), BLOCK_AIR);
        assert_eq!(buffer.solid_count(), 1);
    }

    #[test]
    fn out_of_range_levels_are_ignored() {
        let mut buffer = ChunkBuffer::new(ChunkPos::new(0, 0), 8);
        buffer.set(0, 8, 0, 1);
        buffer.set_column(1, 1, &[1; 20]);
        assert_eq!(buffer.get(0, 8, 0), BLOCK_AIR);
        assert_eq!(buffer.column(1, 1), vec![1; 8]);
    }
}
