// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::image::aligned_block::{AlignedBlock, EMPTY_BLOCK};

/// The coefficient grid of one color component: `block_width` blocks per row
/// in row-major order. The backing vector grows on demand so partially
/// decoded (truncated) images only pay for the blocks they contain.
pub struct BlockBasedImage {
    blocks: Vec<AlignedBlock>,
    block_width: u32,
    original_height: u32,
}

impl BlockBasedImage {
    pub fn new(block_width: u32, block_height: u32) -> Self {
        BlockBasedImage {
            blocks: Vec::with_capacity((block_width * block_height) as usize),
            block_width,
            original_height: block_height,
        }
    }

    pub fn block_width(&self) -> u32 {
        self.block_width
    }

    pub fn original_height(&self) -> u32 {
        self.original_height
    }

    /// Read-only access; positions past the stored blocks read as all-zero.
    pub fn get_block(&self, dpos: u32) -> &AlignedBlock {
        self.blocks.get(dpos as usize).unwrap_or(&EMPTY_BLOCK)
    }

    pub fn get_block_xy(&self, block_x: u32, block_y: u32) -> &AlignedBlock {
        self.get_block(block_y * self.block_width + block_x)
    }

    /// Grows the image (with zero blocks) so that `dpos` is addressable and
    /// returns it mutably.
    pub fn ensure_block(&mut self, dpos: u32) -> &mut AlignedBlock {
        while self.blocks.len() <= dpos as usize {
            self.blocks.push(EMPTY_BLOCK);
        }
        &mut self.blocks[dpos as usize]
    }

    pub fn append_block(&mut self, block: AlignedBlock) {
        self.blocks.push(block);
    }

    pub fn set_block_by_dpos(&mut self, dpos: u32, block: AlignedBlock) {
        *self.ensure_block(dpos) = block;
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_reads_are_zero() {
        let img = BlockBasedImage::new(4, 4);
        assert_eq!(img.get_block(100), &EMPTY_BLOCK);
        assert_eq!(img.get_block_xy(3, 3), &EMPTY_BLOCK);
    }

    #[test]
    fn writes_grow_the_grid() {
        let mut img = BlockBasedImage::new(4, 4);
        let mut block = AlignedBlock::default();
        block.set_dc(9);
        img.set_block_by_dpos(10, block);
        assert_eq!(img.num_blocks(), 11);
        assert_eq!(img.get_block(10).get_dc(), 9);
        assert_eq!(img.get_block(5).get_dc(), 0);
        assert_eq!(img.get_block_xy(2, 2).get_dc(), 9);
    }
}
