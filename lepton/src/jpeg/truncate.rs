// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::consts::MAX_COMPONENTS;
use crate::jpeg::jpeg_header::JpegHeader;

/// Tracks how much of each component is actually coded when the source JPEG
/// ended early. A full image keeps the nominal block counts.
#[derive(Debug, Clone, Default)]
pub struct TruncateComponents {
    trunc_bcv: Vec<u32>,
    trunc_bc: Vec<u32>,
    components_count: usize,
    mcu_count_vertical: u32,
}

impl TruncateComponents {
    pub fn new() -> Self {
        TruncateComponents::default()
    }

    pub fn init(&mut self, header: &JpegHeader) {
        self.mcu_count_vertical = header.mcuv;
        self.components_count = header.cmpc;

        self.trunc_bcv = (0..header.cmpc).map(|i| header.cmp_info[i].bcv).collect();
        self.trunc_bc = (0..header.cmpc).map(|i| header.cmp_info[i].bc).collect();
    }

    pub fn get_max_coded_heights(&self) -> Vec<u32> {
        self.trunc_bcv.clone()
    }

    pub fn get_block_height(&self, cmp: usize) -> u32 {
        self.trunc_bcv.get(cmp).copied().unwrap_or(0)
    }

    pub fn get_component_sizes_in_blocks(&self) -> Vec<u32> {
        self.trunc_bc.clone()
    }

    /// Reduces the coded heights to cover only blocks up to `max_dpos` per
    /// component, rounded up to whole MCU rows.
    pub fn set_truncation_bounds(&mut self, header: &JpegHeader, max_dpos: [u32; MAX_COMPONENTS]) {
        for i in 0..self.components_count {
            self.set_block_count_dpos(i, header, max_dpos[i] + 1);
        }
    }

    fn set_block_count_dpos(&mut self, component_idx: usize, header: &JpegHeader, trunc_bc: u32) {
        let ci = &header.cmp_info[component_idx];

        let mut vertical_scan_lines = if trunc_bc % ci.bch != 0 {
            trunc_bc / ci.bch + 1
        } else {
            trunc_bc / ci.bch
        };
        vertical_scan_lines = vertical_scan_lines.min(ci.bcv);

        let ratio = ci.bcv / self.mcu_count_vertical;

        while vertical_scan_lines % ratio != 0 && vertical_scan_lines + 1 <= ci.bcv {
            vertical_scan_lines += 1;
        }

        self.trunc_bcv[component_idx] = vertical_scan_lines;
        self.trunc_bc[component_idx] = trunc_bc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::JpegType;
    use crate::jpeg::jpeg_header::parse_sof;

    #[test]
    fn truncation_rounds_to_mcu_rows() {
        let mut header = crate::jpeg::jpeg_header::JpegHeader::new();
        // 16x32 with 2x2 luma and 1x1 chroma: luma is 2x4 blocks.
        let sof = [8, 0, 32, 0, 16, 3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1];
        parse_sof(&mut header, &sof, JpegType::Sequential).unwrap();

        let mut tc = TruncateComponents::new();
        tc.init(&header);
        assert_eq!(tc.get_block_height(0), 4);

        // Stop after luma block 2 (second row started): rows round up to the
        // MCU boundary, so both luma rows of the first MCU remain.
        tc.set_truncation_bounds(&header, [2, 0, 0, 0]);
        assert_eq!(tc.get_block_height(0), 2);
        assert_eq!(tc.get_component_sizes_in_blocks()[0], 3);
    }
}
