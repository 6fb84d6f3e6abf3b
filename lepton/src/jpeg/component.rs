// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// Per-component geometry and table assignments derived from SOF/SOS.
///
/// `bch`/`bcv` count blocks including the padding needed to fill whole MCUs;
/// `nch`/`ncv` count only blocks that cover actual pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentInfo {
    /// JPEG component identifier from SOF.
    pub jid: u8,
    /// Quantization table index.
    pub q_table_index: u8,
    /// DC Huffman table index from SOS.
    pub huff_dc: u8,
    /// AC Huffman table index from SOS.
    pub huff_ac: u8,
    /// Horizontal sampling factor.
    pub sfh: u32,
    /// Vertical sampling factor.
    pub sfv: u32,
    /// Blocks per MCU (`sfh * sfv`).
    pub mbs: u32,
    /// Block count horizontal, interleaved.
    pub bch: u32,
    /// Block count vertical, interleaved.
    pub bcv: u32,
    /// Total block count, interleaved.
    pub bc: u32,
    /// Block count horizontal, non-interleaved.
    pub nch: u32,
    /// Block count vertical, non-interleaved.
    pub ncv: u32,
    /// Total block count, non-interleaved.
    pub nc: u32,
}
