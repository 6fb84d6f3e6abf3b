// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// Whether a JPEG uses a single sequential scan or progressive refinement scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JpegType {
    #[default]
    Unknown,
    Sequential,
    Progressive,
}

/// State of the position cursor after advancing past a coded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegDecodeStatus {
    DecodeInProgress,
    RestartIntervalExpired,
    ScanCompleted,
}

pub const MAX_COMPONENTS: usize = 4;

/// Only Y, Cb and Cr get coefficient models; a fourth channel is rejected.
pub const COLOR_CHANNEL_NUM_BLOCK_TYPES: usize = 3;

// JPEG marker codes
pub const MARKER_SOI: u8 = 0xD8;
pub const MARKER_EOI: u8 = 0xD9;
pub const MARKER_SOS: u8 = 0xDA;
pub const MARKER_DQT: u8 = 0xDB;
pub const MARKER_DHT: u8 = 0xC4;
pub const MARKER_DRI: u8 = 0xDD;
pub const MARKER_SOF0: u8 = 0xC0;
pub const MARKER_SOF1: u8 = 0xC1;
pub const MARKER_SOF2: u8 = 0xC2;
pub const MARKER_RST0: u8 = 0xD0;

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Maps zigzag order to the transposed storage order (index `col * 8 + row`).
#[rustfmt::skip]
pub const ZIGZAG_TO_TRANSPOSED: [u8; 64] = [
     0,  8,  1,  2,  9, 16, 24, 17, 10,  3,  4, 11, 18, 25, 32, 40,
    33, 26, 19, 12,  5,  6, 13, 20, 27, 34, 41, 48, 56, 49, 42, 35,
    28, 21, 14,  7, 15, 22, 29, 36, 43, 50, 57, 58, 51, 44, 37, 30,
    23, 31, 38, 45, 52, 59, 60, 53, 46, 39, 47, 54, 61, 62, 55, 63,
];

/// Maps the zigzag order of the 49 interior coefficients to transposed indices.
#[rustfmt::skip]
pub const UNZIGZAG_49_TR: [u8; 49] = [
     9, 17, 10, 11, 18, 25, 33, 26, 19, 12, 13, 20, 27, 34, 41, 49,
    42, 35, 28, 21, 14, 15, 22, 29, 36, 43, 50, 57, 58, 51, 44, 37,
    30, 23, 31, 38, 45, 52, 59, 60, 53, 46, 39, 47, 54, 61, 62, 55,
    63,
];

/// IDCT basis magnitudes scaled by 8192. The DC term is zeroed since it does
/// not contribute to the edge coefficient predictors.
pub const ICOS_BASED_8192_SCALED: [i32; 8] = [0, 11363, 10703, 9633, 8192, 6436, 4433, 2260];

/// Same basis with alternating signs, used to predict the far edge of a block.
pub const ICOS_BASED_8192_SCALED_PM: [i32; 8] =
    [8192, -11363, 10703, -9633, 8192, -6436, 4433, -2260];

/// Maximum plausible frequency magnitude per edge coefficient position.
#[rustfmt::skip]
pub const FREQ_MAX: [u16; 14] = [
    931, 985, 968, 1020, 968, 1020, 1020, 932, 985, 967, 1020, 969, 1020, 1020,
];

/// Bins a neighbor-derived non-zero context value (0..=25).
#[rustfmt::skip]
pub const NON_ZERO_TO_BIN: [u8; 26] = [
    0, 1, 2, 3, 4, 4, 5, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7, 7, 7, 7, 7, 8, 8, 8, 8, 8,
];

/// Bins the count of remaining non-zero 7x7 coefficients (0..=49).
#[rustfmt::skip]
pub const NON_ZERO_TO_BIN_7X7: [u8; 50] = [
    0, 0, 1, 2, 3, 3, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6, 6, 6, 6, 6, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
];

/// Low-order bits below this count are coded as plain noise.
pub const RESIDUAL_NOISE_FLOOR: u8 = 7;

/// Largest coded coefficient bit length.
pub const MAX_EXPONENT: usize = 11;

pub const LEPTON_VERSION: u8 = 1;

/// Most partitions a single lepton file can carry.
pub const MAX_PARTITIONS: usize = 16;

// Lepton container markers. The magic is the UTF-8 encoding of tau.
pub const LEPTON_FILE_HEADER: [u8; 2] = [0xCF, 0x84];
pub const LEPTON_HEADER_BASELINE_JPEG_TYPE: u8 = b'Z';
pub const LEPTON_HEADER_PROGRESSIVE_JPEG_TYPE: u8 = b'X';
pub const LEPTON_HEADER_MARKER: [u8; 3] = *b"HDR";
pub const LEPTON_HEADER_PAD_MARKER: [u8; 3] = *b"P0D";
pub const LEPTON_HEADER_JPG_RESTARTS_MARKER: [u8; 3] = *b"CRS";
pub const LEPTON_HEADER_JPG_RESTART_ERRORS_MARKER: [u8; 3] = *b"FRS";
pub const LEPTON_HEADER_LUMA_SPLIT_MARKER: [u8; 2] = *b"HH";
pub const LEPTON_HEADER_EARLY_EOF_MARKER: [u8; 3] = *b"EEE";
pub const LEPTON_HEADER_PREFIX_GARBAGE_MARKER: [u8; 3] = *b"PGR";
pub const LEPTON_HEADER_GARBAGE_MARKER: [u8; 3] = *b"GRB";
pub const LEPTON_HEADER_COMPLETION_MARKER: [u8; 3] = *b"CMP";
