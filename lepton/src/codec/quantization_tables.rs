// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::consts::{FREQ_MAX, RESIDUAL_NOISE_FLOOR, ZIGZAG_TO_TRANSPOSED};
use crate::util::u16_bit_length;

/// One quantization table stored in transposed order, plus the per-position
/// noise floor for the 14 edge coefficients.
pub struct QuantizationTables {
    q_table: [u16; 64],
    min_noise_threshold: [u8; 14],
}

impl QuantizationTables {
    /// `table` is in zigzag order as parsed from DQT.
    pub fn new(table: &[u16; 64]) -> Self {
        let mut qt = QuantizationTables {
            q_table: [0; 64],
            min_noise_threshold: [0; 14],
        };

        for i in 0..64 {
            qt.q_table[usize::from(ZIGZAG_TO_TRANSPOSED[i])] = table[i];
        }

        // Edge positions: first the top row cols 1..7, then the left column
        // rows 1..7, mapped into transposed addressing.
        for i in 0..14 {
            let coord_tr = if i < 7 { (i + 1) * 8 } else { i - 6 };

            let q = qt.q_table[coord_tr];
            if q < 9 {
                let freq_max = if q != 0 {
                    (FREQ_MAX[i] + q - 1) / q
                } else {
                    FREQ_MAX[i] - 1
                };

                let max_len = u16_bit_length(freq_max);
                if max_len > RESIDUAL_NOISE_FLOOR {
                    qt.min_noise_threshold[i] = max_len - RESIDUAL_NOISE_FLOOR;
                }
            }
        }

        qt
    }

    pub fn get_min_noise_threshold(&self, zig15_offset: usize) -> u8 {
        self.min_noise_threshold
            .get(zig15_offset)
            .copied()
            .unwrap_or(0)
    }

    /// Quantization value at a transposed position.
    pub fn get_q(&self, pos: usize) -> u16 {
        self.q_table[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_transposed() {
        let mut table = [0u16; 64];
        for (i, t) in table.iter_mut().enumerate() {
            *t = i as u16 + 1;
        }
        let qt = QuantizationTables::new(&table);
        // Zigzag index 1 is raster (0,1), transposed index 8.
        assert_eq!(qt.get_q(0), 1);
        assert_eq!(qt.get_q(8), 2);
        assert_eq!(qt.get_q(1), 3);
    }

    #[test]
    fn noise_floor_for_unit_quantizer() {
        let table = [1u16; 64];
        let qt = QuantizationTables::new(&table);
        // freq_max 931 has bit length 10, so the threshold is 10 - 7.
        assert_eq!(qt.get_min_noise_threshold(0), 3);
        // All FREQ_MAX entries are 10 or 11 bits at q == 1.
        for i in 0..14 {
            assert!((3..=4).contains(&qt.get_min_noise_threshold(i)));
        }
    }

    #[test]
    fn noise_floor_vanishes_for_large_quantizers() {
        let table = [16u16; 64];
        let qt = QuantizationTables::new(&table);
        for i in 0..14 {
            assert_eq!(qt.get_min_noise_threshold(i), 0);
        }
    }
}
