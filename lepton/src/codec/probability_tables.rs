// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::codec::block_context::NeighborData;
use crate::codec::quantization_tables::QuantizationTables;
use crate::consts::{ICOS_BASED_8192_SCALED, ICOS_BASED_8192_SCALED_PM, NON_ZERO_TO_BIN};
use crate::error::{Error, Result};

/// Immutable descriptor of which neighbors a block has. One of the four
/// singletons below is picked per block position; the predictors branch on
/// the flags instead of going through virtual dispatch.
pub struct ProbabilityTables {
    left_present: bool,
    above_present: bool,
    all_present: bool,
}

pub static NO_NEIGHBORS: ProbabilityTables = ProbabilityTables {
    left_present: false,
    above_present: false,
    all_present: false,
};
pub static TOP_ONLY: ProbabilityTables = ProbabilityTables {
    left_present: false,
    above_present: true,
    all_present: false,
};
pub static LEFT_ONLY: ProbabilityTables = ProbabilityTables {
    left_present: true,
    above_present: false,
    all_present: false,
};
pub static ALL_NEIGHBORS: ProbabilityTables = ProbabilityTables {
    left_present: true,
    above_present: true,
    all_present: true,
};

/// Outcome of the IDCT-based DC prediction for a block.
pub struct PredictDcResult {
    pub predicted_dc: i32,
    pub uncertainty: i16,
    pub uncertainty2: i16,
    pub next_edge_pixels_h: [i16; 8],
    pub next_edge_pixels_v: [i16; 8],
}

impl ProbabilityTables {
    pub fn is_all_present(&self) -> bool {
        self.all_present
    }

    pub fn is_left_present(&self) -> bool {
        self.left_present
    }

    pub fn is_above_present(&self) -> bool {
        self.above_present
    }

    /// Context bin for the 7x7 non-zero count, derived from the neighbors'
    /// counts.
    pub fn calc_num_non_zeros_7x7_context_bin(&self, neighbors: &NeighborData) -> u8 {
        let mut num_non_zeros_above = 0u32;
        let mut num_non_zeros_left = 0u32;

        if self.all_present || self.above_present {
            num_non_zeros_above = u32::from(neighbors.neighbor_context_above.num_non_zeros);
        }
        if self.all_present || self.left_present {
            num_non_zeros_left = u32::from(neighbors.neighbor_context_left.num_non_zeros);
        }

        let num_non_zeros_context = if !self.all_present && self.above_present && !self.left_present
        {
            (num_non_zeros_above + 1) / 2
        } else if !self.all_present && self.left_present && !self.above_present {
            (num_non_zeros_left + 1) / 2
        } else if self.all_present || (self.left_present && self.above_present) {
            (num_non_zeros_above + num_non_zeros_left + 2) / 4
        } else {
            0
        };

        let idx = (num_non_zeros_context as usize).min(NON_ZERO_TO_BIN.len() - 1);
        NON_ZERO_TO_BIN[idx]
    }

    /// Per-position magnitude priors for the 7x7 interior, in transposed
    /// order: a weighted mix of left, above and above-left when all three
    /// exist, the single neighbor otherwise.
    pub fn calc_coefficient_context_7x7_aavg_block(&self, neighbors: &NeighborData) -> [u16; 64] {
        let mut best_prior = [0u16; 64];

        if self.all_present {
            for col in 1..8 {
                for row in 0..8 {
                    let idx = col * 8 + row;
                    let left = u32::from(neighbors.left.raw_data[idx].unsigned_abs());
                    let above = u32::from(neighbors.above.raw_data[idx].unsigned_abs());
                    let above_left = u32::from(neighbors.above_left.raw_data[idx].unsigned_abs());
                    best_prior[idx] = (((left + above) * 13 + above_left * 6) >> 5) as u16;
                }
            }
        } else if self.left_present {
            for col in 1..8 {
                for row in 0..8 {
                    let idx = col * 8 + row;
                    best_prior[idx] = neighbors.left.raw_data[idx].unsigned_abs();
                }
            }
        } else if self.above_present {
            for col in 1..8 {
                for row in 0..8 {
                    let idx = col * 8 + row;
                    best_prior[idx] = neighbors.above.raw_data[idx].unsigned_abs();
                }
            }
        }

        best_prior
    }

    /// Edge predictors for the current block: the neighbors' stored edge
    /// coefficients minus this block's own interior contributions.
    pub fn predict_current_edges(
        &self,
        neighbors: &NeighborData,
        raster: &[[i32; 8]; 8],
    ) -> ([i32; 8], [i32; 8]) {
        let mut horiz_pred = neighbors.neighbor_context_above.edge_coefs_h;
        let mut vert_pred = neighbors.neighbor_context_left.edge_coefs_v;

        for col in 1..8 {
            let icos = ICOS_BASED_8192_SCALED[col];
            let mut horiz_sum = 0i32;
            for row in 0..8 {
                vert_pred[row] =
                    vert_pred[row].wrapping_sub(raster[col][row].wrapping_mul(icos));
                horiz_sum = horiz_sum
                    .wrapping_add(raster[col][row].wrapping_mul(ICOS_BASED_8192_SCALED[row]));
            }
            horiz_pred[col] = horiz_pred[col].wrapping_sub(horiz_sum);
        }

        (horiz_pred, vert_pred)
    }

    /// Edge predictors this block exports to its right and lower neighbors:
    /// a signed cosine accumulation over the dequantized raster.
    pub fn predict_next_edges(&self, raster: &[[i32; 8]; 8]) -> ([i32; 8], [i32; 8]) {
        let mut horiz_pred = [0i32; 8];
        let mut vert_pred = [0i32; 8];

        for row in 0..8 {
            vert_pred[row] = ICOS_BASED_8192_SCALED_PM[0].wrapping_mul(raster[0][row]);
        }

        for col in 1..8 {
            let icos_pm = ICOS_BASED_8192_SCALED_PM[col];
            let mut horiz_sum = 0i32;
            for row in 0..8 {
                horiz_sum = horiz_sum
                    .wrapping_add(ICOS_BASED_8192_SCALED_PM[row].wrapping_mul(raster[col][row]));
                vert_pred[row] = vert_pred[row].wrapping_add(icos_pm.wrapping_mul(raster[col][row]));
            }
            horiz_pred[col] = horiz_sum;
        }

        (horiz_pred, vert_pred)
    }

    /// Scalar prior for one edge coefficient: the predictor divided by the
    /// quantizer in 13-bit fixed point. A zero quantizer here is a typed
    /// error rather than a division fault.
    pub fn calc_coefficient_context_8_lak(
        &self,
        qt: &QuantizationTables,
        coefficient_tr: usize,
        pred: &[i32; 8],
        horizontal: bool,
    ) -> Result<i32> {
        if !self.all_present
            && ((horizontal && !self.above_present) || (!horizontal && !self.left_present))
        {
            return Ok(0);
        }

        let idx = if horizontal {
            coefficient_tr >> 3
        } else {
            coefficient_tr
        };

        let best_prior = pred[idx];
        let div = i32::from(qt.get_q(coefficient_tr)) << 13;

        if div == 0 {
            return Err(Error::UnsupportedJpegWithZeroIdct0);
        }

        Ok(best_prior / div)
    }

    /// IDCT-based DC prediction: reconstruct the block's pixels with DC
    /// forced to zero, extrapolate its border rows/columns, and compare
    /// against the neighbors' stored edge pixels.
    pub fn adv_predict_dc_pix(
        &self,
        raster: &[[i32; 8]; 8],
        q0: i32,
        neighbors: &NeighborData,
        use_16bit_adv_predict: bool,
        use_16bit_dc_estimate: bool,
    ) -> PredictDcResult {
        let pixels_sans_dc = run_idct(raster);

        let v_pred = calc_pred(&pixels_sans_dc[0], &pixels_sans_dc[1], use_16bit_adv_predict);
        let h_pred = calc_pred_column(&pixels_sans_dc, 0, 1, use_16bit_adv_predict);

        let next_edge_pixels_v = calc_pred(&pixels_sans_dc[7], &pixels_sans_dc[6], use_16bit_dc_estimate);
        let next_edge_pixels_h = calc_pred_column(&pixels_sans_dc, 7, 6, use_16bit_dc_estimate);

        let min_dc;
        let max_dc;
        let mut avg_horizontal: i32;
        let mut avg_vertical: i32;

        if self.all_present {
            let mut horiz_diff = [0i16; 8];
            let mut vert_diff = [0i16; 8];
            for i in 0..8 {
                horiz_diff[i] = neighbors
                    .neighbor_context_left
                    .edge_pixels_h[i]
                    .wrapping_sub(h_pred[i]);
                vert_diff[i] = neighbors
                    .neighbor_context_above
                    .edge_pixels_v[i]
                    .wrapping_sub(v_pred[i]);
            }

            min_dc = min8(&horiz_diff).min(min8(&vert_diff));
            max_dc = max8(&horiz_diff).max(max8(&vert_diff));

            avg_horizontal = sum8(&horiz_diff);
            avg_vertical = sum8(&vert_diff);
        } else if self.left_present {
            let mut horiz_diff = [0i16; 8];
            for i in 0..8 {
                horiz_diff[i] = neighbors
                    .neighbor_context_left
                    .edge_pixels_h[i]
                    .wrapping_sub(h_pred[i]);
            }
            min_dc = min8(&horiz_diff);
            max_dc = max8(&horiz_diff);
            avg_horizontal = sum8(&horiz_diff);
            avg_vertical = avg_horizontal;
        } else if self.above_present {
            let mut vert_diff = [0i16; 8];
            for i in 0..8 {
                vert_diff[i] = neighbors
                    .neighbor_context_above
                    .edge_pixels_v[i]
                    .wrapping_sub(v_pred[i]);
            }
            min_dc = min8(&vert_diff);
            max_dc = max8(&vert_diff);
            avg_vertical = sum8(&vert_diff);
            avg_horizontal = avg_vertical;
        } else {
            return PredictDcResult {
                predicted_dc: 0,
                uncertainty: 0,
                uncertainty2: 0,
                next_edge_pixels_h,
                next_edge_pixels_v,
            };
        }

        let avgmed = (avg_vertical + avg_horizontal) >> 1;
        let uncertainty = ((i32::from(max_dc) - i32::from(min_dc)) >> 3) as i16;
        avg_horizontal -= avgmed;
        avg_vertical -= avgmed;

        let far_afield_value = if avg_horizontal.abs() < avg_vertical.abs() {
            avg_horizontal
        } else {
            avg_vertical
        };

        let uncertainty2 = (far_afield_value >> 3) as i16;

        let predicted_dc = if q0 != 0 { (avgmed / q0 + 4) >> 3 } else { 0 };

        PredictDcResult {
            predicted_dc,
            uncertainty,
            uncertainty2,
            next_edge_pixels_h,
            next_edge_pixels_v,
        }
    }
}

/// Fixed-point 8x8 IDCT (Loeffler style, horizontal pass then vertical),
/// producing 16-bit pixels centered at zero. The input raster is the
/// dequantized block in transposed order; arithmetic wraps like the
/// reference implementation on pathological inputs.
fn run_idct(input: &[[i32; 8]; 8]) -> [[i16; 8]; 8] {
    const W1: i32 = 2841; // 2048*sqrt(2)*cos(1*pi/16)
    const W2: i32 = 2676; // 2048*sqrt(2)*cos(2*pi/16)
    const W3: i32 = 2408; // 2048*sqrt(2)*cos(3*pi/16)
    const W5: i32 = 1609; // 2048*sqrt(2)*cos(5*pi/16)
    const W6: i32 = 1108; // 2048*sqrt(2)*cos(6*pi/16)
    const W7: i32 = 565; // 2048*sqrt(2)*cos(7*pi/16)
    const W1PW7: i32 = W1 + W7;
    const W1MW7: i32 = W1 - W7;
    const W2PW6: i32 = W2 + W6;
    const W2MW6: i32 = W2 - W6;
    const W3PW5: i32 = W3 + W5;
    const W3MW5: i32 = W3 - W5;
    const R2: i32 = 181; // 256/sqrt(2)

    use std::num::Wrapping;
    let w = Wrapping::<i32>;

    let mut intermed = [[Wrapping(0i32); 8]; 8];

    // Horizontal 1-D IDCT
    for y in 0..8 {
        let mut x0 = (w(input[0][y]) << 11) + w(128);
        let mut x1 = w(input[4][y]) << 11;
        let mut x2 = w(input[6][y]);
        let mut x3 = w(input[2][y]);
        let mut x4 = w(input[1][y]);
        let mut x5 = w(input[7][y]);
        let mut x6 = w(input[5][y]);
        let mut x7 = w(input[3][y]);

        // Stage 1
        let mut x8 = w(W7) * (x4 + x5);
        x4 = x8 + w(W1MW7) * x4;
        x5 = x8 - w(W1PW7) * x5;
        x8 = w(W3) * (x6 + x7);
        x6 = x8 - w(W3MW5) * x6;
        x7 = x8 - w(W3PW5) * x7;

        // Stage 2
        x8 = x0 + x1;
        x0 -= x1;
        x1 = w(W6) * (x3 + x2);
        x2 = x1 - w(W2PW6) * x2;
        x3 = x1 + w(W2MW6) * x3;
        x1 = x4 + x6;
        x4 -= x6;
        x6 = x5 + x7;
        x5 -= x7;

        // Stage 3
        x7 = x8 + x3;
        x8 -= x3;
        x3 = x0 + x2;
        x0 -= x2;
        x2 = (w(R2) * (x4 + x5) + w(128)) >> 8;
        x4 = (w(R2) * (x4 - x5) + w(128)) >> 8;

        // Stage 4
        intermed[y][0] = (x7 + x1) >> 8;
        intermed[y][1] = (x3 + x2) >> 8;
        intermed[y][2] = (x0 + x4) >> 8;
        intermed[y][3] = (x8 + x6) >> 8;
        intermed[y][4] = (x8 - x6) >> 8;
        intermed[y][5] = (x0 - x4) >> 8;
        intermed[y][6] = (x3 - x2) >> 8;
        intermed[y][7] = (x7 - x1) >> 8;
    }

    let mut output = [[0i16; 8]; 8];

    // Vertical 1-D IDCT
    for x in 0..8 {
        let mut y0 = (intermed[0][x] << 8) + w(8192);
        let mut y1 = intermed[4][x] << 8;
        let mut y2 = intermed[6][x];
        let mut y3 = intermed[2][x];
        let mut y4 = intermed[1][x];
        let mut y5 = intermed[7][x];
        let mut y6 = intermed[5][x];
        let mut y7 = intermed[3][x];

        // Stage 1
        let mut y8 = w(W7) * (y4 + y5) + w(4);
        y4 = (y8 + w(W1MW7) * y4) >> 3;
        y5 = (y8 - w(W1PW7) * y5) >> 3;
        y8 = w(W3) * (y6 + y7) + w(4);
        y6 = (y8 - w(W3MW5) * y6) >> 3;
        y7 = (y8 - w(W3PW5) * y7) >> 3;

        // Stage 2
        y8 = y0 + y1;
        y0 -= y1;
        y1 = w(W6) * (y3 + y2) + w(4);
        y2 = (y1 - w(W2PW6) * y2) >> 3;
        y3 = (y1 + w(W2MW6) * y3) >> 3;
        y1 = y4 + y6;
        y4 -= y6;
        y6 = y5 + y7;
        y5 -= y7;

        // Stage 3
        y7 = y8 + y3;
        y8 -= y3;
        y3 = y0 + y2;
        y0 -= y2;
        y2 = (w(R2) * (y4 + y5) + w(128)) >> 8;
        y4 = (w(R2) * (y4 - y5) + w(128)) >> 8;

        // Stage 4
        output[0][x] = (((y7 + y1) >> 11).0) as i16;
        output[1][x] = (((y3 + y2) >> 11).0) as i16;
        output[2][x] = (((y0 + y4) >> 11).0) as i16;
        output[3][x] = (((y8 + y6) >> 11).0) as i16;
        output[4][x] = (((y8 - y6) >> 11).0) as i16;
        output[5][x] = (((y0 - y4) >> 11).0) as i16;
        output[6][x] = (((y3 - y2) >> 11).0) as i16;
        output[7][x] = (((y7 - y1) >> 11).0) as i16;
    }

    output
}

/// Linear edge extrapolation `a1 + (a1 - a2) / 2` with the division rounding
/// toward zero. The 16-bit variant reproduces the narrower arithmetic of
/// older encoders bit for bit.
fn calc_pred(a1: &[i16; 8], a2: &[i16; 8], use_16bit: bool) -> [i16; 8] {
    let mut result = [0i16; 8];
    for i in 0..8 {
        if use_16bit {
            let pixel_delta = a1[i].wrapping_sub(a2[i]);
            let half_delta = pixel_delta.wrapping_sub(pixel_delta >> 15) >> 1;
            result[i] = a1[i].wrapping_add(half_delta);
        } else {
            let pixel_delta = i32::from(a1[i]) - i32::from(a2[i]);
            let half_delta = (pixel_delta - (pixel_delta >> 31)) >> 1;
            result[i] = (i32::from(a1[i]) + half_delta) as i16;
        }
    }
    result
}

fn calc_pred_column(pixels: &[[i16; 8]; 8], col1: usize, col2: usize, use_16bit: bool) -> [i16; 8] {
    let mut a1 = [0i16; 8];
    let mut a2 = [0i16; 8];
    for row in 0..8 {
        a1[row] = pixels[row][col1];
        a2[row] = pixels[row][col2];
    }
    calc_pred(&a1, &a2, use_16bit)
}

fn min8(s: &[i16; 8]) -> i16 {
    *s.iter().min().unwrap()
}

fn max8(s: &[i16; 8]) -> i16 {
    *s.iter().max().unwrap()
}

fn sum8(s: &[i16; 8]) -> i32 {
    s.iter().map(|&v| i32::from(v)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idct_of_dc_only_block_is_constant() {
        let mut raster = [[0i32; 8]; 8];
        raster[0][0] = 160; // DC * q0
        let pixels = run_idct(&raster);

        let expected = pixels[0][0];
        for row in &pixels {
            for &p in row {
                assert_eq!(p, expected);
            }
        }
        assert_ne!(expected, 0);
    }

    #[test]
    fn idct_of_zero_block_is_zero() {
        let raster = [[0i32; 8]; 8];
        let pixels = run_idct(&raster);
        for row in &pixels {
            for &p in row {
                assert_eq!(p, 0);
            }
        }
    }

    #[test]
    fn calc_pred_rounds_toward_zero() {
        let a1 = [1, -1, 5, -5, 0, 0, 0, 0];
        let a2 = [0, 0, 0, 0, 0, 0, 0, 0];
        let wide = calc_pred(&a1, &a2, false);
        assert_eq!(&wide[..4], &[1, -1, 7, -7]);
        let narrow = calc_pred(&a1, &a2, true);
        assert_eq!(&narrow[..4], &[1, -1, 7, -7]);
    }

    #[test]
    fn lak_context_requires_nonzero_quantizer() {
        let mut table = [1u16; 64];
        table[0] = 1;
        // Zero out the transposed position for the first horizontal edge
        // coefficient (raster (0,1) -> transposed 8 -> zigzag index 1).
        table[1] = 0;
        let qt = QuantizationTables::new(&table);

        let pred = [8192i32; 8];
        let r = ALL_NEIGHBORS.calc_coefficient_context_8_lak(&qt, 8, &pred, true);
        assert!(matches!(r, Err(Error::UnsupportedJpegWithZeroIdct0)));

        let r = ALL_NEIGHBORS
            .calc_coefficient_context_8_lak(&qt, 16, &pred, true)
            .unwrap();
        assert_eq!(r, 8192 / (1 << 13));
    }

    #[test]
    fn absent_neighbors_give_zero_context() {
        let qt = QuantizationTables::new(&[1u16; 64]);
        let pred = [12345i32; 8];
        assert_eq!(
            NO_NEIGHBORS
                .calc_coefficient_context_8_lak(&qt, 8, &pred, true)
                .unwrap(),
            0
        );
        assert_eq!(
            LEFT_ONLY
                .calc_coefficient_context_8_lak(&qt, 8, &pred, true)
                .unwrap(),
            0
        );
    }
}
