// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The adaptive probability arena: a fixed-shape tree of [`Branch`] cells,
//! one instance per worker, living for a single scan. Roughly half a million
//! cells, so it is allocated directly on the heap.

use std::io::Read;

use default_boxed::DefaultBoxed;

use crate::coder::{Branch, VpxBoolReader, VpxBoolWriter};
use crate::codec::QuantizationTables;
use crate::consts::{MAX_EXPONENT, RESIDUAL_NOISE_FLOOR};
use crate::error::{Error, Result};
use crate::util::{u16_bit_length, u32_bit_length};

const BLOCK_TYPES: usize = 2;
const NUMERIC_LENGTH_MAX: usize = 12;
const COEF_BITS: usize = MAX_EXPONENT - 1;
const NON_ZERO_7X7_COUNT_BITS: usize = 6;
const NON_ZERO_EDGE_COUNT_BITS: usize = 3;
const NUM_NON_ZERO_7X7_BINS: usize = 9;
const NUM_NON_ZERO_EDGE_BINS: usize = 7;
const NUM_NON_ZERO_7X7_CONTEXT_BINS: usize = 9;

const RESIDUAL_THRESHOLD_COUNTS_D1: usize = 1 << (1 + RESIDUAL_NOISE_FLOOR);
const RESIDUAL_THRESHOLD_COUNTS_D2: usize = 1 + RESIDUAL_NOISE_FLOOR as usize - 2;
const RESIDUAL_THRESHOLD_COUNTS_D3: usize = 1 << RESIDUAL_NOISE_FLOOR;

/// Branches for one 7x7 interior coefficient position: unary magnitude
/// conditioned on the prior's bit length, plus low-order noise bits.
#[derive(Clone, Copy)]
pub struct Counts7x7 {
    pub exponent_counts: [[Branch; MAX_EXPONENT]; NUMERIC_LENGTH_MAX],
    pub residual_noise_counts: [Branch; COEF_BITS],
}

impl Default for Counts7x7 {
    fn default() -> Self {
        Counts7x7 {
            exponent_counts: [[Branch::default(); MAX_EXPONENT]; NUMERIC_LENGTH_MAX],
            residual_noise_counts: [Branch::default(); COEF_BITS],
        }
    }
}

/// Branches for one edge coefficient position.
#[derive(Clone, Copy)]
pub struct CountsEdge {
    pub exponent_counts: [[Branch; MAX_EXPONENT]; MAX_EXPONENT],
    pub residual_noise_counts: [Branch; 3],
}

impl Default for CountsEdge {
    fn default() -> Self {
        CountsEdge {
            exponent_counts: [[Branch::default(); MAX_EXPONENT]; MAX_EXPONENT],
            residual_noise_counts: [Branch::default(); 3],
        }
    }
}

/// Branches for the DC residual, binned by the prediction uncertainty.
#[derive(Clone, Copy)]
pub struct CountsDc {
    pub exponent_counts: [[Branch; MAX_EXPONENT]; 17],
    pub residual_noise_counts: [Branch; COEF_BITS],
}

impl Default for CountsDc {
    fn default() -> Self {
        CountsDc {
            exponent_counts: [[Branch::default(); MAX_EXPONENT]; 17],
            residual_noise_counts: [Branch::default(); COEF_BITS],
        }
    }
}

/// All context bins for one statistical color class (luma, or the two
/// chroma components together).
pub struct ModelPerColor {
    pub num_non_zeros_counts_7x7:
        [[Branch; 1 << NON_ZERO_7X7_COUNT_BITS]; NUM_NON_ZERO_7X7_CONTEXT_BINS],
    pub counts: [[Counts7x7; 49]; NUM_NON_ZERO_7X7_BINS],
    pub num_non_zeros_counts_1x8: [[[Branch; 1 << NON_ZERO_EDGE_COUNT_BITS]; 8]; 8],
    pub num_non_zeros_counts_8x1: [[[Branch; 1 << NON_ZERO_EDGE_COUNT_BITS]; 8]; 8],
    pub counts_x: [[CountsEdge; 14]; NUM_NON_ZERO_EDGE_BINS],
    pub residual_threshold_counts: [[[Branch; RESIDUAL_THRESHOLD_COUNTS_D3];
        RESIDUAL_THRESHOLD_COUNTS_D2]; RESIDUAL_THRESHOLD_COUNTS_D1],
    pub sign_counts: [[Branch; NUMERIC_LENGTH_MAX]; 3],
}

impl Default for ModelPerColor {
    fn default() -> Self {
        ModelPerColor {
            num_non_zeros_counts_7x7: [[Branch::default(); 1 << NON_ZERO_7X7_COUNT_BITS];
                NUM_NON_ZERO_7X7_CONTEXT_BINS],
            counts: [[Counts7x7::default(); 49]; NUM_NON_ZERO_7X7_BINS],
            num_non_zeros_counts_1x8: [[[Branch::default(); 1 << NON_ZERO_EDGE_COUNT_BITS]; 8]; 8],
            num_non_zeros_counts_8x1: [[[Branch::default(); 1 << NON_ZERO_EDGE_COUNT_BITS]; 8]; 8],
            counts_x: [[CountsEdge::default(); 14]; NUM_NON_ZERO_EDGE_BINS],
            residual_threshold_counts: [[[Branch::default(); RESIDUAL_THRESHOLD_COUNTS_D3];
                RESIDUAL_THRESHOLD_COUNTS_D2];
                RESIDUAL_THRESHOLD_COUNTS_D1],
            sign_counts: [[Branch::default(); NUMERIC_LENGTH_MAX]; 3],
        }
    }
}

/// The whole per-worker model: one [`ModelPerColor`] for luma, one shared by
/// chroma, and the DC bins common to both.
#[derive(DefaultBoxed)]
pub struct Model {
    pub per_color: [ModelPerColor; BLOCK_TYPES],
    pub counts_dc: [CountsDc; NUMERIC_LENGTH_MAX],
}

impl Model {
    pub fn new() -> Box<Model> {
        Model::default_boxed()
    }

    pub fn per_color_mut(&mut self, color_index: usize) -> &mut ModelPerColor {
        &mut self.per_color[color_index]
    }

    pub fn read_dc<R: Read>(
        &mut self,
        bool_reader: &mut VpxBoolReader<R>,
        color_index: usize,
        uncertainty: i16,
        uncertainty2: i16,
    ) -> Result<i16> {
        let (counts_idx, exp_idx, sign_idx) = Self::dc_context(uncertainty, uncertainty2);
        let counts = &mut self.counts_dc[counts_idx];
        let sign = &mut self.per_color[color_index].sign_counts[0][sign_idx];
        read_length_sign_coef(
            bool_reader,
            &mut counts.exponent_counts[exp_idx],
            sign,
            &mut counts.residual_noise_counts,
        )
    }

    pub fn write_dc(
        &mut self,
        bool_writer: &mut VpxBoolWriter,
        color_index: usize,
        coef: i16,
        uncertainty: i16,
        uncertainty2: i16,
    ) -> Result<()> {
        let (counts_idx, exp_idx, sign_idx) = Self::dc_context(uncertainty, uncertainty2);
        let counts = &mut self.counts_dc[counts_idx];
        let sign = &mut self.per_color[color_index].sign_counts[0][sign_idx];
        write_length_sign_coef(
            bool_writer,
            coef,
            &mut counts.exponent_counts[exp_idx],
            sign,
            &mut counts.residual_noise_counts,
        )
    }

    fn dc_context(uncertainty: i16, uncertainty2: i16) -> (usize, usize, usize) {
        let len_abs_mxm = u16_bit_length(uncertainty.unsigned_abs());
        let len_abs_offset_to_closest_edge = u16_bit_length(uncertainty2.unsigned_abs());
        let counts_idx = usize::from(len_abs_mxm).min(NUMERIC_LENGTH_MAX - 1);
        // +1 separates the DC sign bucket from the interior one at [0][0].
        let sign_idx = calc_sign_index(uncertainty2) + 1;
        (counts_idx, usize::from(len_abs_offset_to_closest_edge), sign_idx)
    }
}

impl ModelPerColor {
    pub fn read_coef<R: Read>(
        &mut self,
        bool_reader: &mut VpxBoolReader<R>,
        zig49: usize,
        num_non_zeros_bin: usize,
        best_prior_bit_len: usize,
    ) -> Result<i16> {
        let counts = &mut self.counts[num_non_zeros_bin][zig49];
        let sign = &mut self.sign_counts[0][0];
        read_length_sign_coef(
            bool_reader,
            &mut counts.exponent_counts[best_prior_bit_len],
            sign,
            &mut counts.residual_noise_counts,
        )
    }

    pub fn write_coef(
        &mut self,
        bool_writer: &mut VpxBoolWriter,
        coef: i16,
        zig49: usize,
        num_non_zeros_bin: usize,
        best_prior_bit_len: usize,
    ) -> Result<()> {
        let counts = &mut self.counts[num_non_zeros_bin][zig49];
        let sign = &mut self.sign_counts[0][0];
        write_length_sign_coef(
            bool_writer,
            coef,
            &mut counts.exponent_counts[best_prior_bit_len],
            sign,
            &mut counts.residual_noise_counts,
        )
    }

    pub fn read_non_zero_7x7_count<R: Read>(
        &mut self,
        bool_reader: &mut VpxBoolReader<R>,
        context_bin: u8,
    ) -> Result<u8> {
        let prob = &mut self.num_non_zeros_counts_7x7[usize::from(context_bin)];
        Ok(bool_reader.get_grid(prob)? as u8)
    }

    pub fn write_non_zero_7x7_count(
        &mut self,
        bool_writer: &mut VpxBoolWriter,
        context_bin: u8,
        num_non_zeros_7x7: u8,
    ) -> Result<()> {
        let prob = &mut self.num_non_zeros_counts_7x7[usize::from(context_bin)];
        bool_writer.put_grid(num_non_zeros_7x7, prob)
    }

    pub fn read_non_zero_edge_count<R: Read>(
        &mut self,
        bool_reader: &mut VpxBoolReader<R>,
        horizontal: bool,
        est_eob: u8,
        num_non_zeros_bin: u8,
    ) -> Result<u8> {
        let prob = self.non_zero_counts_edge(horizontal, est_eob, num_non_zeros_bin);
        Ok(bool_reader.get_grid(prob)? as u8)
    }

    pub fn write_non_zero_edge_count(
        &mut self,
        bool_writer: &mut VpxBoolWriter,
        horizontal: bool,
        est_eob: u8,
        num_non_zeros_bin: u8,
        num_non_zeros_edge: u8,
    ) -> Result<()> {
        let prob = self.non_zero_counts_edge(horizontal, est_eob, num_non_zeros_bin);
        bool_writer.put_grid(num_non_zeros_edge, prob)
    }

    fn non_zero_counts_edge(
        &mut self,
        horizontal: bool,
        est_eob: u8,
        num_non_zeros_bin: u8,
    ) -> &mut [Branch] {
        if horizontal {
            &mut self.num_non_zeros_counts_8x1[usize::from(est_eob)][usize::from(num_non_zeros_bin)]
        } else {
            &mut self.num_non_zeros_counts_1x8[usize::from(est_eob)][usize::from(num_non_zeros_bin)]
        }
    }

    /// Reads one edge coefficient: unary magnitude, sign conditioned on the
    /// prior, then high bits via the threshold tree and low bits as noise.
    pub fn read_edge_coefficient<R: Read>(
        &mut self,
        bool_reader: &mut VpxBoolReader<R>,
        qt: &QuantizationTables,
        zig15_offset: usize,
        num_non_zeros_edge: u8,
        best_prior: i32,
    ) -> Result<i16> {
        let num_non_zeros_edge_bin = usize::from(num_non_zeros_edge) - 1;

        // The prior prediction can be wonky, so its bit length is capped.
        let best_prior_abs = best_prior.unsigned_abs();
        let best_prior_bit_len = (MAX_EXPONENT - 1).min(usize::from(u32_bit_length(best_prior_abs)));

        let length = {
            let length_branches = &mut self.counts_x[num_non_zeros_edge_bin][zig15_offset]
                .exponent_counts[best_prior_bit_len];
            bool_reader.get_unary_encoded(length_branches)?
        };

        let mut coef = 0i16;
        if length != 0 {
            // The sign context is taken from the truncated 16-bit prior.
            let neg = {
                let sign =
                    &mut self.sign_counts[calc_sign_index(best_prior as i16)][best_prior_bit_len];
                !bool_reader.get_bit(sign)?
            };

            coef = 1;

            if length > 1 {
                let min_threshold = usize::from(qt.get_min_noise_threshold(zig15_offset));
                let mut i = length as isize - 2;

                if i >= min_threshold as isize {
                    let thresh_prob =
                        Self::residual_threshold_counts_mut(&mut self.residual_threshold_counts, best_prior_abs, min_threshold, length);

                    let mut decoded_so_far = 1usize;
                    while i >= min_threshold as isize {
                        let cur_bit = bool_reader.get_bit(&mut thresh_prob[decoded_so_far])?;

                        coef <<= 1;
                        if cur_bit {
                            coef |= 1;
                        }

                        // Out-of-range magnitudes are not rejected here, they
                        // just share the last probability bucket.
                        decoded_so_far = (coef as usize).min(thresh_prob.len() - 1);
                        i -= 1;
                    }
                }

                if i >= 0 {
                    let res_prob = &mut self.counts_x[num_non_zeros_edge_bin][zig15_offset]
                        .residual_noise_counts;
                    let bits = bool_reader.get_n_bits(i as usize + 1, res_prob)?;
                    coef <<= i + 1;
                    coef |= bits as i16;
                }
            }

            if neg {
                coef = -coef;
            }
        }

        Ok(coef)
    }

    pub fn write_edge_coefficient(
        &mut self,
        bool_writer: &mut VpxBoolWriter,
        qt: &QuantizationTables,
        coef: i16,
        zig15_offset: usize,
        num_non_zeros_edge: u8,
        best_prior: i32,
    ) -> Result<()> {
        let num_non_zeros_edge_bin = usize::from(num_non_zeros_edge) - 1;

        let best_prior_abs = best_prior.unsigned_abs();
        let best_prior_bit_len = (MAX_EXPONENT - 1).min(usize::from(u32_bit_length(best_prior_abs)));

        let abs_coef = coef.unsigned_abs();
        let length = usize::from(u16_bit_length(abs_coef));

        if length > MAX_EXPONENT {
            return Err(Error::CoefficientOutOfRange);
        }

        {
            let length_branches = &mut self.counts_x[num_non_zeros_edge_bin][zig15_offset]
                .exponent_counts[best_prior_bit_len];
            bool_writer.put_unary_encoded(length, length_branches)?;
        }

        if coef != 0 {
            {
                let sign =
                    &mut self.sign_counts[calc_sign_index(best_prior as i16)][best_prior_bit_len];
                bool_writer.put_bit(coef >= 0, sign)?;
            }

            if length > 1 {
                let min_threshold = usize::from(qt.get_min_noise_threshold(zig15_offset));
                let mut i = length as isize - 2;

                if i >= min_threshold as isize {
                    let thresh_prob =
                        Self::residual_threshold_counts_mut(&mut self.residual_threshold_counts, best_prior_abs, min_threshold, length);

                    let mut encoded_so_far = 1usize;
                    while i >= min_threshold as isize {
                        let cur_bit = abs_coef & (1 << i) != 0;
                        bool_writer.put_bit(cur_bit, &mut thresh_prob[encoded_so_far])?;

                        encoded_so_far = (encoded_so_far << 1) | usize::from(cur_bit);

                        // Mirror the decoder's bucket sharing for magnitudes
                        // past the expected range.
                        encoded_so_far = encoded_so_far.min(thresh_prob.len() - 1);
                        i -= 1;
                    }
                }

                if i >= 0 {
                    let res_prob = &mut self.counts_x[num_non_zeros_edge_bin][zig15_offset]
                        .residual_noise_counts;
                    bool_writer.put_n_bits(usize::from(abs_coef), i as usize + 1, res_prob)?;
                }
            }
        }

        Ok(())
    }

    fn residual_threshold_counts_mut<'a>(
        residual_threshold_counts: &'a mut [[[Branch; RESIDUAL_THRESHOLD_COUNTS_D3];
            RESIDUAL_THRESHOLD_COUNTS_D2]; RESIDUAL_THRESHOLD_COUNTS_D1],
        best_prior_abs: u32,
        min_threshold: usize,
        length: usize,
    ) -> &'a mut [Branch] {
        let idx1 = (((best_prior_abs & 0xFFFF) as usize) >> min_threshold)
            .min(RESIDUAL_THRESHOLD_COUNTS_D1 - 1);
        let idx2 = (length - min_threshold - 2).min(RESIDUAL_THRESHOLD_COUNTS_D2 - 1);
        &mut residual_threshold_counts[idx1][idx2]
    }
}

pub fn calc_sign_index(val: i16) -> usize {
    if val == 0 {
        0
    } else if val > 0 {
        1
    } else {
        2
    }
}

/// Unary magnitude, then sign, then `length - 1` low bits.
fn read_length_sign_coef<R: Read>(
    bool_reader: &mut VpxBoolReader<R>,
    magnitude_branches: &mut [Branch],
    sign_branch: &mut Branch,
    bits_branch: &mut [Branch],
) -> Result<i16> {
    let length = bool_reader.get_unary_encoded(magnitude_branches)?;

    let mut coef = 0i16;
    if length != 0 {
        let neg = !bool_reader.get_bit(sign_branch)?;

        if length > 1 {
            let bits = bool_reader.get_n_bits(length - 1, bits_branch)?;
            coef = bits as i16;
        }

        coef |= 1 << (length - 1);

        if neg {
            coef = -coef;
        }
    }

    Ok(coef)
}

fn write_length_sign_coef(
    bool_writer: &mut VpxBoolWriter,
    coef: i16,
    magnitude_branches: &mut [Branch],
    sign_branch: &mut Branch,
    bits_branch: &mut [Branch],
) -> Result<()> {
    let abs_coef = coef.unsigned_abs();
    let coef_bit_len = usize::from(u16_bit_length(abs_coef));

    if coef_bit_len > magnitude_branches.len() {
        return Err(Error::CoefficientOutOfRange);
    }

    bool_writer.put_unary_encoded(coef_bit_len, magnitude_branches)?;

    if coef != 0 {
        bool_writer.put_bit(coef > 0, sign_branch)?;
    }

    if coef_bit_len > 1 {
        bool_writer.put_n_bits(usize::from(abs_coef), coef_bit_len - 1, bits_branch)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_allocates_with_default_branches() {
        let model = Model::new();
        assert_eq!(model.per_color[0].sign_counts[0][0].counts(), 0x0101);
        assert_eq!(
            model.per_color[1].residual_threshold_counts[255][5][127].counts(),
            0x0101
        );
        assert_eq!(model.counts_dc[11].exponent_counts[16][10].counts(), 0x0101);
    }

    #[test]
    fn coef_roundtrip_through_model() {
        let mut writer = VpxBoolWriter::new().unwrap();
        let mut enc_model = Model::new();
        let values = [0i16, 1, -1, 5, -37, 511, -1000];
        for (i, &v) in values.iter().enumerate() {
            enc_model
                .per_color_mut(0)
                .write_coef(&mut writer, v, i, 3, 4)
                .unwrap();
        }
        let data = writer.finish().unwrap();

        let mut reader = VpxBoolReader::new(&data[..]).unwrap();
        let mut dec_model = Model::new();
        for (i, &v) in values.iter().enumerate() {
            let got = dec_model
                .per_color_mut(0)
                .read_coef(&mut reader, i, 3, 4)
                .unwrap();
            assert_eq!(got, v);
        }
    }

    #[test]
    fn dc_roundtrip_through_model() {
        let mut writer = VpxBoolWriter::new().unwrap();
        let mut enc_model = Model::new();
        let cases = [(0i16, 0i16, 0i16), (12, 5, -3), (-700, 100, 20), (1023, -2, 2)];
        for &(coef, u1, u2) in &cases {
            enc_model.write_dc(&mut writer, 1, coef, u1, u2).unwrap();
        }
        let data = writer.finish().unwrap();

        let mut reader = VpxBoolReader::new(&data[..]).unwrap();
        let mut dec_model = Model::new();
        for &(coef, u1, u2) in &cases {
            assert_eq!(dec_model.read_dc(&mut reader, 1, u1, u2).unwrap(), coef);
        }
    }

    #[test]
    fn edge_coefficient_roundtrip() {
        let qt = QuantizationTables::new(&[2u16; 64]);
        let mut writer = VpxBoolWriter::new().unwrap();
        let mut enc_model = Model::new();
        let values = [1i16, -1, 3, 250, -800];
        for &v in &values {
            enc_model
                .per_color_mut(0)
                .write_edge_coefficient(&mut writer, &qt, v, 2, 3, -42)
                .unwrap();
        }
        let data = writer.finish().unwrap();

        let mut reader = VpxBoolReader::new(&data[..]).unwrap();
        let mut dec_model = Model::new();
        for &v in &values {
            let got = dec_model
                .per_color_mut(0)
                .read_edge_coefficient(&mut reader, &qt, 2, 3, -42)
                .unwrap();
            assert_eq!(got, v);
        }
    }

    #[test]
    fn oversized_coefficient_is_rejected() {
        let mut writer = VpxBoolWriter::new().unwrap();
        let mut model = Model::new();
        let r = model.per_color_mut(0).write_coef(&mut writer, 0x7FFF, 0, 0, 0);
        assert!(matches!(r, Err(Error::CoefficientOutOfRange)));
    }
}
