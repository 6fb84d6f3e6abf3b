// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Decodes the VP8 boolean stream back into coefficient blocks, walking
//! rows in the same interleaved order and rebuilding the same neighbor
//! context the encoder used.

use std::io::Read;

use crate::codec::block_context::{BlockContext, NeighborData};
use crate::codec::neighbor_summary::NeighborSummary;
use crate::codec::probability_tables::{
    ProbabilityTables, ALL_NEIGHBORS, LEFT_ONLY, NO_NEIGHBORS, TOP_ONLY,
};
use crate::codec::quantization_tables::QuantizationTables;
use crate::codec::row_spec::RowSpec;
use crate::codec::color_index;
use crate::coder::VpxBoolReader;
use crate::consts::{MAX_COMPONENTS, MAX_EXPONENT, NON_ZERO_TO_BIN_7X7, UNZIGZAG_49_TR};
use crate::error::{Error, Result};
use crate::image::{AlignedBlock, BlockBasedImage};
use crate::jpeg::jpeg_header::JpegHeader;
use crate::jpeg::truncate::TruncateComponents;
use crate::model::{Model, ModelPerColor};
use crate::util::u16_bit_length;

pub struct LeptonDecoder<R> {
    model: Box<Model>,
    bool_reader: VpxBoolReader<R>,
    qt: Vec<QuantizationTables>,
    mcuv: u32,
    use_16bit_adv_predict: bool,
    use_16bit_dc_estimate: bool,
}

impl<R: Read> LeptonDecoder<R> {
    pub fn new(reader: R, header: &JpegHeader) -> Result<Self> {
        let bool_reader = VpxBoolReader::new(reader)?;

        let qt = (0..header.cmpc)
            .map(|i| {
                let qt_idx = usize::from(header.cmp_info[i].q_table_index);
                QuantizationTables::new(&header.q_tables[qt_idx])
            })
            .collect();

        Ok(LeptonDecoder {
            model: Model::new(),
            bool_reader,
            qt,
            mcuv: header.mcuv,
            use_16bit_adv_predict: header.use_16bit_adv_predict,
            use_16bit_dc_estimate: header.use_16bit_dc_estimate,
        })
    }

    /// Decodes all rows whose luma coordinate falls in
    /// `[luma_y_start, luma_y_end)`, appending blocks to `images`.
    pub fn decode_row_range(
        &mut self,
        images: &mut [BlockBasedImage],
        header: &JpegHeader,
        luma_y_start: u32,
        luma_y_end: u32,
        max_dpos: [u32; MAX_COMPONENTS],
        early_eof: bool,
    ) -> Result<()> {
        let mut tc = TruncateComponents::new();
        tc.init(header);

        if early_eof {
            tc.set_truncation_bounds(header, max_dpos);
        }

        let max_coded_heights = tc.get_max_coded_heights();
        let component_sizes_in_blocks = tc.get_component_sizes_in_blocks();

        // Two cached rows of neighbor summaries per component.
        let mut neighbor_summary_cache: Vec<Vec<NeighborSummary>> = images
            .iter()
            .map(|img| vec![NeighborSummary::default(); (img.block_width() * 2) as usize])
            .collect();
        let mut is_top_row = vec![true; images.len()];

        let mut decode_index = 0u32;

        loop {
            let row_spec = RowSpec::from_index(decode_index, images, self.mcuv, &max_coded_heights);

            if row_spec.done {
                break;
            }
            if row_spec.skip {
                decode_index += 1;
                continue;
            }
            if row_spec.luma_y < luma_y_start {
                decode_index += 1;
                continue;
            }
            if row_spec.luma_y >= luma_y_end {
                break;
            }

            let cmp = row_spec.component;
            let curr_y = row_spec.curr_y;

            let (left_model, middle_model): (&ProbabilityTables, &ProbabilityTables) =
                if is_top_row[cmp] {
                    is_top_row[cmp] = false;
                    (&NO_NEIGHBORS, &LEFT_ONLY)
                } else {
                    (&TOP_ONLY, &ALL_NEIGHBORS)
                };

            self.decode_row(
                &mut images[cmp],
                &mut neighbor_summary_cache[cmp],
                curr_y,
                cmp,
                left_model,
                middle_model,
                component_sizes_in_blocks[cmp],
            )?;

            decode_index += 1;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_row(
        &mut self,
        image: &mut BlockBasedImage,
        neighbor_summary_cache: &mut [NeighborSummary],
        curr_y: u32,
        component_idx: usize,
        left_model: &ProbabilityTables,
        middle_model: &ProbabilityTables,
        component_size_in_blocks: u32,
    ) -> Result<()> {
        let block_width = image.block_width();
        let color_index = color_index(component_idx);

        let mut ctx = BlockContext::for_row(curr_y, image);

        for block_x in 0..block_width {
            let pt = if block_x > 0 { middle_model } else { left_model };

            let neighbors = ctx.get_neighbor_data(image, neighbor_summary_cache, pt);

            let (block, ns) = self.decode_block(component_idx, color_index, pt, &neighbors)?;

            image.append_block(block);
            ctx.set_neighbor_summary_here(neighbor_summary_cache, ns);

            let offset = ctx.next();

            if offset >= component_size_in_blocks {
                // Truncated image; the remaining blocks of this row were
                // never coded.
                return Ok(());
            }
        }

        Ok(())
    }

    /// Decodes one block: the 7x7 interior, then the two edges, then DC.
    fn decode_block(
        &mut self,
        component_idx: usize,
        color_index: usize,
        pt: &ProbabilityTables,
        neighbors: &NeighborData,
    ) -> Result<(AlignedBlock, NeighborSummary)> {
        let mut block = AlignedBlock::default();
        let qt = &self.qt[component_idx];
        let model_color = &mut self.model.per_color[color_index];

        // Step 1: the 7x7 interior.
        let context_bin = pt.calc_num_non_zeros_7x7_context_bin(neighbors);

        let num_non_zeros_7x7 =
            model_color.read_non_zero_7x7_count(&mut self.bool_reader, context_bin)?;

        if num_non_zeros_7x7 > 49 {
            return Err(Error::StreamInconsistent("num_non_zeros_7x7 > 49"));
        }

        // Dequantized raster (transposed order) feeding the predictions.
        let mut raster = [[0i32; 8]; 8];

        let mut eob_x = 0u8;
        let mut eob_y = 0u8;

        let mut num_non_zeros_remaining = usize::from(num_non_zeros_7x7);

        if num_non_zeros_remaining > 0 {
            let best_priors = pt.calc_coefficient_context_7x7_aavg_block(neighbors);
            let mut num_non_zeros_bin = non_zeros_to_bin_7x7(num_non_zeros_remaining);

            for zig49 in 0..49 {
                if num_non_zeros_remaining == 0 {
                    break;
                }

                let coord_tr = usize::from(UNZIGZAG_49_TR[zig49]);
                let best_prior_bit_len = u16_bit_length(best_priors[coord_tr]);

                let coef = model_color.read_coef(
                    &mut self.bool_reader,
                    zig49,
                    num_non_zeros_bin,
                    usize::from(best_prior_bit_len),
                )?;

                if coef != 0 {
                    let by = (coord_tr & 7) as u8;
                    let bx = (coord_tr >> 3) as u8;

                    eob_x = eob_x.max(bx);
                    eob_y = eob_y.max(by);

                    block.raw_data[coord_tr] = coef;
                    raster[coord_tr >> 3][coord_tr & 7] =
                        i32::from(coef) * i32::from(qt.get_q(coord_tr));

                    num_non_zeros_remaining -= 1;
                    if num_non_zeros_remaining > 0 {
                        num_non_zeros_bin = non_zeros_to_bin_7x7(num_non_zeros_remaining);
                    }
                }
            }
        }

        if num_non_zeros_remaining > 0 {
            return Err(Error::StreamInconsistent("not enough nonzeros in 7x7 block"));
        }

        // Step 2: the two edges.
        let num_non_zeros_bin = (num_non_zeros_7x7 + 3) / 7;

        let (horiz_pred, vert_pred) = pt.predict_current_edges(neighbors, &raster);

        Self::decode_one_edge(
            model_color,
            &mut self.bool_reader,
            qt,
            pt,
            &mut block,
            &mut raster,
            &horiz_pred,
            true,
            num_non_zeros_bin,
            eob_x,
        )?;
        Self::decode_one_edge(
            model_color,
            &mut self.bool_reader,
            qt,
            pt,
            &mut block,
            &mut raster,
            &vert_pred,
            false,
            num_non_zeros_bin,
            eob_y,
        )?;

        let (next_horiz_pred, next_vert_pred) = pt.predict_next_edges(&raster);

        // Step 3: DC, predicted from the IDCT of the DC-less block.
        let q0 = i32::from(qt.get_q(0));
        let dc_result = pt.adv_predict_dc_pix(
            &raster,
            q0,
            neighbors,
            self.use_16bit_adv_predict,
            self.use_16bit_dc_estimate,
        );

        let dc_diff = self.model.read_dc(
            &mut self.bool_reader,
            color_index,
            dc_result.uncertainty,
            dc_result.uncertainty2,
        )?;

        let final_dc = adv_predict_or_unpredict_dc(dc_diff, true, dc_result.predicted_dc);
        block.set_dc(final_dc as i16);

        let ns = NeighborSummary::new(
            dc_result.next_edge_pixels_h,
            dc_result.next_edge_pixels_v,
            i32::from(block.get_dc()).wrapping_mul(q0),
            num_non_zeros_7x7,
            next_horiz_pred,
            next_vert_pred,
        );

        Ok((block, ns))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_one_edge(
        model_color: &mut ModelPerColor,
        bool_reader: &mut VpxBoolReader<R>,
        qt: &QuantizationTables,
        pt: &ProbabilityTables,
        block: &mut AlignedBlock,
        raster: &mut [[i32; 8]; 8],
        pred: &[i32; 8],
        horizontal: bool,
        num_non_zeros_bin: u8,
        est_eob: u8,
    ) -> Result<()> {
        let mut num_non_zeros_edge =
            model_color.read_non_zero_edge_count(bool_reader, horizontal, est_eob, num_non_zeros_bin)?;

        let (delta, mut zig15_offset) = if horizontal { (8usize, 0usize) } else { (1usize, 7usize) };

        let mut coord_tr = delta;

        for _lane in 0..7 {
            if num_non_zeros_edge == 0 {
                break;
            }

            let best_prior = pt.calc_coefficient_context_8_lak(qt, coord_tr, pred, horizontal)?;

            let coef = model_color.read_edge_coefficient(
                bool_reader,
                qt,
                zig15_offset,
                num_non_zeros_edge,
                best_prior,
            )?;

            if coef != 0 {
                num_non_zeros_edge -= 1;
                block.raw_data[coord_tr] = coef;
                raster[coord_tr >> 3][coord_tr & 7] =
                    i32::from(coef) * i32::from(qt.get_q(coord_tr));
            }

            coord_tr += delta;
            zig15_offset += 1;
        }

        if num_non_zeros_edge != 0 {
            return Err(Error::StreamInconsistent("edge decode incomplete"));
        }

        Ok(())
    }
}

pub(crate) fn non_zeros_to_bin_7x7(num_non_zeros: usize) -> usize {
    let idx = num_non_zeros.min(NON_ZERO_TO_BIN_7X7.len() - 1);
    usize::from(NON_ZERO_TO_BIN_7X7[idx])
}

/// Applies (or removes) the DC prediction and wraps the result back into
/// the valid coefficient range.
pub(crate) fn adv_predict_or_unpredict_dc(
    saved_dc: i16,
    recover_original: bool,
    predicted_val: i32,
) -> i32 {
    let max_value = 1i32 << (MAX_EXPONENT - 1);
    let min_value = -max_value;
    let adjustment_factor = 2 * max_value + 1;

    let mut retval = if recover_original {
        i32::from(saved_dc) + predicted_val
    } else {
        i32::from(saved_dc) - predicted_val
    };

    if retval < min_value {
        retval += adjustment_factor;
    }
    if retval > max_value {
        retval -= adjustment_factor;
    }

    retval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_prediction_wraps_into_range() {
        assert_eq!(adv_predict_or_unpredict_dc(0, true, 0), 0);
        assert_eq!(adv_predict_or_unpredict_dc(100, true, 50), 150);
        // Wrap-around at both ends of the 11-bit range.
        assert_eq!(adv_predict_or_unpredict_dc(1000, true, 1000), 2000 - 2049);
        assert_eq!(adv_predict_or_unpredict_dc(-1000, true, -1000), -2000 + 2049);
        // Unpredict is the inverse modulo the wrap.
        let coef = 900i32;
        let predicted = 800i32;
        let saved = adv_predict_or_unpredict_dc(coef as i16, false, predicted);
        assert_eq!(adv_predict_or_unpredict_dc(saved as i16, true, predicted), coef);
    }

    #[test]
    fn non_zero_bins_saturate() {
        assert_eq!(non_zeros_to_bin_7x7(0), 0);
        assert_eq!(non_zeros_to_bin_7x7(1), 0);
        assert_eq!(non_zeros_to_bin_7x7(2), 1);
        assert_eq!(non_zeros_to_bin_7x7(49), 8);
        assert_eq!(non_zeros_to_bin_7x7(60), 8);
    }
}
