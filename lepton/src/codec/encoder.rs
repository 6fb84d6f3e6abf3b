// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Drives the model over coefficient rows and emits the VP8 boolean stream.
//! Exact mirror of the decoder's traversal and context computation.

use crate::codec::block_context::{BlockContext, NeighborData};
use crate::codec::color_index;
use crate::codec::decoder::{adv_predict_or_unpredict_dc, non_zeros_to_bin_7x7};
use crate::codec::neighbor_summary::NeighborSummary;
use crate::codec::probability_tables::{
    ProbabilityTables, ALL_NEIGHBORS, LEFT_ONLY, NO_NEIGHBORS, TOP_ONLY,
};
use crate::codec::quantization_tables::QuantizationTables;
use crate::codec::row_spec::RowSpec;
use crate::coder::VpxBoolWriter;
use crate::consts::UNZIGZAG_49_TR;
use crate::error::Result;
use crate::image::{AlignedBlock, BlockBasedImage};
use crate::jpeg::jpeg_header::JpegHeader;
use crate::model::{Model, ModelPerColor};
use crate::util::u16_bit_length;

pub struct LeptonEncoder {
    model: Box<Model>,
    bool_writer: VpxBoolWriter,
    mcuv: u32,
    use_16bit_adv_predict: bool,
    use_16bit_dc_estimate: bool,
}

impl LeptonEncoder {
    pub fn new(header: &JpegHeader) -> Result<Self> {
        Ok(LeptonEncoder {
            model: Model::new(),
            bool_writer: VpxBoolWriter::new()?,
            mcuv: header.mcuv,
            use_16bit_adv_predict: header.use_16bit_adv_predict,
            use_16bit_dc_estimate: header.use_16bit_dc_estimate,
        })
    }

    /// Encodes all rows whose luma coordinate falls in `[min_y, max_y)`.
    pub fn encode_row_range(
        &mut self,
        quantization_tables: &[QuantizationTables],
        image_data: &[BlockBasedImage],
        min_y: u32,
        max_y: u32,
    ) -> Result<()> {
        let num_components = image_data.len();
        let mut is_top_row = vec![true; num_components];

        let mut neighbor_summary_cache: Vec<Vec<NeighborSummary>> = image_data
            .iter()
            .map(|img| vec![NeighborSummary::default(); (img.block_width() * 2) as usize])
            .collect();

        let max_coded_heights: Vec<u32> =
            image_data.iter().map(|img| img.original_height()).collect();

        let mut encode_index = 0u32;
        loop {
            let row_spec =
                RowSpec::from_index(encode_index, image_data, self.mcuv, &max_coded_heights);

            if row_spec.done {
                break;
            }
            if row_spec.skip {
                encode_index += 1;
                continue;
            }
            if row_spec.luma_y < min_y {
                encode_index += 1;
                continue;
            }
            if row_spec.luma_y >= max_y {
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

            self.process_row(
                cmp,
                &quantization_tables[cmp],
                &image_data[cmp],
                &mut neighbor_summary_cache[cmp],
                curr_y,
                left_model,
                middle_model,
            )?;

            encode_index += 1;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_row(
        &mut self,
        cmp: usize,
        qt: &QuantizationTables,
        image_data: &BlockBasedImage,
        neighbor_summary_cache: &mut [NeighborSummary],
        row_y: u32,
        left_model: &ProbabilityTables,
        middle_model: &ProbabilityTables,
    ) -> Result<()> {
        let mut ctx = BlockContext::for_row(row_y, image_data);
        let block_width = image_data.block_width();
        let color_index = color_index(cmp);

        for x in 0..block_width {
            let pt = if x == 0 { left_model } else { middle_model };

            let block = *image_data.get_block(ctx.cur_block_index());
            let neighbors = ctx.get_neighbor_data(image_data, neighbor_summary_cache, pt);

            let ns = self.write_coefficient_block(qt, pt, color_index, &neighbors, &block)?;

            ctx.set_neighbor_summary_here(neighbor_summary_cache, ns);
            ctx.next();
        }

        Ok(())
    }

    /// Encodes one block: the 7x7 interior, then the two edges, then DC.
    fn write_coefficient_block(
        &mut self,
        qt: &QuantizationTables,
        pt: &ProbabilityTables,
        color_index: usize,
        neighbors: &NeighborData,
        block: &AlignedBlock,
    ) -> Result<NeighborSummary> {
        let model_color = &mut self.model.per_color[color_index];

        // Step 1: the 7x7 interior.
        let num_non_zeros_7x7 = block.count_non_zeros_7x7();
        let context_bin = pt.calc_num_non_zeros_7x7_context_bin(neighbors);

        model_color.write_non_zero_7x7_count(&mut self.bool_writer, context_bin, num_non_zeros_7x7)?;

        let mut raster = [[0i32; 8]; 8];

        let mut eob_x = 0u8;
        let mut eob_y = 0u8;
        let mut num_non_zeros_remaining = usize::from(num_non_zeros_7x7);

        if num_non_zeros_remaining > 0 {
            let best_priors = pt.calc_coefficient_context_7x7_aavg_block(neighbors);
            let mut num_non_zeros_bin = non_zeros_to_bin_7x7(num_non_zeros_remaining);

            for zig49 in 0..49 {
                let coord_tr = usize::from(UNZIGZAG_49_TR[zig49]);
                let best_prior_bit_len = u16_bit_length(best_priors[coord_tr]);

                let coef = block.raw_data[coord_tr];

                model_color.write_coef(
                    &mut self.bool_writer,
                    coef,
                    zig49,
                    num_non_zeros_bin,
                    usize::from(best_prior_bit_len),
                )?;

                if coef != 0 {
                    let by = (coord_tr & 7) as u8;
                    let bx = (coord_tr >> 3) as u8;

                    eob_x = eob_x.max(bx);
                    eob_y = eob_y.max(by);

                    raster[coord_tr >> 3][coord_tr & 7] =
                        i32::from(coef) * i32::from(qt.get_q(coord_tr));

                    num_non_zeros_remaining -= 1;
                    if num_non_zeros_remaining == 0 {
                        break;
                    }
                    num_non_zeros_bin = non_zeros_to_bin_7x7(num_non_zeros_remaining);
                }
            }
        }

        // Step 2: the two edges.
        let num_non_zeros_bin = (num_non_zeros_7x7 + 3) / 7;

        let (horiz_pred, vert_pred) = pt.predict_current_edges(neighbors, &raster);

        Self::encode_one_edge(
            model_color,
            &mut self.bool_writer,
            qt,
            pt,
            block,
            &mut raster,
            &horiz_pred,
            true,
            num_non_zeros_bin,
            eob_x,
        )?;
        Self::encode_one_edge(
            model_color,
            &mut self.bool_writer,
            qt,
            pt,
            block,
            &mut raster,
            &vert_pred,
            false,
            num_non_zeros_bin,
            eob_y,
        )?;

        let (next_horiz_pred, next_vert_pred) = pt.predict_next_edges(&raster);

        // Step 3: DC as a residual against the IDCT-based prediction.
        let q0 = i32::from(qt.get_q(0));
        let dc_result = pt.adv_predict_dc_pix(
            &raster,
            q0,
            neighbors,
            self.use_16bit_adv_predict,
            self.use_16bit_dc_estimate,
        );

        let actual_dc = block.get_dc();
        let dc_residual = adv_predict_or_unpredict_dc(actual_dc, false, dc_result.predicted_dc);

        self.model.write_dc(
            &mut self.bool_writer,
            color_index,
            dc_residual as i16,
            dc_result.uncertainty,
            dc_result.uncertainty2,
        )?;

        Ok(NeighborSummary::new(
            dc_result.next_edge_pixels_h,
            dc_result.next_edge_pixels_v,
            i32::from(actual_dc).wrapping_mul(q0),
            num_non_zeros_7x7,
            next_horiz_pred,
            next_vert_pred,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_one_edge(
        model_color: &mut ModelPerColor,
        bool_writer: &mut VpxBoolWriter,
        qt: &QuantizationTables,
        pt: &ProbabilityTables,
        block: &AlignedBlock,
        raster: &mut [[i32; 8]; 8],
        pred: &[i32; 8],
        horizontal: bool,
        num_non_zeros_bin: u8,
        est_eob: u8,
    ) -> Result<()> {
        let mut num_non_zeros_edge = 0u8;
        let (delta, mut zig15_offset) = if horizontal {
            for col in 1..8 {
                if block.raw_data[col * 8] != 0 {
                    num_non_zeros_edge += 1;
                }
            }
            (8usize, 0usize)
        } else {
            for row in 1..8 {
                if block.raw_data[row] != 0 {
                    num_non_zeros_edge += 1;
                }
            }
            (1usize, 7usize)
        };

        model_color.write_non_zero_edge_count(
            bool_writer,
            horizontal,
            est_eob,
            num_non_zeros_bin,
            num_non_zeros_edge,
        )?;

        let mut coord_tr = delta;
        for _lane in 0..7 {
            if num_non_zeros_edge == 0 {
                break;
            }

            let best_prior = pt.calc_coefficient_context_8_lak(qt, coord_tr, pred, horizontal)?;

            let coef = block.raw_data[coord_tr];

            model_color.write_edge_coefficient(
                bool_writer,
                qt,
                coef,
                zig15_offset,
                num_non_zeros_edge,
                best_prior,
            )?;

            if coef != 0 {
                num_non_zeros_edge -= 1;
            }

            // The raster feeds the remaining predictions whether or not the
            // lane was non-zero.
            raster[coord_tr >> 3][coord_tr & 7] = i32::from(coef) * i32::from(qt.get_q(coord_tr));

            coord_tr += delta;
            zig15_offset += 1;
        }

        Ok(())
    }

    /// Flushes the arithmetic coder and hands out the partition's bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        self.bool_writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LeptonDecoder;
    use crate::consts::JpegType;
    use crate::jpeg::jpeg_header::parse_sof;

    fn gray_header(width: u16, height: u16) -> JpegHeader {
        let mut h = JpegHeader::new();
        let sof = [
            8,
            (height >> 8) as u8,
            (height & 0xFF) as u8,
            (width >> 8) as u8,
            (width & 0xFF) as u8,
            1,
            1,
            0x11,
            0,
        ];
        parse_sof(&mut h, &sof, JpegType::Sequential).unwrap();
        h.scan_component_order = vec![0];
        h
    }

    /// The codec roundtrip at the coefficient level: encode a small image,
    /// decode it with a fresh model, compare every coefficient.
    #[test]
    fn block_codec_roundtrip() {
        let header = gray_header(32, 24);
        let ci = header.cmp_info[0];

        let mut image = BlockBasedImage::new(ci.bch, ci.bcv);
        for dpos in 0..ci.bc {
            let mut block = AlignedBlock::default();
            block.set_dc((dpos as i16 % 64) - 32);
            // A few interior and edge coefficients with varying signs.
            block.raw_data[9] = (dpos as i16 % 5) - 2;
            block.raw_data[18] = if dpos % 3 == 0 { 7 } else { 0 };
            block.raw_data[8] = (dpos as i16 % 3) - 1;
            block.raw_data[1] = if dpos % 4 == 0 { -3 } else { 0 };
            image.set_block_by_dpos(dpos, block);
        }

        let qts = vec![QuantizationTables::new(&[3u16; 64])];

        let mut encoder = LeptonEncoder::new(&header).unwrap();
        encoder
            .encode_row_range(&qts, std::slice::from_ref(&image), 0, ci.bcv)
            .unwrap();
        let data = encoder.finish().unwrap();

        let mut decoder = LeptonDecoder::new(&data[..], &header).unwrap();
        let mut decoded = vec![BlockBasedImage::new(ci.bch, ci.bcv)];
        decoder
            .decode_row_range(&mut decoded, &header, 0, ci.bcv, [0; 4], false)
            .unwrap();

        assert_eq!(decoded[0].num_blocks(), ci.bc as usize);
        for dpos in 0..ci.bc {
            assert_eq!(
                decoded[0].get_block(dpos).raw_data,
                image.get_block(dpos).raw_data,
                "block {dpos}"
            );
        }
    }

    /// Chroma components share a model but still roundtrip independently.
    #[test]
    fn multi_component_codec_roundtrip() {
        let mut header = JpegHeader::new();
        let sof = [8, 0, 16, 0, 16, 3, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11, 0];
        parse_sof(&mut header, &sof, JpegType::Sequential).unwrap();
        header.scan_component_order = vec![0, 1, 2];

        let mut images = Vec::new();
        for c in 0..3u32 {
            let ci = header.cmp_info[c as usize];
            let mut image = BlockBasedImage::new(ci.bch, ci.bcv);
            for dpos in 0..ci.bc {
                let mut block = AlignedBlock::default();
                block.set_dc((c as i16) * 100 + dpos as i16);
                block.raw_data[10] = c as i16 - 1;
                image.set_block_by_dpos(dpos, block);
            }
            images.push(image);
        }

        let qts: Vec<QuantizationTables> =
            (0..3).map(|_| QuantizationTables::new(&[2u16; 64])).collect();

        let luma_height = header.cmp_info[0].bcv;
        let mut encoder = LeptonEncoder::new(&header).unwrap();
        encoder.encode_row_range(&qts, &images, 0, luma_height).unwrap();
        let data = encoder.finish().unwrap();

        let mut decoder = LeptonDecoder::new(&data[..], &header).unwrap();
        let mut decoded: Vec<BlockBasedImage> = (0..3)
            .map(|c| {
                let ci = header.cmp_info[c];
                BlockBasedImage::new(ci.bch, ci.bcv)
            })
            .collect();
        decoder
            .decode_row_range(&mut decoded, &header, 0, luma_height, [0; 4], false)
            .unwrap();

        for c in 0..3 {
            let ci = header.cmp_info[c];
            for dpos in 0..ci.bc {
                assert_eq!(
                    decoded[c].get_block(dpos).raw_data,
                    images[c].get_block(dpos).raw_data,
                    "component {c} block {dpos}"
                );
            }
        }
    }
}
