// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::image::BlockBasedImage;

/// Which component row a given iteration index lands on. Rows are walked in
/// interleaved MCU-row order, with the last component's rows first within
/// each MCU row, which keeps luma and chroma aligned under 2:1 subsampling.
pub struct RowSpec {
    pub luma_y: u32,
    pub component: usize,
    pub curr_y: u32,
    pub mcu_row_index: u32,
    pub last_row_to_complete_mcu: bool,
    pub skip: bool,
    pub done: bool,
}

impl RowSpec {
    pub fn from_index(
        decode_index: u32,
        image_data: &[BlockBasedImage],
        mcuv: u32,
        max_coded_heights: &[u32],
    ) -> RowSpec {
        let num_cmp = image_data.len();

        let mut component_multiple = [0u32; 4];
        let mut mcu_multiple = 0u32;
        for i in 0..num_cmp {
            component_multiple[i] = image_data[i].original_height() / mcuv;
            mcu_multiple += component_multiple[i];
        }

        let mcu_row = decode_index / mcu_multiple;
        let min_row_luma_y = mcu_row * component_multiple[0];

        let mut retval = RowSpec {
            skip: false,
            done: false,
            mcu_row_index: mcu_row,
            component: num_cmp,
            luma_y: min_row_luma_y,
            curr_y: 0,
            last_row_to_complete_mcu: false,
        };

        let mut place_within_scan = decode_index - mcu_row * mcu_multiple;

        for i in (0..num_cmp).rev() {
            if place_within_scan < component_multiple[i] {
                retval.component = i;
                retval.curr_y = mcu_row * component_multiple[i] + place_within_scan;
                retval.last_row_to_complete_mcu =
                    place_within_scan + 1 == component_multiple[i] && i == 0;

                if retval.curr_y >= max_coded_heights[i] {
                    retval.skip = true;
                    retval.done = true;
                    for j in 0..num_cmp - 1 {
                        if mcu_row * component_multiple[j] < max_coded_heights[j] {
                            retval.done = false;
                        }
                    }
                }

                if i == 0 {
                    retval.luma_y = retval.curr_y;
                }

                break;
            } else {
                place_within_scan -= component_multiple[i];
            }

            if i == 0 {
                retval.skip = true;
                retval.done = true;
                break;
            }
        }

        retval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_order_visits_chroma_first() {
        // 2:1 vertical subsampling: luma has 2 rows per MCU row, chroma 1.
        let images = vec![
            BlockBasedImage::new(2, 4),
            BlockBasedImage::new(1, 2),
            BlockBasedImage::new(1, 2),
        ];
        let heights = vec![4, 2, 2];

        let order: Vec<(usize, u32)> = (0..8)
            .map(|i| {
                let spec = RowSpec::from_index(i, &images, 2, &heights);
                assert!(!spec.skip);
                (spec.component, spec.curr_y)
            })
            .collect();

        assert_eq!(
            order,
            vec![
                (2, 0),
                (1, 0),
                (0, 0),
                (0, 1),
                (2, 1),
                (1, 1),
                (0, 2),
                (0, 3),
            ]
        );

        let spec = RowSpec::from_index(8, &images, 2, &heights);
        assert!(spec.done);
    }
}
