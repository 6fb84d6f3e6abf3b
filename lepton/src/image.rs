// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod aligned_block;
mod block_based_image;

pub use aligned_block::{AlignedBlock, EMPTY_BLOCK};
pub use block_based_image::BlockBasedImage;
