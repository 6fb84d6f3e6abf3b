// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod block_context;
mod decoder;
mod encoder;
mod neighbor_summary;
mod probability_tables;
mod quantization_tables;
mod row_spec;

pub use block_context::{BlockContext, NeighborData};
pub use decoder::LeptonDecoder;
pub use encoder::LeptonEncoder;
pub use neighbor_summary::NeighborSummary;
pub use probability_tables::{
    ProbabilityTables, ALL_NEIGHBORS, LEFT_ONLY, NO_NEIGHBORS, TOP_ONLY,
};
pub use quantization_tables::QuantizationTables;
pub use row_spec::RowSpec;

/// Luma gets its own model; both chroma components share the second one.
pub fn color_index(component: usize) -> usize {
    usize::from(component != 0)
}
