// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod branch;
mod vpx_bool_reader;
mod vpx_bool_writer;

pub use branch::Branch;
pub use vpx_bool_reader::VpxBoolReader;
pub use vpx_bool_writer::VpxBoolWriter;
