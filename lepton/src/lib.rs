// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! A bit-exact lossless re-encoder for JPEG images.
//!
//! Baseline and progressive JPEGs are taken apart into their DCT
//! coefficients, re-modeled with neighbor-aware context, and entropy-coded
//! with an adaptive binary arithmetic coder into a lepton-format container.
//! Decoding reproduces the original JPEG byte for byte, including restart
//! markers, padding bits, trailing garbage and early-EOF truncation.
//!
//! ```no_run
//! # fn main() -> lepton::Result<()> {
//! let jpeg = std::fs::read("image.jpg")?;
//! let compressed = lepton::encode_bytes(&jpeg)?;
//! let restored = lepton::decode_bytes(&compressed)?;
//! assert_eq!(jpeg, restored);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod coder;
pub mod consts;
pub mod container;
pub mod decode;
pub mod encode;
pub mod error;
pub mod image;
pub mod jpeg;
pub mod model;
mod util;

pub use decode::{decode, decode_bytes};
pub use encode::{encode, encode_bytes, encode_verify};
pub use error::{Error, Result};
