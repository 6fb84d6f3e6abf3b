// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("bad lepton file: {0}")]
    BadLeptonFile(String),
    #[error("incompatible lepton file version {0}")]
    VersionUnsupported(u8),
    #[error("unsupported JPEG: {0}")]
    UnsupportedJpeg(String),
    #[error("JPEGs with 4 color channels are not supported")]
    Unsupported4Colors,
    #[error("sampling factors beyond 2 are not supported")]
    SamplingBeyondTwoUnsupported,
    #[error("unsupported progressive JPEG: {0}")]
    ProgressiveUnsupported(&'static str),
    #[error("zero quantization value at an edge coefficient position")]
    UnsupportedJpegWithZeroIdct0,
    #[error("invalid reset code: {0}")]
    InvalidResetCode(String),
    #[error("invalid padding: {0}")]
    InvalidPadding(String),
    #[error("inconsistent lepton stream: {0}")]
    StreamInconsistent(&'static str),
    #[error("coefficient magnitude out of range")]
    CoefficientOutOfRange,
    #[error("verification length mismatch: expected {expected}, got {actual}")]
    VerificationLengthMismatch { expected: usize, actual: usize },
    #[error("verification content mismatch at byte {0}")]
    VerificationContentMismatch(usize),
    #[error("short read")]
    ShortRead,
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
