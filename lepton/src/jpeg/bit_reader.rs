// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::consts::MARKER_RST0;
use crate::error::{Error, Result};

/// Reads the entropy-coded segment of a JPEG scan from a byte slice,
/// unstuffing `0xFF 0x00` escapes. After the end of the data the register
/// zero-extends and the `eof` flag latches, so truncated scans decode as if
/// padded with zero bits.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bits: u64,
    bits_left: u32,
    cpos: u32, // running restart marker counter
    eof: bool,
    /// Set when the data ended in the middle of an FF escape.
    #[allow(dead_code)]
    truncated_ff: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            pos: 0,
            bits: 0,
            bits_left: 0,
            cpos: 0,
            eof: false,
            truncated_ff: false,
        }
    }

    /// Returns the next `bits_to_read` bits MSB-first.
    pub fn read(&mut self, bits_to_read: u32) -> Result<u16> {
        if bits_to_read == 0 {
            return Ok(0);
        }

        if self.bits_left < bits_to_read {
            self.fill_register(bits_to_read)?;
        }

        let retval = ((self.bits >> (self.bits_left - bits_to_read)) & ((1 << bits_to_read) - 1)) as u16;
        self.bits_left -= bits_to_read;

        Ok(retval)
    }

    /// Top byte of the available bits plus the count available. Does not pull
    /// new bytes from the stream.
    pub fn peek(&self) -> (u8, u32) {
        if self.bits_left >= 8 {
            ((self.bits >> (self.bits_left - 8)) as u8, self.bits_left)
        } else if self.bits_left > 0 {
            ((self.bits << (8 - self.bits_left)) as u8, self.bits_left)
        } else {
            (0, 0)
        }
    }

    pub fn advance(&mut self, bits: u32) {
        self.bits_left -= bits;
    }

    fn fill_register(&mut self, bits_to_read: u32) -> Result<()> {
        while self.bits_left < bits_to_read {
            match self.read_byte() {
                None => {
                    // Truncated file: treat the rest as zeros.
                    self.eof = true;
                    self.bits_left += 8;
                    self.bits <<= 8;
                }
                Some(0xFF) => {
                    match self.read_byte() {
                        None => {
                            // Truncation in the middle of an escape; assume
                            // it was an escaped 0xFF.
                            self.bits = (self.bits << 8) | 0xFF;
                            self.bits_left += 8;
                            self.truncated_ff = true;
                        }
                        Some(0x00) => {
                            self.bits = (self.bits << 8) | 0xFF;
                            self.bits_left += 8;
                        }
                        Some(next) => {
                            return Err(Error::InvalidResetCode(format!(
                                "invalid code ff {next:02x} found in entropy stream"
                            )));
                        }
                    }
                }
                Some(b) => {
                    self.bits = (self.bits << 8) | u64::from(b);
                    self.bits_left += 8;
                }
            }
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Bytes after the last one pulled into the bit register; once the scan
    /// completes this is the trailing (garbage) data.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Partial-byte state at the current position: the number of bits already
    /// consumed from the current byte, and the byte with unread bits cleared.
    pub fn overhang(&self) -> (u8, u8) {
        let bits_already_read = ((64 - self.bits_left) & 7) as u8;
        let mask = (((1u16 << bits_already_read) - 1) << (8 - u16::from(bits_already_read))) as u8;
        (bits_already_read, (self.bits as u8) & mask)
    }

    /// Consumes the 1..7 fill bits before a byte-aligned marker. The first
    /// sighting fixes the file's pad bit; later sightings must match it.
    pub fn read_and_verify_fill_bits(&mut self, pad_bit: &mut Option<u8>) -> Result<()> {
        if self.bits_left > 0 && !self.eof {
            let num_bits_to_read = self.bits_left;
            let actual = self.read(num_bits_to_read)?;

            let all_one = ((1u32 << num_bits_to_read) - 1) as u16;

            match *pad_bit {
                None => {
                    if actual == 0 {
                        *pad_bit = Some(0);
                    } else if actual == all_one {
                        *pad_bit = Some(0xFF);
                    } else {
                        return Err(Error::InvalidPadding(format!(
                            "inconsistent pad bits num_bits={num_bits_to_read} pattern={actual:b}"
                        )));
                    }
                }
                Some(expected_bit) => {
                    let expected = u16::from(expected_bit) & all_one;
                    if actual != expected {
                        return Err(Error::InvalidPadding(format!(
                            "padding of {num_bits_to_read} bits actual={actual:b} expected={expected:b}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Consumes `FF D0+k` where `k` follows the running restart counter.
    pub fn verify_reset_code(&mut self) -> Result<()> {
        let h0 = self.read_byte().ok_or(Error::ShortRead)?;
        let h1 = self.read_byte().ok_or(Error::ShortRead)?;

        let expected_rst = MARKER_RST0 + ((self.cpos as u8) & 7);
        if h0 != 0xFF || h1 != expected_rst {
            return Err(Error::InvalidResetCode(format!(
                "invalid reset code {h0:02x} {h1:02x} found in stream (expected ff {expected_rst:02x})"
            )));
        }

        // Entropy coding starts from scratch after RST.
        self.cpos += 1;
        self.bits = 0;
        self.bits_left = 0;

        Ok(())
    }

    /// Absolute byte offset at which further reads would begin, accounting
    /// for bits pulled into the register but not yet consumed.
    pub fn stream_position(&self) -> u64 {
        let mut pos = self.pos as u64;
        if self.bits_left > 0 && !self.eof {
            pos -= u64::from((self.bits_left + 7) / 8);
        }
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_msb_first() {
        let mut r = BitReader::new(&[0b1011_0001, 0b0100_0000]);
        assert_eq!(r.read(1).unwrap(), 1);
        assert_eq!(r.read(3).unwrap(), 0b011);
        assert_eq!(r.read(6).unwrap(), 0b000101);
    }

    #[test]
    fn unstuffs_ff_escapes() {
        let mut r = BitReader::new(&[0xFF, 0x00, 0x12]);
        assert_eq!(r.read(8).unwrap(), 0xFF);
        assert_eq!(r.read(8).unwrap(), 0x12);
    }

    #[test]
    fn rejects_unescaped_ff() {
        let mut r = BitReader::new(&[0xFF, 0xD5]);
        assert!(matches!(r.read(8), Err(Error::InvalidResetCode(_))));
    }

    #[test]
    fn zero_extends_after_eof() {
        let mut r = BitReader::new(&[0xA0]);
        assert_eq!(r.read(8).unwrap(), 0xA0);
        assert!(!r.is_eof());
        assert_eq!(r.read(8).unwrap(), 0);
        assert!(r.is_eof());
    }

    #[test]
    fn overhang_reports_consumed_bits() {
        let mut r = BitReader::new(&[0b1100_0000, 0x00]);
        r.read(3).unwrap();
        let (bits, byte) = r.overhang();
        assert_eq!(bits, 3);
        assert_eq!(byte, 0b1100_0000);
    }

    #[test]
    fn learns_and_checks_pad_bit() {
        // 3 data bits then 5 one-bits of padding.
        let mut r = BitReader::new(&[0b1011_1111]);
        r.read(3).unwrap();
        let mut pad = None;
        r.read_and_verify_fill_bits(&mut pad).unwrap();
        assert_eq!(pad, Some(0xFF));

        // Inconsistent padding pattern is an error.
        let mut r = BitReader::new(&[0b1010_1010]);
        r.read(3).unwrap();
        let mut pad = None;
        assert!(matches!(
            r.read_and_verify_fill_bits(&mut pad),
            Err(Error::InvalidPadding(_))
        ));

        // Known pad bit must match.
        let mut r = BitReader::new(&[0b1010_0000]);
        r.read(3).unwrap();
        let mut pad = Some(0xFF);
        assert!(r.read_and_verify_fill_bits(&mut pad).is_err());
    }

    #[test]
    fn verifies_reset_markers_in_sequence() {
        let mut r = BitReader::new(&[0xFF, 0xD0, 0xFF, 0xD1, 0xFF, 0xD0]);
        r.verify_reset_code().unwrap();
        r.verify_reset_code().unwrap();
        // Third marker should be RST2, not RST0.
        assert!(matches!(r.verify_reset_code(), Err(Error::InvalidResetCode(_))));
    }

    #[test]
    fn stream_position_excludes_register_bits() {
        let mut r = BitReader::new(&[0x12, 0x34, 0x56]);
        r.read(4).unwrap();
        // One byte pulled, four bits unconsumed: position is still 0.
        assert_eq!(r.stream_position(), 0);
        r.read(4).unwrap();
        assert_eq!(r.stream_position(), 1);
    }
}
