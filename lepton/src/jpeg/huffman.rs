// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::error::{Error, Result};
use crate::jpeg::bit_reader::BitReader;

/// One DHT-defined Huffman table with the derived decoding acceleration
/// tables: a fast lookup for codes of up to 8 bits and min/max code bounds
/// per length for the rest.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    /// Count of codes for each bit length (index 1..=16).
    pub num_codes: [u8; 17],
    /// Symbols in order of code length.
    pub symbols: [u8; 256],
    pub symbol_count: usize,
    /// `symbol | (length << 8)` keyed by the top 8 stream bits, -1 if longer.
    pub fast_lookup: [i16; 256],
    pub max_code: [i32; 18],
    pub val_ptr: [i32; 17],
    pub min_code: [i32; 17],
}

impl Default for HuffmanTable {
    fn default() -> Self {
        HuffmanTable {
            num_codes: [0; 17],
            symbols: [0; 256],
            symbol_count: 0,
            fast_lookup: [-1; 256],
            max_code: [0; 18],
            val_ptr: [0; 17],
            min_code: [0; 17],
        }
    }
}

impl HuffmanTable {
    pub fn build_derived_table(&mut self) {
        self.symbol_count = 0;
        for i in 1..=16 {
            self.symbol_count += usize::from(self.num_codes[i]);
        }

        self.fast_lookup = [-1; 256];

        let mut code = 0usize;
        let mut symbol_idx = 0usize;
        for bits in 1..=8usize {
            for _ in 0..self.num_codes[bits] {
                let shift = 8 - bits;
                let base_idx = code << shift;
                let num_entries = 1 << shift;
                for j in 0..num_entries {
                    self.fast_lookup[base_idx + j] =
                        i16::from(self.symbols[symbol_idx]) | ((bits as i16) << 8);
                }
                code += 1;
                symbol_idx += 1;
            }
            code <<= 1;
        }

        let mut code = 0i32;
        let mut symbol_idx = 0i32;
        for bits in 1..=16usize {
            self.min_code[bits] = code;
            self.val_ptr[bits] = symbol_idx - code;

            if self.num_codes[bits] > 0 {
                self.max_code[bits] = code + i32::from(self.num_codes[bits]) - 1;
                symbol_idx += i32::from(self.num_codes[bits]);
            } else {
                self.max_code[bits] = -1;
            }

            code = (code + i32::from(self.num_codes[bits])) << 1;
        }
        self.max_code[17] = 0x7FFF_FFFF;
    }
}

/// Decodes the next Huffman symbol from the bit stream.
pub fn next_huff_code(bit_reader: &mut BitReader<'_>, table: &HuffmanTable) -> Result<u8> {
    let (peek, peek_len) = bit_reader.peek();
    if peek_len >= 8 {
        let lookup = table.fast_lookup[usize::from(peek)];
        if lookup >= 0 {
            let code_len = (lookup >> 8) as u32;
            bit_reader.advance(code_len);
            return Ok((lookup & 0xFF) as u8);
        }
    }

    let mut code = 0i32;
    for bits in 1..=16usize {
        let bit = bit_reader.read(1)?;
        code = (code << 1) | i32::from(bit);

        if code <= table.max_code[bits] {
            let idx = table.val_ptr[bits] + code;
            return Ok(table.symbols[idx as usize]);
        }
    }

    Err(Error::UnsupportedJpeg("invalid Huffman code".into()))
}

/// Largest EOB run the table can *start* (the `1 << n` base of its largest
/// EOBn symbol); used to validate optimal EOB-run encoding while reading.
pub fn max_eob_run(table: &HuffmanTable) -> u16 {
    let mut max_run = 1u16;
    for i in 0..table.symbol_count {
        let sym = table.symbols[i];
        // EOBn symbols have a zero low nibble; 0xF0 is ZRL, not an EOB.
        if sym & 0x0F == 0 && sym != 0xF0 {
            let run_bits = sym >> 4;
            if run_bits < 15 {
                let run = 1u16 << run_bits;
                if run > max_run {
                    max_run = run;
                }
            }
        }
    }
    max_run
}

/// Precomputed `(code, length)` pairs for re-encoding, plus the largest EOB
/// run expressible with the table (`(2 << n) - 1` for its largest EOBn).
#[derive(Debug, Clone)]
pub struct HuffmanEncodeTable {
    pub codes: [u16; 256],
    pub lengths: [u8; 256],
    pub max_eob_run: u16,
}

impl HuffmanEncodeTable {
    pub fn from_decode_table(decode_table: &HuffmanTable) -> Self {
        let mut enc = HuffmanEncodeTable {
            codes: [0; 256],
            lengths: [0; 256],
            max_eob_run: 0,
        };

        let mut code = 0u16;
        let mut symbol_idx = 0usize;
        for bits in 1..=16usize {
            for _ in 0..decode_table.num_codes[bits] {
                let symbol = decode_table.symbols[symbol_idx];
                enc.codes[usize::from(symbol)] = code;
                enc.lengths[usize::from(symbol)] = bits as u8;
                code = code.wrapping_add(1);
                symbol_idx += 1;
            }
            code <<= 1;
        }

        for i in (0..=14u16).rev() {
            let symbol = (i << 4) as usize;
            if enc.lengths[symbol] > 0 {
                enc.max_eob_run = (2 << i) - 1;
                break;
            }
        }

        enc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from_dht(counts: &[u8; 16], symbols: &[u8]) -> HuffmanTable {
        let mut t = HuffmanTable::default();
        for (i, &c) in counts.iter().enumerate() {
            t.num_codes[i + 1] = c;
        }
        t.symbols[..symbols.len()].copy_from_slice(symbols);
        t.build_derived_table();
        t
    }

    #[test]
    fn decodes_canonical_codes() {
        // Symbols: 'a' has the single 1-bit code 0, 'b' and 'c' 2-bit codes.
        let t = table_from_dht(&[1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &[7, 8, 9]);

        let data = [0b0_10_11_0_0_0u8];
        let mut r = BitReader::new(&data);
        assert_eq!(next_huff_code(&mut r, &t).unwrap(), 7);
        assert_eq!(next_huff_code(&mut r, &t).unwrap(), 8);
        assert_eq!(next_huff_code(&mut r, &t).unwrap(), 9);
    }

    #[test]
    fn encode_table_inverts_decode_table() {
        let t = table_from_dht(
            &[0, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0x00, 0x01, 0x11, 0xF0],
        );
        let enc = HuffmanEncodeTable::from_decode_table(&t);

        assert_eq!(enc.lengths[0x00], 2);
        assert_eq!(enc.codes[0x00], 0b00);
        assert_eq!(enc.lengths[0x01], 2);
        assert_eq!(enc.codes[0x01], 0b01);
        assert_eq!(enc.lengths[0x11], 3);
        assert_eq!(enc.codes[0x11], 0b100);
        assert_eq!(enc.lengths[0xF0], 3);
        assert_eq!(enc.codes[0xF0], 0b101);
    }

    #[test]
    fn eob_run_bounds() {
        // Table carries EOB (0x00) and EOB2 (0x20): decode-side base run is
        // 1 << 2, encode-side maximum is (2 << 2) - 1.
        let t = table_from_dht(
            &[0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            &[0x00, 0x20],
        );
        assert_eq!(max_eob_run(&t), 4);
        let enc = HuffmanEncodeTable::from_decode_table(&t);
        assert_eq!(enc.max_eob_run, 7);
    }
}
