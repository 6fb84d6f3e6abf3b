// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};

#[derive(Parser)]
#[command(name = "leptonc", about = "Losslessly recompress JPEG files")]
struct Opt {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a JPEG into a lepton file
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// Decode the result and verify it matches the input byte for byte
        #[arg(long)]
        verify: bool,
    },
    /// Decompress a lepton file back into the original JPEG
    Decompress { input: PathBuf, output: PathBuf },
    /// Roundtrip a JPEG in memory and report whether it is reproduced exactly
    Verify { input: PathBuf },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();

    match opt.command {
        Command::Compress {
            input,
            output,
            verify,
        } => {
            let jpeg = fs::read(&input).wrap_err_with(|| format!("reading {}", input.display()))?;
            let lepton = if verify {
                lepton::encode_verify(&jpeg)?
            } else {
                lepton::encode_bytes(&jpeg)?
            };
            fs::write(&output, &lepton)
                .wrap_err_with(|| format!("writing {}", output.display()))?;
            println!(
                "{} -> {} ({} -> {} bytes, {:.1}%)",
                input.display(),
                output.display(),
                jpeg.len(),
                lepton.len(),
                100.0 * lepton.len() as f64 / jpeg.len() as f64
            );
        }
        Command::Decompress { input, output } => {
            let lepton = fs::read(&input).wrap_err_with(|| format!("reading {}", input.display()))?;
            let jpeg = lepton::decode_bytes(&lepton)?;
            fs::write(&output, &jpeg)
                .wrap_err_with(|| format!("writing {}", output.display()))?;
            println!(
                "{} -> {} ({} -> {} bytes)",
                input.display(),
                output.display(),
                lepton.len(),
                jpeg.len()
            );
        }
        Command::Verify { input } => {
            let jpeg = fs::read(&input).wrap_err_with(|| format!("reading {}", input.display()))?;
            let lepton = lepton::encode_verify(&jpeg)?;
            println!(
                "{}: OK ({} -> {} bytes, {:.1}%)",
                input.display(),
                jpeg.len(),
                lepton.len(),
                100.0 * lepton.len() as f64 / jpeg.len() as f64
            );
        }
    }

    Ok(())
}
