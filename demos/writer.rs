#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use colored::Colorize;
use error_iter::ErrorIter as _;
use riff_wave::{WaveWriter, WriteError};
use thiserror::Error;

use modplay::{Song, Synth};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing mod-file argument\nUsage: writer <mod-file> <wav-file>")]
    MissingModFilename,

    #[error("Missing wav-file argument\nUsage: writer <mod-file> <wav-file>")]
    MissingWavFilename,

    #[error("Module error")]
    Module(#[from] modplay::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Wave writer error")]
    Writer(#[from] WriteError),
}

impl Error {
    fn exit_code(&self) -> u8 {
        match self {
            Error::Module(modplay::Error::UnsupportedFormat) => 2,
            _ => 1,
        }
    }
}

fn main() -> ExitCode {
    match writer() {
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);

            for cause in e.sources().skip(1) {
                eprintln!("{} {}", "caused by:".bright_red(), cause);
            }

            ExitCode::from(e.exit_code())
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}

fn writer() -> Result<(), Error> {
    let mut args = std::env::args().skip(1);
    let mod_filename = args.next().ok_or(Error::MissingModFilename)?;
    let wav_filename = args.next().ok_or(Error::MissingWavFilename)?;

    // Read and decode the module
    let data = std::fs::read(mod_filename)?;
    let song = Song::from_slice(&data)?;
    println!("Rendering {song}");

    // Write the wav file
    let file = File::create(wav_filename)?;
    let mut wave_writer = WaveWriter::new(2, 44_100, 16, BufWriter::new(file))?;

    for [left, right] in Synth::new(&song) {
        wave_writer.write_sample_i16(left)?;
        wave_writer.write_sample_i16(right)?;
    }

    Ok(())
}
