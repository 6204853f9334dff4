#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![forbid(unsafe_code)]

use colored::Colorize;
use cpal::traits::{DeviceTrait as _, HostTrait as _, StreamTrait as _};
use cpal::{FromSample, SampleFormat, SizedSample};
use error_iter::ErrorIter as _;
use modplay::{Song, Synth};
use std::process::ExitCode;
use std::sync::mpsc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Module error")]
    Module(#[from] modplay::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("CPAL audio stream config error")]
    AudioConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("CPAL audio stream builder error")]
    AudioStream(#[from] cpal::BuildStreamError),

    #[error("CPAL audio stream play error")]
    AudioPlay(#[from] cpal::PlayStreamError),
}

impl Error {
    /// 1 for file problems, 2 for modules this player cannot decode.
    fn exit_code(&self) -> u8 {
        match self {
            Error::Module(modplay::Error::UnsupportedFormat) => 2,
            _ => 1,
        }
    }
}

fn main() -> ExitCode {
    match player() {
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

fn player() -> Result<(), Error> {
    // Play the given module, or the bundled demo without arguments.
    let data = match std::env::args().nth(1) {
        Some(filename) => std::fs::read(filename)?,
        None => demo_module(),
    };

    let song = Song::from_slice(&data)?;
    println!("Playing {song}");
    for (index, instrument) in song.instruments.iter().enumerate() {
        if !instrument.name.is_empty() {
            println!("  {:2} {}", index + 1, instrument.name);
        }
    }

    // cpal boilerplate. The module format is PAL-locked, so ask the device
    // for 44.1 kHz stereo outright instead of resampling.
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .expect("no output device available");
    let format = device.default_output_config()?.sample_format();
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(44_100),
        buffer_size: cpal::BufferSize::Default,
    };

    let synth = Synth::new(&song);

    match format {
        SampleFormat::I8 => run::<i8>(&device, &config, synth),
        SampleFormat::I16 => run::<i16>(&device, &config, synth),
        SampleFormat::I32 => run::<i32>(&device, &config, synth),
        SampleFormat::I64 => run::<i64>(&device, &config, synth),
        SampleFormat::U16 => run::<u16>(&device, &config, synth),
        SampleFormat::F32 => run::<f32>(&device, &config, synth),
        SampleFormat::F64 => run::<f64>(&device, &config, synth),
        sample_format => panic!("Unsupported sample format '{sample_format}'"),
    }
}

fn run<T>(device: &cpal::Device, config: &cpal::StreamConfig, synth: Synth) -> Result<(), Error>
where
    T: SizedSample + FromSample<i16>,
{
    // Create a channel so the audio thread can request samples; the
    // blocking recv on this side paces generation to real time.
    let (audio_tx, audio_rx) = mpsc::sync_channel(10);

    let stream = device.build_output_stream(
        config,
        move |buffer: &mut [T], _: &cpal::OutputCallbackInfo| {
            let (tx, rx) = mpsc::sync_channel(1);

            // Request samples from the main thread
            audio_tx.send((buffer.len(), tx)).unwrap();
            let samples: Vec<i16> = rx.recv().unwrap();

            for (elem, sample) in buffer.iter_mut().zip(samples) {
                *elem = T::from_sample(sample);
            }
        },
        |err| eprintln!("an error occurred on stream: {err}"),
        None,
    )?;
    stream.play()?;

    let mut samples = synth.flatten();

    // Send samples requested by the audio thread until the song ends.
    while let Ok((len, tx)) = audio_rx.recv() {
        let batch = samples.by_ref().take(len).collect::<Vec<_>>();
        let done = batch.is_empty();
        tx.send(batch).unwrap();
        if done {
            break;
        }
    }

    Ok(())
}

/// A small module built in code so the player makes sound with no
/// arguments: a triangle lead over a square bass, with an arpeggiated
/// chord channel and a vibrato pad.
fn demo_module() -> Vec<u8> {
    // PAL periods for the notes the tune uses.
    const C2: u16 = 428;
    const D2: u16 = 381;
    const E2: u16 = 339;
    const F2: u16 = 320;
    const G2: u16 = 285;
    const A2: u16 = 254;
    const B2: u16 = 226;
    const C3: u16 = 214;

    fn cell(
        data: &mut [u8],
        pattern: usize,
        row: usize,
        channel: usize,
        period: u16,
        instrument: u8,
        effect: u8,
        argument: u8,
    ) {
        let offset = 1084 + pattern * 1024 + row * 16 + channel * 4;
        data[offset] = (instrument & 0x10) | (period >> 8) as u8;
        data[offset + 1] = (period & 0xFF) as u8;
        data[offset + 2] = ((instrument & 0x0F) << 4) | effect;
        data[offset + 3] = argument;
    }

    let mut data = vec![0_u8; 1084 + 2 * 1024];
    data[..12].copy_from_slice(b"modplay demo");

    // Two 32-word instruments, both looping over their whole waveform.
    for (index, name, volume) in [
        (0_usize, &b"triangle lead"[..], 40_u8),
        (1, &b"square bass"[..], 48),
    ] {
        let header = 20 + index * 30;
        data[header..header + name.len()].copy_from_slice(name);
        data[header + 22..header + 24].copy_from_slice(&32_u16.to_be_bytes());
        data[header + 25] = volume;
        data[header + 26..header + 28].copy_from_slice(&1_u16.to_be_bytes());
        data[header + 28..header + 30].copy_from_slice(&31_u16.to_be_bytes());
    }

    data[950] = 4;
    data[952..956].copy_from_slice(&[0, 0, 1, 1]);
    data[1080..1084].copy_from_slice(b"M.K.");

    for pattern in 0..2 {
        // Channel 0: bass line, nudged down in volume between hits.
        for (bar, &period) in [C2, C2, F2, G2].iter().enumerate() {
            cell(&mut data, pattern, bar * 16, 0, period, 2, 0, 0);
            cell(&mut data, pattern, bar * 16 + 10, 0, 0, 0, 10, 0x01);
        }

        // Channel 3: arpeggiated chords on the beat.
        cell(&mut data, pattern, 0, 3, C2, 1, 0, 0x47);
        cell(&mut data, pattern, 32, 3, F2, 1, 0, 0x47);
        cell(&mut data, pattern, 48, 3, G2, 1, 0, 0x47);
    }

    // Channel 1: the lead, answering itself across the two patterns.
    let phrase_a = [
        (0, C3),
        (8, B2),
        (16, A2),
        (24, G2),
        (32, A2),
        (40, F2),
        (48, G2),
        (56, B2),
    ];
    let phrase_b = [
        (0, C3),
        (8, D2),
        (16, E2),
        (24, G2),
        (32, E2),
        (40, D2),
        (48, C2),
        (56, C2),
    ];
    for (row, period) in phrase_a {
        cell(&mut data, 0, row, 1, period, 1, 0, 0);
    }
    for (row, period) in phrase_b {
        cell(&mut data, 1, row, 1, period, 1, 0, 0);
    }

    // Channel 2: slow vibrato pad, one chord tone per half pattern.
    cell(&mut data, 0, 0, 2, E2, 1, 4, 0x34);
    cell(&mut data, 0, 32, 2, F2, 1, 4, 0x34);
    cell(&mut data, 1, 0, 2, G2, 1, 4, 0x34);
    cell(&mut data, 1, 32, 2, E2, 1, 4, 0x34);

    // Instrument 1: triangle wave, 64 bytes.
    for i in 0..64_i32 {
        let level = if i < 32 { i * 6 - 96 } else { (63 - i) * 6 - 96 };
        data.push(level as i8 as u8);
    }
    // Instrument 2: square wave, 64 bytes.
    for i in 0..64_i32 {
        let level: i8 = if i < 32 { 80 } else { -80 };
        data.push(level as u8);
    }

    data
}
