use bytesize::ByteSize;
use colored::Colorize;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Scalar type and layout of the raw capture. Real layouts fill the
/// in-phase rail only; pair layouts interleave I and Q.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    OneInt8,
    PairInt8,
    OneInt16,
    PairInt16,
    OneFloat32,
    PairFloat32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::OneInt8 => 1,
            SampleFormat::PairInt8 => 2,
            SampleFormat::OneInt16 => 2,
            SampleFormat::PairInt16 => 4,
            SampleFormat::OneFloat32 => 4,
            SampleFormat::PairFloat32 => 8,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            SampleFormat::PairInt8 | SampleFormat::PairInt16 | SampleFormat::PairFloat32
        )
    }
}

impl FromStr for SampleFormat {
    type Err = String;
    fn from_str(input: &str) -> std::result::Result<SampleFormat, Self::Err> {
        match input {
            "i8" => Ok(SampleFormat::OneInt8),
            "2xi8" => Ok(SampleFormat::PairInt8),
            "i16" => Ok(SampleFormat::OneInt16),
            "2xi16" => Ok(SampleFormat::PairInt16),
            "f32" => Ok(SampleFormat::OneFloat32),
            "2xf32" => Ok(SampleFormat::PairFloat32),
            _ => Err(format!("unknown sample format: {}", input)),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SampleFormat::OneInt8 => write!(f, "i8"),
            SampleFormat::PairInt8 => write!(f, "2xi8"),
            SampleFormat::OneInt16 => write!(f, "i16"),
            SampleFormat::PairInt16 => write!(f, "2xi16"),
            SampleFormat::OneFloat32 => write!(f, "f32"),
            SampleFormat::PairFloat32 => write!(f, "2xf32"),
        }
    }
}

/// A raw IQ capture on disk. Cheap to clone; every consumer opens its own
/// stream so tracking channels never share a file handle.
#[derive(Clone, Debug)]
pub struct IQRecording {
    pub file_path: PathBuf,
    pub format: SampleFormat,
    /// Byte offset where sample index 0 lives.
    pub skip_bytes: u64,
}

impl IQRecording {
    pub fn new(file_path: PathBuf, format: SampleFormat, skip_bytes: u64) -> Self {
        Self {
            file_path,
            format,
            skip_bytes,
        }
    }

    pub fn print_banner(&self, fs: f64) {
        if let Ok(meta) = self.file_path.metadata() {
            let duration_sec =
                meta.len() as f64 / fs / self.format.bytes_per_sample() as f64;
            println!(
                "file: {} -- {} {} duration: {:.1} secs",
                self.file_path.display().to_string().green(),
                ByteSize::b(meta.len()).to_string().bold(),
                self.format,
                duration_sec
            );
        }
    }

    pub fn open_stream(&self) -> Result<IQStream> {
        let file = File::open(&self.file_path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.skip_bytes))?;
        Ok(IQStream {
            reader,
            format: self.format,
            skip_bytes: self.skip_bytes,
        })
    }

    /// One-shot read of `num_samples` samples starting at `off_samples`.
    pub fn read_samples_at(&self, off_samples: u64, num_samples: usize) -> Result<Vec<Complex64>> {
        let mut stream = self.open_stream()?;
        stream.seek_samples(off_samples)?;
        stream.read_samples(num_samples)
    }
}

/// Seekable typed view of a recording. Sample offsets count complex (or
/// real) samples from the recording's skip point.
pub struct IQStream {
    reader: BufReader<File>,
    format: SampleFormat,
    skip_bytes: u64,
}

impl IQStream {
    pub fn seek_samples(&mut self, off_samples: u64) -> Result<()> {
        let off = self.skip_bytes + off_samples * self.format.bytes_per_sample() as u64;
        self.reader.seek(SeekFrom::Start(off))?;
        Ok(())
    }

    /// Current position in samples relative to the skip point.
    pub fn position_samples(&mut self) -> Result<u64> {
        let pos = self.reader.stream_position()?;
        Ok((pos - self.skip_bytes) / self.format.bytes_per_sample() as u64)
    }

    /// Reads `num_samples` samples, combining interleaved pairs into complex
    /// values and scaling integer types to ±1.0 full scale.
    pub fn read_samples(&mut self, num_samples: usize) -> Result<Vec<Complex64>> {
        let num_bytes = num_samples * self.format.bytes_per_sample();
        let mut buf = vec![0u8; num_bytes];
        let mut filled = 0usize;

        while filled < num_bytes {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < num_bytes {
            return Err(Error::InsufficientData {
                needed: num_samples,
                got: filled / self.format.bytes_per_sample(),
            });
        }

        let mut iq_vec = Vec::with_capacity(num_samples);
        match self.format {
            SampleFormat::OneInt8 => {
                for off in 0..num_bytes {
                    iq_vec.push(Complex64 {
                        re: buf[off] as i8 as f64 / i8::MAX as f64,
                        im: 0.0,
                    });
                }
            }
            SampleFormat::PairInt8 => {
                for off in (0..num_bytes).step_by(2) {
                    iq_vec.push(Complex64 {
                        re: buf[off] as i8 as f64 / i8::MAX as f64,
                        im: buf[off + 1] as i8 as f64 / i8::MAX as f64,
                    });
                }
            }
            SampleFormat::OneInt16 => {
                for off in (0..num_bytes).step_by(2) {
                    let v = i16::from_le_bytes([buf[off], buf[off + 1]]);
                    iq_vec.push(Complex64 {
                        re: v as f64 / i16::MAX as f64,
                        im: 0.0,
                    });
                }
            }
            SampleFormat::PairInt16 => {
                for off in (0..num_bytes).step_by(4) {
                    let i = i16::from_le_bytes([buf[off], buf[off + 1]]);
                    let q = i16::from_le_bytes([buf[off + 2], buf[off + 3]]);
                    iq_vec.push(Complex64 {
                        re: i as f64 / i16::MAX as f64,
                        im: q as f64 / i16::MAX as f64,
                    });
                }
            }
            SampleFormat::OneFloat32 => {
                for off in (0..num_bytes).step_by(4) {
                    let v = f32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
                    iq_vec.push(Complex64 {
                        re: v as f64,
                        im: 0.0,
                    });
                }
            }
            SampleFormat::PairFloat32 => {
                for off in (0..num_bytes).step_by(8) {
                    let i = f32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
                    let q = f32::from_le_bytes([
                        buf[off + 4],
                        buf[off + 5],
                        buf[off + 6],
                        buf[off + 7],
                    ]);
                    iq_vec.push(Complex64 {
                        re: i as f64,
                        im: q as f64,
                    });
                }
            }
        }
        Ok(iq_vec)
    }
}
