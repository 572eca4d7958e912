use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::frame::{ImageBuffer, SampleDepth};
use crate::io::ser::{SerHeader, SER_HEADER_SIZE, SER_MAGIC};
use crate::seqwrite::{GeometryPolicy, SequenceSink};

/// Byte offset of the frame count field in the SER header.
const FRAME_COUNT_OFFSET: u64 = 38;

/// Writes SER files frame by frame.
pub struct SerWriter {
    writer: BufWriter<File>,
    header: SerHeader,
    frames_written: u32,
}

impl SerWriter {
    /// Create a new SER file with the given header.
    pub fn create(path: &Path, header: SerHeader) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, &header)?;
        Ok(Self {
            writer,
            header,
            frames_written: 0,
        })
    }

    /// Append one frame of raw pixel data.
    pub fn write_raw_frame(&mut self, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.header.frame_byte_size());
        self.writer.write_all(data)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Append the optional timestamp trailer.
    pub fn write_timestamps(&mut self, timestamps: &[u64]) -> Result<()> {
        for ts in timestamps {
            self.writer.write_u64::<LittleEndian>(*ts)?;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Flush and close, patching the header frame count if it does not
    /// match the number of frames actually written.
    pub fn finalize(mut self) -> Result<()> {
        if self.frames_written != self.header.frame_count {
            self.writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
            self.writer
                .write_i32::<LittleEndian>(self.frames_written as i32)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn write_header(writer: &mut impl Write, header: &SerHeader) -> Result<()> {
    writer.write_all(SER_MAGIC)?;
    writer.write_i32::<LittleEndian>(0)?; // LuID
    writer.write_i32::<LittleEndian>(header.color_id)?;
    // 0 means little-endian here, matching the common SER convention
    writer.write_i32::<LittleEndian>(if header.little_endian { 0 } else { 1 })?;
    writer.write_i32::<LittleEndian>(header.width as i32)?;
    writer.write_i32::<LittleEndian>(header.height as i32)?;
    writer.write_i32::<LittleEndian>(header.pixel_depth as i32)?;
    writer.write_i32::<LittleEndian>(header.frame_count as i32)?;
    write_fixed_string(writer, &header.observer, 40)?;
    write_fixed_string(writer, &header.instrument, 40)?;
    write_fixed_string(writer, &header.telescope, 40)?;
    writer.write_u64::<LittleEndian>(header.date_time)?;
    writer.write_u64::<LittleEndian>(header.date_time_utc)?;

    debug_assert_eq!(
        14 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 40 + 40 + 40 + 8 + 8,
        SER_HEADER_SIZE
    );
    Ok(())
}

fn write_fixed_string(writer: &mut impl Write, s: &str, len: usize) -> Result<()> {
    let mut buf = vec![0u8; len];
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    buf[..n].copy_from_slice(&bytes[..n]);
    writer.write_all(&buf)?;
    Ok(())
}

/// Sequence sink that streams frames into a SER file.
///
/// The output file is created lazily on the first frame, so its header can
/// take the real geometry and sample depth from the data. The header frame
/// count is patched on finish to whatever was actually written.
pub struct SerSink {
    path: PathBuf,
    template: SerHeader,
    writer: Option<SerWriter>,
    scratch: Vec<u8>,
}

impl SerSink {
    /// Prepare a sink writing to `path`. Observer, instrument, telescope
    /// and timestamps are taken from `template`; geometry comes from the
    /// first frame. No file is created until then.
    pub fn create(path: &Path, template: &SerHeader) -> Self {
        Self {
            path: path.to_path_buf(),
            template: template.clone(),
            writer: None,
            scratch: Vec::new(),
        }
    }

    fn build_header(&self, image: &ImageBuffer) -> SerHeader {
        let color_id = if image.planes() == 3 {
            100
        } else if self.template.planes_per_pixel() == 1 {
            // mono or bayer pattern carried over from the source
            self.template.color_id
        } else {
            0
        };
        SerHeader {
            color_id,
            little_endian: true,
            width: image.width() as u32,
            height: image.height() as u32,
            pixel_depth: image.depth.bits(),
            frame_count: 0,
            observer: self.template.observer.clone(),
            instrument: self.template.instrument.clone(),
            telescope: self.template.telescope.clone(),
            date_time: self.template.date_time,
            date_time_utc: self.template.date_time_utc,
        }
    }

    fn encode_frame(&mut self, image: &ImageBuffer) {
        let planes = image.planes();
        let h = image.height();
        let w = image.width();
        self.scratch.clear();
        self.scratch
            .reserve(planes * h * w * image.depth.bytes_per_sample());

        match image.depth {
            SampleDepth::Bits8 => {
                for y in 0..h {
                    for x in 0..w {
                        for p in 0..planes {
                            let v = image.data[[p, y, x]].clamp(0.0, 1.0);
                            self.scratch.push((v * 255.0).round() as u8);
                        }
                    }
                }
            }
            SampleDepth::Bits16 => {
                for y in 0..h {
                    for x in 0..w {
                        for p in 0..planes {
                            let v = image.data[[p, y, x]].clamp(0.0, 1.0);
                            let s = (v * 65535.0).round() as u16;
                            self.scratch.extend_from_slice(&s.to_le_bytes());
                        }
                    }
                }
            }
        }
    }
}

impl SequenceSink for SerSink {
    fn geometry(&self) -> GeometryPolicy {
        GeometryPolicy::Fixed
    }

    fn write_frame(&mut self, image: &ImageBuffer, position: usize) -> Result<()> {
        if self.writer.is_none() {
            let header = self.build_header(image);
            self.writer = Some(SerWriter::create(&self.path, header)?);
        }
        self.encode_frame(image);
        if let Some(writer) = self.writer.as_mut() {
            debug_assert_eq!(position as u32, writer.frames_written());
            writer.write_raw_frame(&self.scratch)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self.writer {
            Some(writer) => writer.finalize(),
            // no frames reached the sink, leave no file behind
            None => Ok(()),
        }
    }
}
