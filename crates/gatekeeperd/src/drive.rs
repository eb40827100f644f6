//! Mass-storage drive backed by a block device or image file.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use gatekeeper_services::{ChunkRead, Drive, ReadError};

pub struct ImageDrive {
    path: PathBuf,
    file: Option<File>,
}

impl ImageDrive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl Drive for ImageDrive {
    fn is_present(&mut self) -> bool {
        let present = self.path.exists();
        if !present {
            self.file = None;
        }
        present
    }

    fn rewind(&mut self) -> Result<(), ReadError> {
        self.file = Some(File::open(&self.path)?);
        tracing::debug!(path = %self.path.display(), "drive opened");
        Ok(())
    }

    fn read_next_chunk(&mut self, max: usize) -> Result<ChunkRead, ReadError> {
        let file = self.file.as_mut().ok_or(ReadError::NotReady)?;
        let mut chunk = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            let n = file.read(&mut chunk[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.file = None;
            return Ok(ChunkRead::EndOfFile);
        }
        chunk.truncate(filled);
        Ok(ChunkRead::Data(chunk))
    }
}
