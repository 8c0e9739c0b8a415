use crate::buffer::SplatBuffer;
use crate::error::SplatBufferError;
use crate::structures::{check_version, HEADER_SIZE_BYTES};

/// Feeds a splat buffer from a byte stream that arrives in arbitrary chunks.
///
/// Bytes are written before counts are published, so any splat index below
/// `buffer().splat_count()` is always fully present.
#[derive(Debug, Default)]
pub struct ProgressiveLoader {
    staged: Vec<u8>,
    buffer: Option<SplatBuffer>,
    received: usize,
}

impl ProgressiveLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_received(&self) -> usize {
        self.received
    }

    /// The buffer, once its header region has arrived.
    pub fn buffer(&self) -> Option<&SplatBuffer> {
        self.buffer.as_ref()
    }

    pub fn loaded_splat_count(&self) -> usize {
        self.buffer.as_ref().map_or(0, SplatBuffer::splat_count)
    }

    pub fn is_complete(&self) -> bool {
        self.buffer
            .as_ref()
            .is_some_and(|b| self.received == b.total_size())
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), SplatBufferError> {
        match self.buffer.as_mut() {
            Some(buffer) => {
                buffer.write_bytes(self.received, chunk)?;
                self.received += chunk.len();
            }
            None => {
                self.staged.extend_from_slice(chunk);
                self.received = self.staged.len();
                if self.staged.len() >= 2 {
                    check_version(self.staged[0], self.staged[1])?;
                }
                if self.staged.len() < HEADER_SIZE_BYTES {
                    return Ok(());
                }
                let region = SplatBuffer::header_region_size(&self.staged)?;
                if self.staged.len() < region {
                    return Ok(());
                }
                let mut buffer = SplatBuffer::allocate(&self.staged[..region])?;
                if self.staged.len() > region {
                    buffer.write_bytes(region, &self.staged[region..])?;
                }
                tracing::debug!(
                    sections = buffer.max_section_count(),
                    splats = buffer.max_splat_count(),
                    bytes = buffer.total_size(),
                    "allocated progressive splat buffer"
                );
                self.staged = Vec::new();
                self.buffer = Some(buffer);
            }
        }
        self.publish()
    }

    /// Raises per-section and global counts to the number of complete splats
    /// received so far.
    fn publish(&mut self) -> Result<(), SplatBufferError> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };

        let mut loaded = Vec::with_capacity(buffer.max_section_count());
        for section in buffer.sections() {
            let start = section.splat_data_offset();
            let complete = if self.received > start {
                ((self.received - start) / section.layout().bytes_per_splat.max(1))
                    .min(section.max_splat_count())
            } else {
                0
            };
            loaded.push((complete, section.splat_count()));
        }

        let mut total = 0;
        let mut section_count = 0;
        for (i, &(complete, current)) in loaded.iter().enumerate() {
            if complete > current {
                buffer.update_section_loaded_counts(i, complete)?;
            }
            if complete > 0 {
                section_count = i + 1;
            }
            total += complete;
        }
        if total > buffer.splat_count() || section_count > buffer.section_count() {
            buffer.update_loaded_counts(section_count, total)?;
            tracing::trace!(splats = total, sections = section_count, "published loaded counts");
        }
        Ok(())
    }

    /// Returns the buffer once every byte has arrived.
    pub fn finish(self) -> Result<SplatBuffer, SplatBufferError> {
        match self.buffer {
            Some(buffer) if self.received >= buffer.total_size() => Ok(buffer),
            Some(buffer) => Err(SplatBufferError::Truncated {
                needed: buffer.total_size(),
                available: self.received,
            }),
            None => Err(SplatBufferError::Truncated {
                needed: SplatBuffer::header_region_size(&self.staged).unwrap_or(HEADER_SIZE_BYTES),
                available: self.staged.len(),
            }),
        }
    }
}
