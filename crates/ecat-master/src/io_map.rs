//! Process data image with per-slave regions.
//!
//! Slave regions are laid out contiguously in bus order. Region 0 is the
//! whole image, regions `1..=N` belong to the individual slaves.

use std::ops::Range;

/// Byte ranges of one slave inside the input and output buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoRegion {
    /// Range inside the input buffer.
    pub inputs: Range<usize>,
    /// Range inside the output buffer.
    pub outputs: Range<usize>,
}

/// Process data buffers for PDO exchange.
#[derive(Debug, Clone, Default)]
pub struct IoMap {
    /// Input data (slave → master).
    inputs: Vec<u8>,
    /// Output data (master → slave).
    outputs: Vec<u8>,
    /// Region 0 covers everything; slave regions follow.
    regions: Vec<IoRegion>,
}

impl IoMap {
    /// Build an image from `(input_bytes, output_bytes)` per slave, in bus order.
    pub fn new<I>(layout: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut regions = vec![IoRegion::default()];
        let mut input_offset = 0;
        let mut output_offset = 0;

        for (input_bytes, output_bytes) in layout {
            regions.push(IoRegion {
                inputs: input_offset..input_offset + input_bytes,
                outputs: output_offset..output_offset + output_bytes,
            });
            input_offset += input_bytes;
            output_offset += output_bytes;
        }

        regions[0] = IoRegion {
            inputs: 0..input_offset,
            outputs: 0..output_offset,
        };

        Self {
            inputs: vec![0; input_offset],
            outputs: vec![0; output_offset],
            regions,
        }
    }

    /// Number of slave regions.
    pub fn slave_count(&self) -> usize {
        self.regions.len().saturating_sub(1)
    }

    /// Total mapped bytes (inputs + outputs).
    pub fn mapped_bytes(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    /// Region of `slave` (0 = whole image).
    pub fn region(&self, slave: u16) -> Option<&IoRegion> {
        self.regions.get(usize::from(slave))
    }

    /// Input bytes of `slave`; empty if the slave is unknown.
    pub fn inputs(&self, slave: u16) -> &[u8] {
        self.region(slave)
            .and_then(|r| self.inputs.get(r.inputs.clone()))
            .unwrap_or(&[])
    }

    /// Input bytes of `slave`, mutably (the driver writes received data here).
    pub fn inputs_mut(&mut self, slave: u16) -> &mut [u8] {
        match self.regions.get(usize::from(slave)) {
            Some(r) => self.inputs.get_mut(r.inputs.clone()).unwrap_or(&mut []),
            None => &mut [],
        }
    }

    /// Output bytes of `slave`.
    pub fn outputs(&self, slave: u16) -> &[u8] {
        self.region(slave)
            .and_then(|r| self.outputs.get(r.outputs.clone()))
            .unwrap_or(&[])
    }

    /// Output bytes of `slave`, mutably (the application writes here).
    pub fn outputs_mut(&mut self, slave: u16) -> &mut [u8] {
        match self.regions.get(usize::from(slave)) {
            Some(r) => self.outputs.get_mut(r.outputs.clone()).unwrap_or(&mut []),
            None => &mut [],
        }
    }

    /// Read a byte from the input image.
    pub fn read_input_u8(&self, offset: usize) -> Option<u8> {
        self.inputs.get(offset).copied()
    }

    /// Read a u16 from the input image (little-endian).
    pub fn read_input_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.inputs.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Read a u32 from the input image (little-endian).
    pub fn read_input_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.inputs.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Write a byte to the output image. Out of range writes are ignored.
    pub fn write_output_u8(&mut self, offset: usize, value: u8) -> bool {
        self.write_output(offset, &[value])
    }

    /// Write a u16 to the output image (little-endian).
    pub fn write_output_u16(&mut self, offset: usize, value: u16) -> bool {
        self.write_output(offset, &value.to_le_bytes())
    }

    /// Write a u32 to the output image (little-endian).
    pub fn write_output_u32(&mut self, offset: usize, value: u32) -> bool {
        self.write_output(offset, &value.to_le_bytes())
    }

    fn write_output(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        match self.outputs.get_mut(offset..end) {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }
}
