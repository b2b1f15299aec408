//! Shared sample buffers.
//!
//! [`SampleRing`] is the flat receive-side buffer over the absolute channel
//! space: one slot is 128 channels x 3 bytes, indexed by sample clock modulo
//! the ring length, so disjoint sessions compose non-overlapping channel
//! ranges in one buffer presented to the application. [`TxFrame`] is the
//! per-transmit-session double frame buffer the application fills during
//! its callback.

use std::sync::Mutex;

use crate::error::{AoipError, AoipResult};

/// Width of the absolute channel space.
pub const MAX_CHANNELS: usize = 128;

/// Maximum sample width in bytes.
pub const MAX_BYTE_DEPTH: usize = 3;

/// Bytes per ring slot: one sample across the whole channel space.
pub const SLOT_BYTES: usize = MAX_CHANNELS * MAX_BYTE_DEPTH;

/// Minimum ring depth in sample slots; also the sample-delay quantum.
pub const MIN_RING_SLOTS: usize = 16;

/// Minimum buffer size the caller must supply (16 x 128 x 3 bytes).
pub const MIN_BUFFER_LEN: usize = MIN_RING_SLOTS * SLOT_BYTES;

/// Receive-side sample ring over the absolute channel space.
///
/// Packet writes and callback reads each hold the lock for one memcpy, so
/// neither side blocks the other for longer than that. Samples narrower
/// than 3 bytes are stored left-aligned in their slot.
pub struct SampleRing {
    data: Mutex<Vec<u8>>,
    slots: usize,
}

impl SampleRing {
    /// Wraps a caller-supplied buffer. The length must be at least
    /// [`MIN_BUFFER_LEN`], a whole number of slots, and a multiple of 16
    /// slots so delay offsets stay quantum-aligned.
    pub fn from_buffer(buffer: Vec<u8>) -> AoipResult<Self> {
        if buffer.len() < MIN_BUFFER_LEN {
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample buffer smaller than 16x128x3 bytes",
            });
        }
        if buffer.len() % SLOT_BYTES != 0 {
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample buffer is not a whole number of channel slots",
            });
        }
        let slots = buffer.len() / SLOT_BYTES;
        if slots % MIN_RING_SLOTS != 0 {
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample buffer slot count is not a multiple of 16",
            });
        }
        Ok(Self {
            data: Mutex::new(buffer),
            slots,
        })
    }

    /// Ring depth in sample slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Writes one packet's worth of interleaved samples at the position
    /// implied by the sample clock and the session's absolute channel
    /// offset.
    pub fn write_samples(
        &self,
        timestamp: u32,
        channel_offset: u8,
        channels: u8,
        byte_depth: u8,
        payload: &[u8],
    ) -> AoipResult<()> {
        let stride = channels as usize * byte_depth as usize;
        if stride == 0 || payload.len() % stride != 0 {
            return Err(AoipError::MalformedPacket {
                actual: payload.len(),
                required: stride.max(1),
            });
        }
        if channel_offset as usize + channels as usize > MAX_CHANNELS
            || byte_depth as usize > MAX_BYTE_DEPTH
        {
            return Err(AoipError::MalformedPacket {
                actual: payload.len(),
                required: 0,
            });
        }

        let samples = payload.len() / stride;
        let mut data = self.data.lock().unwrap();
        for i in 0..samples {
            let slot = (timestamp as usize + i) % self.slots;
            let src_base = i * stride;
            for ch in 0..channels as usize {
                let src = src_base + ch * byte_depth as usize;
                let dst = slot * SLOT_BYTES + (channel_offset as usize + ch) * MAX_BYTE_DEPTH;
                data[dst..dst + byte_depth as usize]
                    .copy_from_slice(&payload[src..src + byte_depth as usize]);
            }
        }
        Ok(())
    }

    /// Reads `samples` consecutive samples of one absolute channel starting
    /// at the given sample-clock position.
    pub fn read_channel(
        &self,
        timestamp: u32,
        channel: u8,
        byte_depth: u8,
        samples: usize,
    ) -> AoipResult<Vec<u8>> {
        if channel as usize >= MAX_CHANNELS || byte_depth as usize > MAX_BYTE_DEPTH {
            return Err(AoipError::ConfigurationInvalid {
                reason: "channel or byte depth outside the 128x3 channel space",
            });
        }
        let data = self.data.lock().unwrap();
        let mut out = Vec::with_capacity(samples * byte_depth as usize);
        for i in 0..samples {
            let slot = (timestamp as usize + i) % self.slots;
            let base = slot * SLOT_BYTES + channel as usize * MAX_BYTE_DEPTH;
            out.extend_from_slice(&data[base..base + byte_depth as usize]);
        }
        Ok(out)
    }

    /// Runs `f` over the raw ring contents. The callback contract applies:
    /// touch only the quantum-aligned region you own for the current firing.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock().unwrap())
    }
}

/// Double-buffered transmit frame for one transmit session.
///
/// The application fills the front slot during its callback while the
/// packetizer drains the slot filled during the previous quantum, so the
/// two never touch the same bytes.
pub struct TxFrame {
    slots: [Mutex<Vec<u8>>; 2],
}

impl TxFrame {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            slots: [
                Mutex::new(vec![0u8; frame_bytes]),
                Mutex::new(vec![0u8; frame_bytes]),
            ],
        }
    }

    /// Gives the application mutable access to one buffer slot.
    pub fn fill(&self, slot: usize, f: impl FnOnce(&mut [u8])) {
        f(&mut self.slots[slot % 2].lock().unwrap());
    }

    /// Copies a slot out for packetization.
    pub fn snapshot(&self, slot: usize) -> Vec<u8> {
        self.slots[slot % 2].lock().unwrap().clone()
    }
}
