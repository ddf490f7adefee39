//! # Voice Allocation
//!
//! Legacy multi-voice synthesizers have a small pool of hardware voices that
//! are shared by all sixteen MIDI channels. [`VoiceAllocator`] hands voices
//! out per `(channel, pitch)` and takes them back on note-off.
//!
//! ## Rules
//!
//! - An empty pool makes [`VoiceAllocator::allocate`] return `None`. The
//!   caller skips the note; running out of polyphony never stops playback.
//! - Retriggering a pitch that is still sounding on the same channel evicts
//!   the voice that held it, so a `(channel, pitch)` pair never owns two
//!   voices at once.
//! - Each voice remembers the patch loaded into it. An allocation reports
//!   the patch to load only when the voice holds a different one.
//! - The percussion channel always plays on one reserved voice that is kept
//!   out of the pool: [`PERCUSSION_VOICE`], or the last voice when the synth
//!   has fewer voices than that.
//!
//! ## Example
//! ```rust
//! use soundcard::voices::VoiceAllocator;
//!
//! // voice 2 is reserved for percussion
//! let mut voices = VoiceAllocator::new(3);
//! assert!(voices.allocate(0, 60).is_some());
//! assert!(voices.allocate(0, 64).is_some());
//! assert!(voices.allocate(0, 67).is_none());
//! ```

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::event::{NUM_CHANNELS, PERCUSSION_CHANNEL};

/// Index of one hardware voice.
pub type VoiceSlot = u8;

/// Voice reserved for the percussion channel on synths with more than nine
/// voices.
pub const PERCUSSION_VOICE: VoiceSlot = 9;

/// Result of a successful [`VoiceAllocator::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub voice: VoiceSlot,
    /// Voice that was playing the same pitch on the same channel. The caller
    /// must stop the note on it.
    pub evicted: Option<VoiceSlot>,
    /// Patch the caller must load into `voice` before starting the note.
    pub set_patch: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct VoiceAllocator {
    free: Vec<VoiceSlot>,
    voice_patch: Vec<u8>,
    channel_patch: [u8; NUM_CHANNELS as usize],
    /// Per channel: sounding pitch -> voice.
    sounding: Vec<HashMap<u8, VoiceSlot>>,
    percussion: Option<VoiceSlot>,
    /// Pitches sounding on the percussion voice.
    drums: HashSet<u8>,
}

impl VoiceAllocator {
    /// An allocator over voices `0..num_voices`, every voice holding patch 0.
    pub fn new(num_voices: usize) -> Self {
        let mut allocator = VoiceAllocator {
            free: Vec::new(),
            voice_patch: Vec::new(),
            channel_patch: [0; NUM_CHANNELS as usize],
            sounding: vec![HashMap::new(); NUM_CHANNELS as usize],
            percussion: None,
            drums: HashSet::new(),
        };
        allocator.reset(num_voices);
        allocator
    }

    /// Return every voice to the pool and forget all channel state.
    pub fn reset(&mut self, num_voices: usize) {
        let num_voices = num_voices.min(VoiceSlot::MAX as usize + 1);
        self.percussion = match num_voices {
            0 => None,
            n if n > PERCUSSION_VOICE as usize => Some(PERCUSSION_VOICE),
            n => Some((n - 1) as VoiceSlot),
        };
        self.free = (0..num_voices)
            .map(|v| v as VoiceSlot)
            .filter(|&v| Some(v) != self.percussion)
            .collect();
        self.voice_patch = vec![0; num_voices];
        self.channel_patch = [0; NUM_CHANNELS as usize];
        self.clear();
    }

    /// Forget which notes are sounding without touching patches.
    pub fn clear(&mut self) {
        self.drums.clear();
        for notes in &mut self.sounding {
            for (_, voice) in notes.drain() {
                self.free.push(voice);
            }
        }
    }

    pub fn num_voices(&self) -> usize {
        self.voice_patch.len()
    }

    /// Voices left in the general pool.
    pub fn free_voices(&self) -> usize {
        self.free.len()
    }

    /// The voice the percussion channel plays on, if the synth has any.
    pub fn percussion_voice(&self) -> Option<VoiceSlot> {
        self.percussion
    }

    pub fn set_channel_patch(&mut self, channel: u8, patch: u8) {
        self.channel_patch[channel as usize] = patch;
    }

    pub fn channel_patch(&self, channel: u8) -> u8 {
        self.channel_patch[channel as usize]
    }

    /// Take a voice for `pitch` on `channel`, or `None` if the pool is empty.
    pub fn allocate(&mut self, channel: u8, pitch: u8) -> Option<Allocation> {
        if channel == PERCUSSION_CHANNEL {
            let voice = self.percussion?;
            self.drums.insert(pitch);
            return Some(Allocation {
                voice,
                evicted: None,
                set_patch: None,
            });
        }
        let Some(voice) = self.free.pop() else {
            debug!(channel, pitch, "out of voices");
            return None;
        };
        let notes = &mut self.sounding[channel as usize];
        let evicted = notes.remove(&pitch);
        if let Some(old) = evicted {
            self.free.push(old);
        }
        notes.insert(pitch, voice);

        let wanted = self.channel_patch[channel as usize];
        let loaded = &mut self.voice_patch[voice as usize];
        let set_patch = if *loaded != wanted {
            *loaded = wanted;
            Some(wanted)
        } else {
            None
        };
        Some(Allocation { voice, evicted, set_patch })
    }

    /// Release the voice playing `pitch` on `channel`, if any.
    pub fn free(&mut self, channel: u8, pitch: u8) -> Option<VoiceSlot> {
        if channel == PERCUSSION_CHANNEL {
            return self.drums.remove(&pitch).then_some(self.percussion).flatten();
        }
        let voice = self.sounding[channel as usize].remove(&pitch)?;
        self.free.push(voice);
        Some(voice)
    }

    pub fn voice_for(&self, channel: u8, pitch: u8) -> Option<VoiceSlot> {
        if channel == PERCUSSION_CHANNEL {
            return self.drums.contains(&pitch).then_some(self.percussion).flatten();
        }
        self.sounding[channel as usize].get(&pitch).copied()
    }

    /// Number of `(channel, pitch)` pairs currently holding a voice.
    pub fn sounding_count(&self) -> usize {
        self.sounding.iter().map(HashMap::len).sum::<usize>() + self.drums.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pool_exhaustion_returns_none() {
        let mut voices = VoiceAllocator::new(3);
        assert!(voices.allocate(0, 60).is_some());
        assert!(voices.allocate(0, 64).is_some());
        assert_eq!(voices.allocate(0, 67), None);
        assert_eq!(voices.sounding_count(), 2);
    }

    #[test]
    fn test_voices_popped_from_end() {
        let mut voices = VoiceAllocator::new(4);
        assert_eq!(voices.allocate(0, 60).unwrap().voice, 2);
        assert_eq!(voices.allocate(0, 62).unwrap().voice, 1);
    }

    #[test]
    fn test_retrigger_evicts_previous_voice() {
        let mut voices = VoiceAllocator::new(4);
        let first = voices.allocate(1, 60).unwrap();
        let second = voices.allocate(1, 60).unwrap();
        assert_eq!(second.evicted, Some(first.voice));
        assert_ne!(second.voice, first.voice);
        assert_eq!(voices.voice_for(1, 60), Some(second.voice));
        assert_eq!(voices.sounding_count(), 1);
        assert_eq!(voices.free_voices(), 2);
    }

    #[test]
    fn test_free_unknown_pair_is_tolerated() {
        let mut voices = VoiceAllocator::new(4);
        assert_eq!(voices.free(0, 60), None);
        let a = voices.allocate(0, 60).unwrap();
        assert_eq!(voices.free(0, 60), Some(a.voice));
        assert_eq!(voices.free(0, 60), None);
        assert_eq!(voices.free_voices(), 3);
    }

    #[test]
    fn test_patch_loaded_only_when_different() {
        let mut voices = VoiceAllocator::new(2);
        assert_eq!(voices.allocate(0, 60).unwrap().set_patch, None);
        voices.free(0, 60);
        voices.set_channel_patch(0, 40);
        assert_eq!(voices.allocate(0, 60).unwrap().set_patch, Some(40));
        voices.free(0, 60);
        assert_eq!(voices.allocate(0, 62).unwrap().set_patch, None);
        voices.free(0, 62);
        assert_eq!(voices.allocate(3, 62).unwrap().set_patch, Some(0));
    }

    #[test]
    fn test_percussion_uses_reserved_voice() {
        let mut voices = VoiceAllocator::new(16);
        assert_eq!(voices.percussion_voice(), Some(PERCUSSION_VOICE));
        assert_eq!(voices.free_voices(), 15);
        let a = voices.allocate(PERCUSSION_CHANNEL, 38).unwrap();
        assert_eq!(a.voice, PERCUSSION_VOICE);
        assert_eq!(voices.free_voices(), 15);
        assert_eq!(voices.voice_for(PERCUSSION_CHANNEL, 38), Some(PERCUSSION_VOICE));
        assert_eq!(voices.free(PERCUSSION_CHANNEL, 38), Some(PERCUSSION_VOICE));
        assert_eq!(voices.sounding_count(), 0);
    }

    #[test]
    fn test_melodic_notes_never_take_percussion_voice() {
        let mut voices = VoiceAllocator::new(16);
        for pitch in 0..15 {
            let a = voices.allocate(0, 40 + pitch).unwrap();
            assert_ne!(a.voice, PERCUSSION_VOICE);
        }
        assert_eq!(voices.allocate(0, 80), None);
        assert_eq!(voices.allocate(PERCUSSION_CHANNEL, 46).unwrap().voice, PERCUSSION_VOICE);
    }

    #[test]
    fn test_small_synth_reserves_last_voice() {
        let mut voices = VoiceAllocator::new(9);
        assert_eq!(voices.percussion_voice(), Some(8));
        assert_eq!(voices.free_voices(), 8);
        assert_eq!(voices.allocate(PERCUSSION_CHANNEL, 38).unwrap().voice, 8);
        for pitch in 0..8 {
            assert_ne!(voices.allocate(1, 50 + pitch).unwrap().voice, 8);
        }

        let mut none = VoiceAllocator::new(0);
        assert_eq!(none.percussion_voice(), None);
        assert_eq!(none.allocate(PERCUSSION_CHANNEL, 38), None);
    }

    #[test]
    fn test_free_silent_drum_is_none() {
        let mut voices = VoiceAllocator::new(16);
        assert_eq!(voices.free(PERCUSSION_CHANNEL, 38), None);
        voices.allocate(PERCUSSION_CHANNEL, 38);
        voices.allocate(PERCUSSION_CHANNEL, 42);
        assert_eq!(voices.sounding_count(), 2);
        assert_eq!(voices.free(PERCUSSION_CHANNEL, 42), Some(PERCUSSION_VOICE));
        assert_eq!(voices.free(PERCUSSION_CHANNEL, 42), None);
        voices.clear();
        assert_eq!(voices.free(PERCUSSION_CHANNEL, 38), None);
        assert_eq!(voices.free_voices(), 15);
    }

    #[test]
    fn test_reset_and_clear() {
        let mut voices = VoiceAllocator::new(3);
        voices.set_channel_patch(2, 5);
        voices.allocate(2, 60);
        voices.allocate(2, 61);
        voices.clear();
        assert_eq!(voices.sounding_count(), 0);
        assert_eq!(voices.free_voices(), 2);
        assert_eq!(voices.channel_patch(2), 5);
        voices.reset(8);
        assert_eq!(voices.num_voices(), 8);
        assert_eq!(voices.channel_patch(2), 0);
    }

    #[test]
    fn test_allocation_succeeds_within_capacity() {
        // one of the six voices is reserved for percussion
        let n = 5;
        let mut voices = VoiceAllocator::new(n + 1);
        let mut sounding: Vec<(u8, u8)> = Vec::new();
        let mut seed: u32 = 12345;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let channel = ((seed >> 8) % 4) as u8;
            let pitch = 60 + ((seed >> 16) % 8) as u8;
            let release = (seed >> 24) % 2 == 0;
            if release || sounding.len() == n {
                if let Some(pos) = sounding.iter().position(|&p| p == (channel, pitch)) {
                    sounding.remove(pos);
                    assert!(voices.free(channel, pitch).is_some());
                } else if let Some((c, p)) = sounding.pop() {
                    assert!(voices.free(c, p).is_some());
                }
                continue;
            }
            let a = voices.allocate(channel, pitch);
            assert!(a.is_some(), "allocation failed with {} sounding", sounding.len());
            if a.and_then(|a| a.evicted).is_none() {
                sounding.push((channel, pitch));
            }
            assert_eq!(voices.sounding_count(), sounding.len());

            let mut used = HashSet::new();
            for &(c, p) in &sounding {
                assert!(used.insert(voices.voice_for(c, p).unwrap()));
            }
        }
    }
}
