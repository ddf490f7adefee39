//! MIDI channel bookkeeping used while merging tracks
//!
//! Tracks ask for a channel by `(patch, volume)`. Notes with the same patch
//! and volume share a channel as long as the pitch is not already sounding
//! there; otherwise another channel is taken from the free list, and when the
//! free list is empty a silent channel allocated for a different
//! `(patch, volume)` is recycled.

use std::collections::{HashSet, VecDeque};

use crate::event::{NUM_CHANNELS, PERCUSSION_CHANNEL};

#[derive(Debug, Default, Clone)]
struct MidiChannel {
    tones: HashSet<u8>,
    patch: Option<u8>,
    volume: Option<u8>,
}

impl MidiChannel {
    fn is_silent(&self) -> bool {
        self.tones.is_empty()
    }
}

type ChannelKey = (u8, u8);

#[derive(Debug)]
pub(crate) struct ChannelDevice {
    free: VecDeque<u8>,
    /// Allocated channels per `(patch, volume)`, in allocation order.
    allocated: Vec<(ChannelKey, Vec<u8>)>,
    channels: Vec<MidiChannel>,
}

impl ChannelDevice {
    /// `limit` melodic channels are handed out. The percussion channel is
    /// never given to melodic tracks.
    pub(crate) fn new(limit: u8) -> Self {
        let limit = limit.min(NUM_CHANNELS);
        let free = if limit > PERCUSSION_CHANNEL {
            (0..limit).filter(|c| *c != PERCUSSION_CHANNEL).collect()
        } else {
            (0..limit).collect()
        };
        ChannelDevice {
            free,
            allocated: Vec::new(),
            channels: vec![MidiChannel::default(); NUM_CHANNELS as usize],
        }
    }

    /// The channel a melodic note with this patch and volume should play on,
    /// or `None` when every channel is busy.
    pub(crate) fn require_channel(&mut self, pitch: u8, patch: u8, volume: u8) -> Option<u8> {
        let key = (patch, volume);
        if let Some(pos) = self.allocated.iter().position(|(k, _)| *k == key) {
            let reusable = self.allocated[pos]
                .1
                .iter()
                .copied()
                .find(|ch| !self.channels[*ch as usize].tones.contains(&pitch));
            if reusable.is_some() {
                return reusable;
            }
            // the pitch sounds on every channel of this key
            let channel = self.alloc_channel()?;
            // alloc_channel may have removed entries, so look the key up again
            match self.allocated.iter_mut().find(|(k, _)| *k == key) {
                Some((_, list)) => list.push(channel),
                None => self.allocated.push((key, vec![channel])),
            }
            Some(channel)
        } else {
            let channel = self.alloc_channel()?;
            self.allocated.push((key, vec![channel]));
            Some(channel)
        }
    }

    fn alloc_channel(&mut self) -> Option<u8> {
        if let Some(channel) = self.free.pop_front() {
            return Some(channel);
        }
        for entry in 0..self.allocated.len() {
            let silent = self.allocated[entry]
                .1
                .iter()
                .position(|ch| self.channels[*ch as usize].is_silent());
            if let Some(idx) = silent {
                let channel = self.allocated[entry].1.remove(idx);
                if self.allocated[entry].1.is_empty() {
                    self.allocated.remove(entry);
                }
                return Some(channel);
            }
        }
        None
    }

    pub(crate) fn start_note(&mut self, channel: u8, pitch: u8) {
        let inserted = self.channels[channel as usize].tones.insert(pitch);
        debug_assert!(inserted, "pitch {} already sounding on channel {}", pitch, channel);
    }

    pub(crate) fn stop_note(&mut self, channel: u8, pitch: u8) {
        let removed = self.channels[channel as usize].tones.remove(&pitch);
        debug_assert!(removed, "pitch {} not sounding on channel {}", pitch, channel);
    }

    pub(crate) fn is_playing(&self, channel: u8, pitch: u8) -> bool {
        self.channels[channel as usize].tones.contains(&pitch)
    }

    /// Record `patch` as loaded on `channel`. Returns true if it changed.
    pub(crate) fn update_patch(&mut self, channel: u8, patch: u8) -> bool {
        let slot = &mut self.channels[channel as usize].patch;
        let changed = *slot != Some(patch);
        *slot = Some(patch);
        changed
    }

    /// Record `volume` as set on `channel`. Returns true if it changed.
    pub(crate) fn update_volume(&mut self, channel: u8, volume: u8) -> bool {
        let slot = &mut self.channels[channel as usize].volume;
        let changed = *slot != Some(volume);
        *slot = Some(volume);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_channel_sequence() {
        let mut dev = ChannelDevice::new(NUM_CHANNELS);
        assert_eq!(dev.require_channel(60, 0, 100), Some(0));
        dev.start_note(0, 60);
        assert_eq!(dev.require_channel(61, 1, 100), Some(1));
        dev.start_note(1, 61);
        assert_eq!(dev.require_channel(62, 1, 70), Some(2));
        dev.start_note(2, 62);
        assert_eq!(dev.require_channel(63, 0, 100), Some(0));
        dev.start_note(0, 63);
        // same pitch as the one sounding on channel 0
        assert_eq!(dev.require_channel(63, 0, 100), Some(3));
        dev.start_note(3, 63);
        dev.stop_note(0, 60);
        dev.stop_note(1, 61);
        dev.stop_note(2, 62);
        dev.stop_note(0, 63);
        assert_eq!(dev.require_channel(63, 0, 100), Some(0));
    }

    #[test]
    fn test_percussion_channel_is_reserved() {
        let mut dev = ChannelDevice::new(NUM_CHANNELS);
        let mut seen = Vec::new();
        for patch in 0..15 {
            let ch = dev.require_channel(60, patch, 100).unwrap();
            dev.start_note(ch, 60);
            seen.push(ch);
        }
        assert!(!seen.contains(&PERCUSSION_CHANNEL));
        assert_eq!(dev.require_channel(60, 20, 100), None);
    }

    #[test]
    fn test_recycles_silent_channel() {
        let mut dev = ChannelDevice::new(1);
        assert_eq!(dev.require_channel(60, 0, 100), Some(0));
        dev.start_note(0, 60);
        assert_eq!(dev.require_channel(62, 5, 100), None);
        dev.stop_note(0, 60);
        assert_eq!(dev.require_channel(62, 5, 100), Some(0));
    }

    #[test]
    fn test_patch_and_volume_tracking() {
        let mut dev = ChannelDevice::new(NUM_CHANNELS);
        assert!(dev.update_patch(0, 3));
        assert!(!dev.update_patch(0, 3));
        assert!(dev.update_volume(0, 100));
        assert!(dev.update_volume(0, 90));
    }
}
