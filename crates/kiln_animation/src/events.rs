//! Animation events.
//!
//! Nodes carry an event blob: a packed sequence of records
//!
//! ```text
//! type: u32 | size: u16 | rel_time: u16 | payload: [u8; size]
//! ```
//!
//! where `rel_time` is the position within the clip scaled to `0..=0xffff`.
//! When playback crosses a record, the whole record is copied into the
//! runtime's event stream, from which the host reads it back with
//! [`EventIter`].

use kiln_core::{OutputMemoryStream, StableHash};

/// Size of the record header preceding the payload.
pub const EVENT_HEADER_SIZE: usize = 8;

/// Largest `rel_time`, i.e. the very end of the clip.
pub const EVENT_TIME_MAX: u16 = 0xffff;

/// One decoded event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationEvent<'a> {
    pub type_hash: u32,
    pub rel_time: u16,
    pub payload: &'a [u8],
}

impl AnimationEvent<'_> {
    /// Position within the clip in `[0, 1]`.
    #[must_use]
    pub fn relative_time(&self) -> f32 {
        f32::from(self.rel_time) / f32::from(EVENT_TIME_MAX)
    }
}

/// Type tag for events named `name`.
#[must_use]
pub fn event_type(name: &str) -> u32 {
    StableHash::of_str(name).low_u32()
}

/// Builds an event blob for a node.
#[derive(Debug, Default)]
pub struct EventWriter {
    blob: OutputMemoryStream,
}

impl EventWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. `relative_time` is clamped to `[0, 1]`.
    #[must_use]
    pub fn event(mut self, type_hash: u32, relative_time: f32, payload: &[u8]) -> Self {
        let rel_time = (relative_time.clamp(0.0, 1.0) * f32::from(EVENT_TIME_MAX)).round() as u16;
        debug_assert!(payload.len() <= usize::from(u16::MAX), "event payload too large");
        self.blob.write(&type_hash);
        self.blob.write(&(payload.len() as u16));
        self.blob.write(&rel_time);
        self.blob.write_bytes(payload);
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.blob.into_inner()
    }
}

/// Iterates the records of an event blob or of a runtime's event stream.
/// Stops at the first truncated record.
#[derive(Debug, Clone)]
pub struct EventIter<'a> {
    data: &'a [u8],
}

impl<'a> EventIter<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for EventIter<'a> {
    type Item = AnimationEvent<'a>;

    fn next(&mut self) -> Option<AnimationEvent<'a>> {
        if self.data.len() < EVENT_HEADER_SIZE {
            return None;
        }
        let type_hash: u32 = bytemuck::pod_read_unaligned(&self.data[0..4]);
        let size: u16 = bytemuck::pod_read_unaligned(&self.data[4..6]);
        let rel_time: u16 = bytemuck::pod_read_unaligned(&self.data[6..8]);
        let end = EVENT_HEADER_SIZE + usize::from(size);
        if self.data.len() < end {
            log::warn!("Truncated animation event record");
            self.data = &[];
            return None;
        }
        let payload = &self.data[EVENT_HEADER_SIZE..end];
        self.data = &self.data[end..];
        Some(AnimationEvent {
            type_hash,
            rel_time,
            payload,
        })
    }
}

/// Copies every record of `blob` with `from <= rel_time < to` (or
/// `rel_time >= from` when `to_inclusive_end` is set) into `out`.
pub(crate) fn copy_events_in_window(blob: &[u8], from: u16, to: u16, to_inclusive_end: bool, out: &mut OutputMemoryStream) {
    let mut rest = blob;
    while rest.len() >= EVENT_HEADER_SIZE {
        let size: u16 = bytemuck::pod_read_unaligned(&rest[4..6]);
        let rel_time: u16 = bytemuck::pod_read_unaligned(&rest[6..8]);
        let end = (EVENT_HEADER_SIZE + usize::from(size)).min(rest.len());
        let in_window = rel_time >= from && (to_inclusive_end || rel_time < to);
        if in_window {
            out.write_bytes(&rest[..end]);
        }
        rest = &rest[end..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_decode_in_order() {
        let blob = EventWriter::new()
            .event(event_type("footstep"), 0.25, &[1, 2])
            .event(event_type("sound"), 0.75, &[])
            .build();
        let events: Vec<_> = EventIter::new(&blob).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_hash, event_type("footstep"));
        assert_eq!(events[0].payload, &[1, 2]);
        assert!((events[1].relative_time() - 0.75).abs() < 1e-4);
    }

    #[test]
    fn window_is_half_open() {
        let blob = EventWriter::new()
            .event(1, 0.0, &[])
            .event(2, 0.5, &[])
            .event(3, 1.0, &[])
            .build();
        let mut out = OutputMemoryStream::new();
        copy_events_in_window(&blob, 0, 0x7fff, false, &mut out);
        let types: Vec<u32> = EventIter::new(out.data()).map(|e| e.type_hash).collect();
        assert_eq!(types, vec![1]);

        out.clear();
        copy_events_in_window(&blob, 0x7fff, 0, true, &mut out);
        let types: Vec<u32> = EventIter::new(out.data()).map(|e| e.type_hash).collect();
        assert_eq!(types, vec![2, 3]);
    }
}
