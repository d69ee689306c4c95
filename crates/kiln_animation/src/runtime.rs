//! Per-instance blend-tree state.
//!
//! A [`RuntimeContext`] holds everything one animated entity needs to run a
//! shared [`Controller`]: input values, the animation set in use and the
//! packed node state.
//!
//! Node state lives in two byte buffers that are traversed in the same order
//! by every pass:
//!
//! - `input_runtime` holds the state written by the previous pass and is
//!   consumed with [`RuntimeReader::read`] / [`RuntimeReader::skip`]
//! - `data` receives the state the current `update` pass writes
//!
//! At the start of an update the two buffers are swapped, so no allocation
//! happens in steady state.

use std::sync::Arc;

use bytemuck::AnyBitPattern;
use kiln_core::{LocalRigidTransform, OutputMemoryStream, Time};

use crate::animation::Animation;
use crate::controller::Controller;
use crate::events::EventIter;
use crate::input::InputValue;
use crate::model::{BoneMask, BoneNameHash, Model};
use crate::resource::ResourceRef;

/// Read cursor over the node state written by the previous pass.
///
/// Reads never fail: running past the end is a tree traversal bug, caught by
/// a debug assertion and otherwise answered with zeroed values.
#[derive(Debug, Default)]
pub struct RuntimeReader {
    data: Vec<u8>,
    pos: usize,
}

impl RuntimeReader {
    fn bytes(&self, size: usize) -> Option<&[u8]> {
        let end = self.pos + size;
        debug_assert!(end <= self.data.len(), "runtime data underflow at {}", self.pos);
        self.data.get(self.pos..end)
    }

    pub fn read<T: AnyBitPattern>(&mut self) -> T {
        let value = self.peek();
        self.skip(std::mem::size_of::<T>());
        value
    }

    /// Reads a value without advancing.
    #[must_use]
    pub fn peek<T: AnyBitPattern>(&self) -> T {
        self.bytes(std::mem::size_of::<T>())
            .map_or_else(T::zeroed, bytemuck::pod_read_unaligned)
    }

    pub fn skip(&mut self, size: usize) {
        self.pos = (self.pos + size).min(self.data.len());
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Takes ownership of `out`'s bytes, handing the reader's old buffer
    /// back to `out` cleared.
    pub(crate) fn take_from(&mut self, out: &mut OutputMemoryStream) {
        self.data.clear();
        out.swap_buffer(&mut self.data);
        self.pos = 0;
    }

    /// Rewinds onto a copy of `bytes`.
    pub(crate) fn copy_from(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.pos = 0;
    }
}

/// Runtime state of one controller instance.
#[derive(Debug)]
pub struct RuntimeContext {
    pub controller: Arc<Controller>,
    /// Node state written by the current pass.
    pub data: OutputMemoryStream,
    /// Node state written by the previous pass.
    pub input_runtime: RuntimeReader,
    /// One value per controller input.
    pub inputs: Vec<InputValue>,
    /// Animation bound to each slot by the active set.
    pub animations: Vec<Option<ResourceRef<Animation>>>,
    /// Event records emitted by the last update.
    pub events: OutputMemoryStream,
    pub model: Option<Arc<Model>>,
    pub time_delta: Time,
    pub root_bone_hash: Option<BoneNameHash>,
    /// Root motion accumulated by the last update.
    pub root_motion: LocalRigidTransform,
}

impl RuntimeContext {
    /// Creates a context with default input values and the animations of
    /// `set` bound. Node state is empty until the tree is entered.
    #[must_use]
    pub fn new(controller: Arc<Controller>, set: u32) -> Self {
        let inputs = controller.inputs().iter().map(|i| i.ty.default_value()).collect();
        let root_bone_hash = controller.root_motion_bone();
        let mut ctx = Self {
            controller,
            data: OutputMemoryStream::new(),
            input_runtime: RuntimeReader::default(),
            inputs,
            animations: Vec::new(),
            events: OutputMemoryStream::new(),
            model: None,
            time_delta: Time::ZERO,
            root_bone_hash,
            root_motion: LocalRigidTransform::IDENTITY,
        };
        ctx.apply_set(set);
        ctx
    }

    /// Rebinds every slot to the animation `set` assigns to it.
    pub fn apply_set(&mut self, set: u32) {
        self.animations.clear();
        self.animations.resize(self.controller.animation_slots().len(), None);
        for entry in self.controller.animation_entries() {
            if entry.set != set {
                continue;
            }
            if let Some(slot) = self.animations.get_mut(entry.slot as usize) {
                *slot = Some(entry.animation.clone());
            }
        }
    }

    /// The loaded animation in `slot`, if any.
    #[must_use]
    pub fn animation(&self, slot: u32) -> Option<Arc<Animation>> {
        self.animations.get(slot as usize)?.as_ref()?.get()
    }

    /// Value of a numeric input, `0.0` for an unknown index.
    #[must_use]
    pub fn input_f32(&self, index: u32) -> f32 {
        self.inputs.get(index as usize).map_or(0.0, |v| v.as_f32())
    }

    /// Writes an input, refusing values of the wrong type.
    pub fn set_input(&mut self, index: u32, value: InputValue) -> bool {
        match self.inputs.get_mut(index as usize) {
            Some(current) if current.ty() == value.ty() => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn bone_mask(&self, index: u32) -> Option<&BoneMask> {
        self.controller.bone_masks().get(index as usize)
    }

    /// Events emitted by the last update.
    #[must_use]
    pub fn events(&self) -> EventIter<'_> {
        EventIter::new(self.events.data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_consumes_and_recycles() {
        let mut out = OutputMemoryStream::new();
        out.write(&Time::ONE_SECOND);
        out.write(&7u32);

        let mut reader = RuntimeReader::default();
        reader.take_from(&mut out);
        assert!(out.is_empty());
        assert_eq!(reader.peek::<Time>(), Time::ONE_SECOND);
        assert_eq!(reader.read::<Time>(), Time::ONE_SECOND);
        assert_eq!(reader.read::<u32>(), 7);
        assert!(reader.is_at_end());

        reader.copy_from(&[1, 0, 0, 0]);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read::<u32>(), 1);
    }
}
