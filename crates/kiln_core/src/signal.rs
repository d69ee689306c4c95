//! Multicast callbacks.

/// Handle returned by [`Signal::connect`], used to disconnect later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = Box<dyn FnMut(&T) + Send + Sync>;

/// A list of callbacks invoked in connection order.
pub struct Signal<T> {
    slots: Vec<(SlotId, Slot<T>)>,
    next_id: u64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("slots", &self.slots.len()).finish()
    }
}

impl<T> Signal<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&mut self, callback: F) -> SlotId
    where
        F: FnMut(&T) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id);
        self.next_id += 1;
        self.slots.push((id, Box::new(callback)));
        id
    }

    /// Returns `false` if the slot was not connected.
    pub fn disconnect(&mut self, id: SlotId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot, _)| *slot != id);
        self.slots.len() != before
    }

    pub fn invoke(&mut self, value: &T) {
        for (_, slot) in &mut self.slots {
            slot(value);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn disconnected_slot_stops_firing() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut signal = Signal::<u32>::new();
        let counter = hits.clone();
        let id = signal.connect(move |v| {
            counter.fetch_add(*v, Ordering::Relaxed);
        });
        signal.invoke(&2);
        assert!(signal.disconnect(id));
        signal.invoke(&5);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert!(!signal.disconnect(id));
    }
}
