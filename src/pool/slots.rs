/// Misuse of a [`ResultSlots`] buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot index {index} out of range for batch of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("slot {index} was already filled")]
    AlreadyFilled { index: usize },
    #[error("slot {index} was never filled")]
    Unfilled { index: usize },
}

/// Fixed-size buffer holding one outcome per batch position.
///
/// Every index is written at most once, so completion order never affects
/// the order of [`ResultSlots::into_results`].
#[derive(Debug)]
pub struct ResultSlots<T> {
    slots: Vec<Option<T>>,
    filled: usize,
}

impl<T> ResultSlots<T> {
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots, filled: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub fn fill(&mut self, index: usize, value: T) -> Result<(), SlotError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SlotError::OutOfRange { index, len })?;
        if slot.is_some() {
            return Err(SlotError::AlreadyFilled { index });
        }
        *slot = Some(value);
        self.filled += 1;
        Ok(())
    }

    /// Consumes the buffer, failing on the first unfilled position.
    pub fn into_results(self) -> Result<Vec<T>, SlotError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(SlotError::Unfilled { index }))
            .collect()
    }
}
