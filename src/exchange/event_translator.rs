//! Event translators
//!
//! A translator writes payload data into a claimed slot. The exchange claims
//! a sequence, hands the translator the pre-allocated event to mutate in
//! place, then publishes, so producers never see the claim/publish protocol
//! directly.

/// Writes payload data into a claimed event.
pub trait EventTranslator<T>: Send {
    /// Populate `event`, which currently holds whatever the previous lap of
    /// the ring left in the slot.
    fn translate_to(&self, event: &mut T, sequence: i64);
}

/// Translator backed by a closure.
pub struct ClosureEventTranslator<T, F>
where
    F: Fn(&mut T, i64) + Send,
{
    translator: F,
    _phantom: std::marker::PhantomData<fn(&mut T)>,
}

impl<T, F> ClosureEventTranslator<T, F>
where
    F: Fn(&mut T, i64) + Send,
{
    /// Create a translator from `translator`.
    pub fn new(translator: F) -> Self {
        Self {
            translator,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T, F> EventTranslator<T> for ClosureEventTranslator<T, F>
where
    T: Send,
    F: Fn(&mut T, i64) + Send,
{
    fn translate_to(&self, event: &mut T, sequence: i64) {
        (self.translator)(event, sequence)
    }
}
