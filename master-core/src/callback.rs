//! The event callback surface to the UC-channel driver (spec.md S6).

/// Communication lifecycle and topology events (spec.md S6 `on_event`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    StartCommunication,
    StopCommunication,
    RingBreak,
    RingClosed,
}

/// Implemented by the application/UC-channel driver. `on_event` is called
/// from ordinary task context; `on_event_from_isr` is the same signal
/// raised from inside cyclic processing, which spec.md S5 requires to stay
/// non-blocking.
pub trait EventCallbacks {
    fn on_ram_alloc(&mut self, tx_s3_used: u32, tx_total: u32, rx_s3_used: u32, rx_total: u32);
    fn on_event(&mut self, event: Event);
    fn on_event_from_isr(&mut self, event: Event);
}

/// An `EventCallbacks` that drops every notification; useful for tests and
/// for applications that have no UC-channel driver to wire up.
#[derive(Default)]
pub struct NullCallbacks;

impl EventCallbacks for NullCallbacks {
    fn on_ram_alloc(&mut self, _tx_s3_used: u32, _tx_total: u32, _rx_s3_used: u32, _rx_total: u32) {}
    fn on_event(&mut self, _event: Event) {}
    fn on_event_from_isr(&mut self, _event: Event) {}
}
