/// Messaging module
///
/// Detection events and the bus that fans them out to consumers.
///
/// ```rust,ignore
/// let bus = EventBus::new();
/// let (rx, _id) = bus.subscribe();
///
/// while let Ok(event) = rx.recv() {
///     match event.kind {
///         EventKind::Hit => { /* fire haptics */ }
///         _ => {}
///     }
/// }
/// ```

pub mod bus;
pub mod events;

pub use bus::{EventBus, SubscriberId};
pub use events::{now_ms, Event, EventKind};
