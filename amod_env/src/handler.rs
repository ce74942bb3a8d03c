//! Event subscription interface.

use crate::error::EnvError;
use crate::events::SimEvent;

/// A subscriber to an engine's event stream.
///
/// Engines call `handle_event` synchronously, in timestamp order, and abort
/// the run on the first `Err`. Handlers must not block and should only
/// mutate state they own.
///
/// # Implementations
///
/// - **Oracle**: `ConservationOracle` in `amod_sim` (invariant checking)
/// - **Recording**: [`EventRecorder`] (keeps every event, for tests/export)
/// - **Composition**: [`EventFanout`] (forwards to several handlers)
pub trait EventHandler {
    /// Processes a single event.
    ///
    /// # Returns
    /// * `Ok(())` - Continue the run
    /// * `Err(EnvError)` - Abort the run immediately
    fn handle_event(&mut self, event: &SimEvent) -> Result<(), EnvError>;
}

/// Forwards each event to several handlers in registration order.
///
/// Stops at the first handler that fails.
#[derive(Default)]
pub struct EventFanout<'a> {
    handlers: Vec<&'a mut dyn EventHandler>,
}

impl<'a> EventFanout<'a> {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Registers another handler.
    pub fn register(mut self, handler: &'a mut dyn EventHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for EventFanout<'_> {
    fn handle_event(&mut self, event: &SimEvent) -> Result<(), EnvError> {
        for handler in self.handlers.iter_mut() {
            handler.handle_event(event)?;
        }
        Ok(())
    }
}

/// Records every event it receives.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<SimEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events in arrival order.
    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Returns true if timestamps never decreased.
    pub fn is_time_ordered(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[0].time() <= pair[1].time())
    }

    /// Counts events of the given kind (see [`SimEvent::kind`]).
    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventHandler for EventRecorder {
    fn handle_event(&mut self, event: &SimEvent) -> Result<(), EnvError> {
        self.events.push(event.clone());
        Ok(())
    }
}
