//! Setpoint commands coming from outside the loop, and change notification.
//!
//! Commands travel over a channel and are applied by the loop thread once per
//! cycle, before sampling. Every applied change is reported to the registered
//! observers as a [`SetpointEvent`], on the loop thread, in registration order.

/// A requested setpoint change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetpointCommand {
    /// Raise the hover target by one height step.
    IncreaseTargetHeight,
    /// Lower the hover target by one height step.
    DecreaseTargetHeight,
    /// Set the height proxy target directly, in raw counts.
    SetTargetHeight(f64),
    /// Raise the target pitch by one nudge step.
    IncreasePitch,
    /// Lower the target pitch by one nudge step.
    DecreasePitch,
    /// Shift the target pitch by a signed amount in degrees.
    NudgePitch(f64),
}

/// A setpoint change that was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetpointEvent {
    TargetHeightChanged { from: f64, to: f64 },
    PitchNudged { from: f64, to: f64 },
}

/// Callback invoked for each applied setpoint change.
pub type SetpointObserver = Box<dyn FnMut(&SetpointEvent) + Send>;

/// Ordered list of setpoint observers.
#[derive(Default)]
pub struct SetpointObservers {
    observers: Vec<SetpointObserver>,
}

impl SetpointObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: SetpointObserver) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify(&mut self, event: &SetpointEvent) {
        for observer in self.observers.iter_mut() {
            observer(event);
        }
    }
}

impl std::fmt::Debug for SetpointObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetpointObservers")
            .field("count", &self.observers.len())
            .finish()
    }
}
