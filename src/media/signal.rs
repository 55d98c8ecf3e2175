use std::time::{Duration, Instant};

use crossbeam::channel::{at, Receiver};
use crossbeam::select;

use crate::media::handle::{MediaEvent, MediaHandle};

/// How a wait on a media handle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    Signal(T),
    TimedOut,
    /// Every sender went away before a relevant signal arrived.
    Closed,
}

/// Registers a listener, runs `start`, and waits for the first event that
/// `pick` maps to a value, or for `timeout` to elapse.
///
/// `start` runs with the listener already in place. Returning `Some` from it
/// settles the wait without reading any events, for state that was already
/// reached before the action could signal it.
///
/// The listener is removed exactly once, after the wait settles, whatever the
/// outcome.
pub fn await_signal<H, T>(
    handle: &mut H,
    timeout: Duration,
    start: impl FnOnce(&mut H) -> Option<T>,
    pick: impl FnMut(MediaEvent) -> Option<T>,
) -> Settled<T>
where
    H: MediaHandle + ?Sized,
{
    let listener = handle.add_listener();
    let outcome = match start(handle) {
        Some(value) => Settled::Signal(value),
        None => first_of(&listener.events, timeout, pick),
    };
    handle.remove_listener(listener.id);
    outcome
}

/// Races `events` against a deadline. Events `pick` ignores keep the race going.
pub fn first_of<T>(
    events: &Receiver<MediaEvent>,
    timeout: Duration,
    mut pick: impl FnMut(MediaEvent) -> Option<T>,
) -> Settled<T> {
    let deadline = at(Instant::now() + timeout);
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    if let Some(value) = pick(event) {
                        return Settled::Signal(value);
                    }
                }
                Err(_) => return Settled::Closed,
            },
            recv(deadline) -> _ => return Settled::TimedOut,
        }
    }
}
