//! Generic event-driven state machine (spec §2: "FSM utility ... used by
//! cluster/cloud adapters; spec'd only as a contract"), grounded in
//! `original_source/proto_db/fsm.py`: a per-instance lock serializes state
//! transitions, event handlers are looked up by `(state, event_name)` with
//! an `"all"` state as a wildcard fallback, and handlers run with the lock
//! held while post-processing callbacks registered during the handler run
//! afterwards, outside the lock. This module ships only the contract and
//! a thread-pool-backed driver; cluster/cloud adapters that plug into
//! `BlockProvider` (spec §1, out of scope here) are expected to supply
//! their own `FsmDefinition`s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::handle::{Handle, WorkerPool};

/// An event delivered to an [`Fsm`]. `name` selects the handler; `payload`
/// carries whatever free-form data the handler needs (spec's Python
/// original uses a dict; this is the typed equivalent).
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub payload: HashMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// The reserved state every `Fsm` starts in before its first transition.
pub const INITIAL_STATE: &str = "Initializing";

/// The wildcard state name: a handler registered under `"all"` fires for
/// an event name unmatched in the FSM's current state (fsm.py:
/// `event_name in self._fsm_definition.get(self._state, {})`, else
/// `'all'`).
pub const ALL_STATES: &str = "all";

type EventHandler = dyn Fn(&mut FsmContext, &Event) + Send + Sync;

/// Maps `state -> event_name -> handler`. Built once by the adapter that
/// owns an `Fsm` and shared (read-only after construction) across all
/// instances driven by the same definition.
pub struct FsmDefinition {
    states: HashMap<String, HashMap<String, Arc<EventHandler>>>,
}

impl FsmDefinition {
    pub fn new() -> Self {
        FsmDefinition {
            states: HashMap::new(),
        }
    }

    /// Registers a handler for `event_name` while in `state`. Pass
    /// [`ALL_STATES`] for a handler that applies regardless of state.
    pub fn on<F>(mut self, state: impl Into<String>, event_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut FsmContext, &Event) + Send + Sync + 'static,
    {
        self.states
            .entry(state.into())
            .or_default()
            .insert(event_name.into(), Arc::new(handler));
        self
    }

    fn lookup(&self, state: &str, event_name: &str) -> Option<Arc<EventHandler>> {
        self.states
            .get(state)
            .and_then(|handlers| handlers.get(event_name))
            .or_else(|| {
                self.states
                    .get(ALL_STATES)
                    .and_then(|handlers| handlers.get(event_name))
            })
            .cloned()
    }
}

impl Default for FsmDefinition {
    fn default() -> Self {
        FsmDefinition::new()
    }
}

type PostProcessTask = Box<dyn FnOnce() + Send>;

/// Passed to each handler; lets it request a state change or queue a
/// task to run once the transition lock is released (fsm.py's
/// `change_state` / `after_processing`).
pub struct FsmContext<'a> {
    definition: &'a FsmDefinition,
    next_state: &'a mut String,
    after: &'a mut Vec<PostProcessTask>,
}

impl<'a> FsmContext<'a> {
    /// Requests a transition to `new_state`. Rejected with a validation
    /// error (surfaced by `process_event`'s caller via logging only, as
    /// in the original — the state simply does not change) when
    /// `new_state` has no entry in the definition.
    pub fn change_state(&mut self, new_state: impl Into<String>) -> Result<()> {
        let new_state = new_state.into();
        if !self.definition.states.contains_key(&new_state) {
            return Err(Error::validation(format!(
                "trying to change state to an invalid one: {new_state}"
            )));
        }
        *self.next_state = new_state;
        Ok(())
    }

    /// Registers `task` to run after the current event finishes
    /// processing and the transition lock has been released (fsm.py:
    /// `after_processing`).
    pub fn after_processing<F>(&mut self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.after.push(Box::new(task));
    }
}

struct FsmState {
    current: String,
}

/// A running state machine instance (spec §2, fsm.py `FSM`). Cheap to
/// clone (`Arc` internally) so a handle can be held by timers and by the
/// adapter that created it.
#[derive(Clone)]
pub struct Fsm {
    definition: Arc<FsmDefinition>,
    state: Arc<Mutex<FsmState>>,
    pool: Arc<WorkerPool>,
}

impl Fsm {
    /// Builds a new FSM and synchronously drives its `Initializing`
    /// event, matching fsm.py's constructor (`self.send_event({'name':
    /// 'Initializing'})` is fired immediately rather than queued).
    pub fn new(definition: FsmDefinition, pool: Arc<WorkerPool>) -> Self {
        let fsm = Fsm {
            definition: Arc::new(definition),
            state: Arc::new(Mutex::new(FsmState {
                current: INITIAL_STATE.to_string(),
            })),
            pool,
        };
        fsm.process_event(&Event::new(INITIAL_STATE));
        fsm
    }

    pub fn current_state(&self) -> String {
        self.state.lock().unwrap().current.clone()
    }

    /// Submits `event` to the worker pool and returns a [`Handle`] that
    /// resolves once it has been processed (fsm.py: `send_event` returns
    /// a `Future` from the executor pool).
    pub fn send_event(&self, event: Event) -> Handle<()> {
        let fsm = self.clone();
        self.pool.submit(move || {
            fsm.process_event(&event);
            Ok(())
        })
    }

    /// Processes `event` synchronously in the caller's thread: looks up
    /// the handler for the current state (falling back to `"all"`),
    /// runs it with the transition lock held, then runs any
    /// `after_processing` tasks outside the lock (fsm.py:
    /// `process_event`).
    pub fn process_event(&self, event: &Event) {
        let handler = {
            let guard = self.state.lock().unwrap();
            self.definition.lookup(&guard.current, &event.name)
        };
        let Some(handler) = handler else { return };

        let mut after = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            let mut next_state = guard.current.clone();
            {
                let mut ctx = FsmContext {
                    definition: &self.definition,
                    next_state: &mut next_state,
                    after: &mut after,
                };
                handler(&mut ctx, event);
            }
            guard.current = next_state;
        }

        for task in after {
            task();
        }
    }

    /// Starts a timer that delivers `event` after `delay`, unless
    /// [`Timer::stop`] is called first (fsm.py: `start_timer`).
    pub fn start_timer(&self, delay: Duration, event: Event) -> Timer {
        let fsm = self.clone();
        let canceled = Arc::new(Mutex::new(false));
        let canceled_for_task = Arc::clone(&canceled);
        let handle = self.pool.submit(move || {
            std::thread::sleep(delay);
            if !*canceled_for_task.lock().unwrap() {
                fsm.process_event(&event);
            }
            Ok(())
        });
        Timer {
            canceled,
            handle: Mutex::new(Some(handle)),
        }
    }
}

/// Handle to a pending timed event (fsm.py `Timer`).
pub struct Timer {
    canceled: Arc<Mutex<bool>>,
    handle: Mutex<Option<Handle<()>>>,
}

impl Timer {
    /// Prevents the timer's event from firing if it has not already.
    pub fn stop(&self) {
        *self.canceled.lock().unwrap() = true;
    }

    /// Blocks until the timer has fired or been canceled.
    pub fn wait_til_processed(self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn starts_in_initializing_and_transitions_on_event() {
        let ready = Arc::new(AtomicUsize::new(0));
        let ready_for_handler = Arc::clone(&ready);
        let definition = FsmDefinition::new()
            .on(INITIAL_STATE, INITIAL_STATE, move |ctx, _event| {
                ready_for_handler.fetch_add(1, Ordering::SeqCst);
                ctx.change_state("Ready").unwrap();
            })
            .on("Ready", "stop", |ctx, _event| {
                ctx.change_state("Stopped").unwrap();
            });
        let pool = Arc::new(WorkerPool::new(1));
        let fsm = Fsm::new(definition, pool);
        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(fsm.current_state(), "Ready");

        fsm.send_event(Event::new("stop")).wait().unwrap();
        assert_eq!(fsm.current_state(), "Stopped");
    }

    #[test]
    fn wildcard_all_state_handler_fires_regardless_of_state() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_handler = Arc::clone(&hits);
        let definition = FsmDefinition::new().on(ALL_STATES, "ping", move |_ctx, _event| {
            hits_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        let pool = Arc::new(WorkerPool::new(1));
        let fsm = Fsm::new(definition, pool);
        fsm.send_event(Event::new("ping")).wait().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fsm.current_state(), INITIAL_STATE);
    }

    #[test]
    fn change_state_to_unknown_state_is_rejected() {
        let definition = FsmDefinition::new().on(INITIAL_STATE, INITIAL_STATE, |ctx, _event| {
            assert!(ctx.change_state("Nowhere").is_err());
        });
        let pool = Arc::new(WorkerPool::new(1));
        let fsm = Fsm::new(definition, pool);
        assert_eq!(fsm.current_state(), INITIAL_STATE);
    }

    #[test]
    fn after_processing_tasks_run_once_lock_is_released() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_for_handler = Arc::clone(&order);
        let definition = FsmDefinition::new().on(INITIAL_STATE, INITIAL_STATE, move |ctx, _event| {
            order_for_handler.lock().unwrap().push("handler");
            let order = Arc::clone(&order_for_handler);
            ctx.after_processing(move || order.lock().unwrap().push("after"));
        });
        let pool = Arc::new(WorkerPool::new(1));
        let _fsm = Fsm::new(definition, pool);
        assert_eq!(*order.lock().unwrap(), vec!["handler", "after"]);
    }

    #[test]
    fn timer_fires_event_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_handler = Arc::clone(&fired);
        let definition = FsmDefinition::new().on(ALL_STATES, "tick", move |_ctx, _event| {
            fired_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        let pool = Arc::new(WorkerPool::new(2));
        let fsm = Fsm::new(definition, pool);
        let timer = fsm.start_timer(Duration::from_millis(10), Event::new("tick"));
        timer.wait_til_processed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_timer_does_not_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_handler = Arc::clone(&fired);
        let definition = FsmDefinition::new().on(ALL_STATES, "tick", move |_ctx, _event| {
            fired_for_handler.fetch_add(1, Ordering::SeqCst);
        });
        let pool = Arc::new(WorkerPool::new(2));
        let fsm = Fsm::new(definition, pool);
        let timer = fsm.start_timer(Duration::from_millis(50), Event::new("tick"));
        timer.stop();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
