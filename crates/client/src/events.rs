//! Named-event dispatcher used by the connection, channels and the client.
//!
//! Listeners bound to an event name run in registration order, followed by the
//! catch-all listeners.

use std::collections::HashMap;

/// Handle returned by `bind`, used to remove exactly that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Box<dyn FnMut(&T)>;
type GlobalCallback<T> = Box<dyn FnMut(&str, &T)>;

pub struct Dispatcher<T> {
    label: &'static str,
    next_id: u64,
    callbacks: HashMap<String, Vec<(ListenerId, Callback<T>)>>,
    global: Vec<(ListenerId, GlobalCallback<T>)>,
}

impl<T> Dispatcher<T> {
    /// `label` names the emitter in the "no callbacks" debug line.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            next_id: 0,
            callbacks: HashMap::new(),
            global: Vec::new(),
        }
    }

    fn allocate(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn bind(&mut self, event: impl Into<String>, callback: impl FnMut(&T) + 'static) -> ListenerId {
        let id = self.allocate();
        self.callbacks
            .entry(event.into())
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    pub fn bind_global(&mut self, callback: impl FnMut(&str, &T) + 'static) -> ListenerId {
        let id = self.allocate();
        self.global.push((id, Box::new(callback)));
        id
    }

    /// Removes listeners matching the filters; `unbind(None, None)` removes every named listener.
    pub fn unbind(&mut self, event: Option<&str>, id: Option<ListenerId>) {
        match (event, id) {
            (Some(event), None) => {
                self.callbacks.remove(event);
            }
            (Some(event), Some(id)) => {
                if let Some(list) = self.callbacks.get_mut(event) {
                    list.retain(|(listener, _)| *listener != id);
                    if list.is_empty() {
                        self.callbacks.remove(event);
                    }
                }
            }
            (None, Some(id)) => {
                for list in self.callbacks.values_mut() {
                    list.retain(|(listener, _)| *listener != id);
                }
                self.callbacks.retain(|_, list| !list.is_empty());
            }
            (None, None) => self.callbacks.clear(),
        }
    }

    pub fn unbind_global(&mut self, id: Option<ListenerId>) {
        match id {
            Some(id) => self.global.retain(|(listener, _)| *listener != id),
            None => self.global.clear(),
        }
    }

    pub fn unbind_all(&mut self) {
        self.callbacks.clear();
        self.global.clear();
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.callbacks.get(event).is_some_and(|list| !list.is_empty())
    }

    /// Emits `event`; returns whether any listener ran.
    pub fn emit(&mut self, event: &str, payload: &T) -> bool {
        let mut delivered = false;

        match self.callbacks.get_mut(event) {
            Some(list) if !list.is_empty() => {
                for (_, callback) in list.iter_mut() {
                    callback(payload);
                }
                delivered = true;
            }
            _ => crate::log_debug!("No callbacks on {} for {}", self.label, event),
        }

        for (_, callback) in self.global.iter_mut() {
            callback(event, payload);
            delivered = true;
        }

        delivered
    }
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("label", &self.label)
            .field("events", &self.callbacks.keys().collect::<Vec<_>>())
            .field("global", &self.global.len())
            .finish()
    }
}
