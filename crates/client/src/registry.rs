//! Process-level bookkeeping of clients.
//!
//! Clients registered before [`ClientRegistry::ready`] wait; once the registry
//! is ready every existing and future client is connected.

use std::cell::RefCell;
use std::rc::Rc;

use crate::client::WebPubSub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<(ClientId, Rc<RefCell<WebPubSub>>)>,
    next_id: u64,
    ready: bool,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Rc<RefCell<WebPubSub>>) -> ClientId {
        self.next_id += 1;
        let id = ClientId(self.next_id);
        if self.ready {
            connect(&client);
        }
        self.clients.push((id, client));
        id
    }

    /// Connects every registered client and any registered later.
    pub fn ready(&mut self) {
        self.ready = true;
        for (_, client) in &self.clients {
            connect(client);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Removes and disconnects a client.
    pub fn dispose(&mut self, id: ClientId) -> Option<Rc<RefCell<WebPubSub>>> {
        let index = self.clients.iter().position(|(client_id, _)| *client_id == id)?;
        let (_, client) = self.clients.remove(index);
        match client.try_borrow_mut() {
            Ok(mut client) => client.disconnect(),
            Err(_) => crate::log_warn!("Client {:?} is busy and was not disconnected", id),
        }
        Some(client)
    }

    pub fn get(&self, id: ClientId) -> Option<&Rc<RefCell<WebPubSub>>> {
        self.clients
            .iter()
            .find(|(client_id, _)| *client_id == id)
            .map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn connect(client: &Rc<RefCell<WebPubSub>>) {
    match client.try_borrow_mut() {
        Ok(mut client) => client.connect(),
        Err(_) => crate::log_warn!("Client is busy and was not connected"),
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .field("ready", &self.ready)
            .finish()
    }
}
