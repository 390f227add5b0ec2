//! Message delivery between the auctioneer and its bidders.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use tracing::warn;

use crate::{AuctionError, Bidder, Envelope};

/// Delivers envelopes to bidders and collects their replies.
pub trait Transport {
    /// Names of every reachable bidder, in a stable order.
    fn participants(&self) -> Vec<String>;

    /// Deliver every envelope and block until each receiver has handled its own.
    ///
    /// Replies come back in the order the envelopes were given; receivers that
    /// have nothing to say contribute no reply.
    fn broadcast(&mut self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, AuctionError>;

    /// Tear the transport down and hand the bidders back.
    fn into_bidders(self) -> Result<Vec<Bidder>, AuctionError>
    where
        Self: Sized;
}

fn index_by_name(names: impl Iterator<Item = String>) -> HashMap<String, usize> {
    names.enumerate().map(|(index, name)| (name, index)).collect()
}

/// Bidder index of every receiver, checked before anything is delivered.
fn resolve(
    index: &HashMap<String, usize>,
    envelopes: &[Envelope],
) -> Result<Vec<usize>, AuctionError> {
    envelopes
        .iter()
        .map(|envelope| {
            index
                .get(&envelope.receiver)
                .copied()
                .ok_or_else(|| AuctionError::UnknownBidder(envelope.receiver.clone()))
        })
        .collect()
}

/// Calls bidders directly on the caller's thread.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    bidders: Vec<Bidder>,
    index: HashMap<String, usize>,
}

impl LocalTransport {
    #[must_use]
    pub fn new(bidders: Vec<Bidder>) -> Self {
        let index = index_by_name(bidders.iter().map(|bidder| bidder.name.clone()));
        Self { bidders, index }
    }

    #[must_use]
    pub fn bidders(&self) -> &[Bidder] {
        &self.bidders
    }
}

impl Transport for LocalTransport {
    fn participants(&self) -> Vec<String> {
        self.bidders.iter().map(|bidder| bidder.name.clone()).collect()
    }

    fn broadcast(&mut self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, AuctionError> {
        let routes = resolve(&self.index, &envelopes)?;
        Ok(envelopes
            .iter()
            .zip(routes)
            .filter_map(|(envelope, index)| self.bidders[index].handle(envelope))
            .collect())
    }

    fn into_bidders(self) -> Result<Vec<Bidder>, AuctionError> {
        Ok(self.bidders)
    }
}

/// Broadcast number and position of an envelope within that broadcast.
type Slot = (u64, usize);

struct Worker {
    inbox: mpsc::Sender<(Slot, Envelope)>,
    handle: thread::JoinHandle<Bidder>,
}

/// One worker thread per bidder, fed over mpsc channels.
pub struct ThreadedTransport {
    names: Vec<String>,
    index: HashMap<String, usize>,
    workers: Vec<Worker>,
    replies: mpsc::Receiver<(Slot, Option<Envelope>)>,
    generation: u64,
}

impl ThreadedTransport {
    pub fn spawn(bidders: Vec<Bidder>) -> Result<Self, AuctionError> {
        let names: Vec<String> = bidders.iter().map(|bidder| bidder.name.clone()).collect();
        let index = index_by_name(names.iter().cloned());
        let (reply_tx, replies) = mpsc::channel();
        let mut workers = Vec::with_capacity(bidders.len());
        for mut bidder in bidders {
            let (inbox, rx) = mpsc::channel::<(Slot, Envelope)>();
            let reply_tx = reply_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("swarmlab-{}", bidder.name))
                .spawn(move || {
                    while let Ok((slot, envelope)) = rx.recv() {
                        let reply = bidder.handle(&envelope);
                        if reply_tx.send((slot, reply)).is_err() {
                            break;
                        }
                    }
                    bidder
                })
                .map_err(|err| {
                    AuctionError::Worker(format!("failed to spawn bidder thread: {err}"))
                })?;
            workers.push(Worker { inbox, handle });
        }
        Ok(Self {
            names,
            index,
            workers,
            replies,
            generation: 0,
        })
    }
}

impl Transport for ThreadedTransport {
    fn participants(&self) -> Vec<String> {
        self.names.clone()
    }

    fn broadcast(&mut self, envelopes: Vec<Envelope>) -> Result<Vec<Envelope>, AuctionError> {
        let routes = resolve(&self.index, &envelopes)?;

        // Replies still in flight from an aborted broadcast carry an older generation.
        self.generation += 1;
        let generation = self.generation;
        let expected = envelopes.len();
        for ((slot, envelope), index) in envelopes.into_iter().enumerate().zip(routes) {
            self.workers[index]
                .inbox
                .send(((generation, slot), envelope))
                .map_err(|_| AuctionError::Worker(format!("{} hung up", self.names[index])))?;
        }

        let mut slots: Vec<Option<Envelope>> = vec![None; expected];
        let mut received = 0;
        while received < expected {
            let ((reply_generation, slot), reply) = self
                .replies
                .recv()
                .map_err(|_| AuctionError::Worker("reply channel closed".into()))?;
            if reply_generation != generation || slot >= expected {
                continue;
            }
            slots[slot] = reply;
            received += 1;
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn into_bidders(self) -> Result<Vec<Bidder>, AuctionError> {
        let mut bidders = Vec::with_capacity(self.workers.len());
        for (name, worker) in self.names.iter().zip(self.workers) {
            drop(worker.inbox);
            match worker.handle.join() {
                Ok(bidder) => bidders.push(bidder),
                Err(err) => {
                    warn!(bidder = %name, "bidder thread panicked: {err:?}");
                    return Err(AuctionError::Worker(format!("{name} panicked")));
                }
            }
        }
        Ok(bidders)
    }
}
