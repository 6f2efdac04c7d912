use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::tally::Tally;
use crate::flow::{AddrPair, Direction, FlowKey, LocalAddrs};
use crate::line::PacketRecord;

/// Bytes and arrival times collected for one flow during one window.
///
/// `packet_count` always equals `arrival_times.len()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAccumulation {
    pub total_bytes: u64,
    pub packet_count: u64,
    pub arrival_times: Vec<f64>,
}

impl WindowAccumulation {
    pub fn push(&mut self, size: u64, arrival_time: f64) {
        self.total_bytes += size;
        self.packet_count += 1;
        self.arrival_times.push(arrival_time);
    }
}

/// The conversations currently treated as the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedStreams {
    pub outgoing: AddrPair,
    pub incoming: AddrPair,
}

impl TrackedStreams {
    fn direction_of(&self, pair: &AddrPair) -> Option<Direction> {
        if *pair == self.outgoing {
            Some(Direction::Outgoing)
        } else if *pair == self.incoming {
            Some(Direction::Incoming)
        } else {
            None
        }
    }
}

/// Per-flow data of one closed window, handed to the scorer.
///
/// `ready` is set unless the outgoing stream was just replaced; the scorer
/// only scores once a ready snapshot has arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    pub flows: BTreeMap<FlowKey, WindowAccumulation>,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failover {
    pub direction: Direction,
    pub from: AddrPair,
    pub to: AddrPair,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WindowClose {
    pub snapshot: WindowSnapshot,
    pub outgoing_bytes: u64,
    pub incoming_bytes: u64,
    pub failovers: Vec<Failover>,
}

/// What `observe` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attribution {
    Tracked(Direction),
    Background(Direction),
    Ignored,
}

/// Mutable state of the current window. Owned by the aggregator task.
#[derive(Debug)]
pub(crate) struct WindowState {
    tracked: TrackedStreams,
    local: LocalAddrs,
    floor_bytes: f64,
    accumulations: HashMap<FlowKey, WindowAccumulation>,
    send_times: HashMap<FlowKey, VecDeque<f64>>,
    background_out: Tally<AddrPair>,
    background_in: Tally<AddrPair>,
}

impl WindowState {
    pub(crate) fn new(tracked: TrackedStreams, local: LocalAddrs, floor_bytes: f64) -> Self {
        Self {
            tracked,
            local,
            floor_bytes,
            accumulations: HashMap::new(),
            send_times: HashMap::new(),
            background_out: Tally::default(),
            background_in: Tally::default(),
        }
    }

    pub(crate) fn tracked(&self) -> TrackedStreams {
        self.tracked
    }

    pub(crate) fn observe(&mut self, record: &PacketRecord) -> Attribution {
        let pair = record.addr_pair();
        if let Some(direction) = self.tracked.direction_of(&pair) {
            let key = record.flow_key();
            if direction == Direction::Outgoing {
                self.send_times
                    .entry(key)
                    .or_default()
                    .push_back(record.arrival_time);
            }
            // Every tracked packet consumes the oldest queued send time of
            // its own flow. Nothing is derived from the queue.
            if let Some(queue) = self.send_times.get_mut(&key) {
                queue.pop_front();
            }
            self.accumulations
                .entry(key)
                .or_default()
                .push(record.size, record.arrival_time);
            return Attribution::Tracked(direction);
        }

        match self.local.direction_of(&pair) {
            Some(Direction::Outgoing) => {
                self.background_out.add(pair, record.size);
                Attribution::Background(Direction::Outgoing)
            }
            Some(Direction::Incoming) => {
                self.background_in.add(pair, record.size);
                Attribution::Background(Direction::Incoming)
            }
            None => Attribution::Ignored,
        }
    }

    /// Close the current window: snapshot the accumulations, replace a
    /// tracked stream whose volume fell to the floor with the busiest
    /// background conversation of the same direction, then reset.
    pub(crate) fn close(&mut self) -> WindowClose {
        let flows: BTreeMap<FlowKey, WindowAccumulation> = self
            .accumulations
            .drain()
            .filter(|(_, acc)| acc.packet_count > 0)
            .collect();

        let mut incoming_bytes = 0u64;
        let mut outgoing_bytes = 0u64;
        for (key, acc) in &flows {
            let pair = key.addr_pair();
            if pair == self.tracked.incoming {
                incoming_bytes += acc.total_bytes;
            } else if pair == self.tracked.outgoing {
                outgoing_bytes += acc.total_bytes;
            }
        }

        let mut failovers = Vec::new();
        if incoming_bytes as f64 <= self.floor_bytes {
            if let Some(to) = self.background_in.max() {
                failovers.push(Failover {
                    direction: Direction::Incoming,
                    from: self.tracked.incoming,
                    to,
                });
                self.tracked.incoming = to;
            }
        }
        let mut ready = true;
        if outgoing_bytes as f64 <= self.floor_bytes {
            if let Some(to) = self.background_out.max() {
                failovers.push(Failover {
                    direction: Direction::Outgoing,
                    from: self.tracked.outgoing,
                    to,
                });
                self.tracked.outgoing = to;
                ready = false;
            }
        }

        self.background_out.clear();
        self.background_in.clear();

        WindowClose {
            snapshot: WindowSnapshot { flows, ready },
            outgoing_bytes,
            incoming_bytes,
            failovers,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_send_times(&self, key: &FlowKey) -> usize {
        self.send_times.get(key).map(VecDeque::len).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn background_bytes(&self, direction: Direction, pair: &AddrPair) -> u64 {
        match direction {
            Direction::Outgoing => self.background_out.get(pair),
            Direction::Incoming => self.background_in.get(pair),
        }
    }
}
