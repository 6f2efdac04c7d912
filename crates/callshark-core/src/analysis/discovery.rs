use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::tally::Tally;
use crate::flow::{AddrPair, Direction, LocalAddrs};
use crate::line::{PacketRecord, parse_line};
use crate::source::{LineSource, SourceError};

/// Outcome of the startup scan. A direction is `None` when no candidate
/// conversation was seen for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredStreams {
    pub outgoing: Option<AddrPair>,
    pub incoming: Option<AddrPair>,
    /// Packets that counted towards the cap.
    pub packets_classified: u64,
    /// Packets involving no local address.
    pub anomalies: u64,
    /// Lines that did not parse into a packet.
    pub lines_dropped: u64,
}

impl DiscoveredStreams {
    pub fn is_complete(&self) -> bool {
        self.outgoing.is_some() && self.incoming.is_some()
    }
}

/// Packet-count tallies per direction, fed one record at a time.
#[derive(Debug, Default)]
pub(crate) struct StreamDiscovery {
    outgoing: Tally<AddrPair>,
    incoming: Tally<AddrPair>,
    classified: u64,
    anomalies: u64,
    dropped: u64,
}

impl StreamDiscovery {
    pub(crate) fn observe(&mut self, record: &PacketRecord, local: &LocalAddrs) {
        let pair = record.addr_pair();
        match local.direction_of(&pair) {
            Some(Direction::Outgoing) => self.outgoing.add(pair, 1),
            Some(Direction::Incoming) => self.incoming.add(pair, 1),
            None => {
                warn!(conversation = %pair, "packet involves no local address");
                self.anomalies += 1;
                return;
            }
        }
        self.classified += 1;
    }

    pub(crate) fn classified(&self) -> u64 {
        self.classified
    }

    pub(crate) fn finish(self) -> DiscoveredStreams {
        DiscoveredStreams {
            outgoing: self.outgoing.max(),
            incoming: self.incoming.max(),
            packets_classified: self.classified,
            anomalies: self.anomalies,
            lines_dropped: self.dropped,
        }
    }
}

/// Scan the start of a capture and pick the busiest outgoing and incoming
/// conversations by packet count.
///
/// Stops after `packet_cap` classified packets, at end of data, or when
/// `cancel` fires. Lines that do not parse and packets with no local address
/// do not count towards the cap.
pub async fn discover_streams<S: LineSource>(
    source: &mut S,
    local: &LocalAddrs,
    packet_cap: u64,
    cancel: &CancellationToken,
) -> Result<DiscoveredStreams, SourceError> {
    let mut discovery = StreamDiscovery::default();

    while discovery.classified() < packet_cap {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = source.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        match parse_line(&line) {
            Ok(Some(record)) => discovery.observe(&record, local),
            Ok(None) => discovery.dropped += 1,
            Err(err) => {
                trace!(error = %err, line = %line, "dropping unparseable line");
                discovery.dropped += 1;
            }
        }
    }

    let streams = discovery.finish();
    info!(
        outgoing = ?streams.outgoing,
        incoming = ?streams.incoming,
        packets = streams.packets_classified,
        anomalies = streams.anomalies,
        "stream discovery finished"
    );
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::{StreamDiscovery, discover_streams};
    use crate::flow::{AddrPair, LocalAddrs};
    use crate::line::parse_packet;
    use crate::source::{ChannelSource, ReaderSource};
    use std::net::IpAddr;
    use tokio_util::sync::CancellationToken;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn line(t: f64, src: &str, dst: &str) -> String {
        format!("{t} 1 {src} -> {dst} UDP 200 5000 -> 6000 Len=158")
    }

    fn local() -> LocalAddrs {
        LocalAddrs::new([ip("10.0.0.5")])
    }

    fn capture() -> String {
        let mut lines = Vec::new();
        for i in 0..4 {
            lines.push(line(i as f64, "10.0.0.5", "52.0.0.1"));
        }
        for i in 0..6 {
            lines.push(line(i as f64, "10.0.0.5", "52.0.0.2"));
        }
        for i in 0..3 {
            lines.push(line(i as f64, "52.0.0.9", "10.0.0.5"));
        }
        lines.push(line(9.0, "8.8.8.8", "1.1.1.1"));
        lines.push("garbage".to_string());
        lines.join("\n")
    }

    #[tokio::test]
    async fn picks_busiest_pair_per_direction() {
        let data = capture();
        let mut source = ReaderSource::new(data.as_bytes());
        let streams = discover_streams(&mut source, &local(), 2000, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            streams.outgoing,
            Some(AddrPair::new(ip("10.0.0.5"), ip("52.0.0.2")))
        );
        assert_eq!(
            streams.incoming,
            Some(AddrPair::new(ip("52.0.0.9"), ip("10.0.0.5")))
        );
        assert_eq!(streams.packets_classified, 13);
        assert_eq!(streams.anomalies, 1);
        assert_eq!(streams.lines_dropped, 1);
        assert!(streams.is_complete());
    }

    #[tokio::test]
    async fn discovery_is_deterministic() {
        let data = capture();
        let first = discover_streams(
            &mut ReaderSource::new(data.as_bytes()),
            &local(),
            2000,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let second = discover_streams(
            &mut ReaderSource::new(data.as_bytes()),
            &local(),
            2000,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cap_stops_the_scan_and_leaves_rest_unread() {
        let data = capture();
        let mut source = ReaderSource::new(data.as_bytes());
        let streams = discover_streams(&mut source, &local(), 4, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(streams.packets_classified, 4);
        assert_eq!(
            streams.outgoing,
            Some(AddrPair::new(ip("10.0.0.5"), ip("52.0.0.1")))
        );
        assert_eq!(streams.incoming, None);
        assert!(!streams.is_complete());
    }

    #[test]
    fn equal_tallies_prefer_first_seen() {
        let local = local();
        let mut discovery = StreamDiscovery::default();
        for dst in ["52.0.0.3", "52.0.0.4", "52.0.0.4", "52.0.0.3"] {
            let record = parse_packet(&line(0.0, "10.0.0.5", dst)).unwrap();
            discovery.observe(&record, &local);
        }
        let streams = discovery.finish();
        assert_eq!(
            streams.outgoing,
            Some(AddrPair::new(ip("10.0.0.5"), ip("52.0.0.3")))
        );
    }

    #[tokio::test]
    async fn cancellation_ends_a_silent_scan() {
        let (_tx, mut source) = ChannelSource::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let streams = discover_streams(&mut source, &local(), 2000, &cancel)
            .await
            .unwrap();
        assert_eq!(streams, Default::default());
    }
}
