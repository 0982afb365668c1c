//! Additive secret-sharing aggregation over a TCP mesh.
//!
//! The mesh is set up on the first round and reused for every following
//! round of the run. Each party listens on its own roster port, dials
//! every party listed before it, and accepts every party listed after it.
//!
//! Per round, a party splits its vector into one random additive share
//! per party (mod 2^32), sends each peer its share, sums the shares it
//! holds, broadcasts that partial sum, and adds up all partial sums.
//! No single share or partial sum reveals another party's vector.
//!
//! Suppression runs after reconstruction, so every party briefly holds the
//! exact sum of every cell, including the ones at or below k that the
//! report zeroes. This backend therefore does not hide which cells were
//! suppressed, and it refuses multi-party rosters unless
//! `AggregationSettings::allow_clear_sums` is set.

use super::wire::{self, Frame, PROTOCOL_VERSION};
use super::{add_wrapping, suppress, Round, SecureAggregator};
use crate::error::{Error, Result};
use crate::topology::{Party, Topology};
use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Pause between attempts to reach a party that is not listening yet.
const DIAL_RETRY: Duration = Duration::from_millis(250);

/// How long an accepted connection gets to send its hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Network behaviour of the aggregation client.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Address to listen on; the port comes from the roster.
    pub bind_host: String,
    /// How long to wait for the whole mesh to come up.
    pub connect_timeout: Duration,
    /// Upper bound per round. `None` waits for peers indefinitely.
    pub round_timeout: Option<Duration>,
    /// Exchange a digest of the bucket labels and refuse to aggregate
    /// vectors built from different layouts.
    pub verify_labels: bool,
    /// Accept that every party sees the unsuppressed sums before they are
    /// zeroed. Required for rosters with more than one party.
    pub allow_clear_sums: bool,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            connect_timeout: Duration::from_secs(120),
            round_timeout: None,
            verify_labels: false,
            allow_clear_sums: false,
        }
    }
}

/// An established connection to one peer.
struct PeerLink {
    position: usize,
    party_id: u32,
    stream: TcpStream,
}

/// Aggregation client for one party of a roster.
pub struct TcpAggregator {
    topology: Topology,
    settings: AggregationSettings,
    links: Option<Vec<PeerLink>>,
    next_round: u64,
    failed: bool,
}

impl TcpAggregator {
    /// Fails for a multi-party roster unless clear sums were allowed.
    pub fn new(topology: Topology, settings: AggregationSettings) -> Result<Self> {
        if topology.len() > 1 && !settings.allow_clear_sums {
            return Err(Error::protocol(
                "the TCP backend reconstructs every sum, including suppressed ones, \
                 at each party; pass --allow-clear-sums to run it anyway",
            ));
        }
        if topology.len() > 1 {
            warn!("Suppressed cells are visible in memory at every party during aggregation");
        }

        Ok(Self {
            topology,
            settings,
            links: None,
            next_round: 0,
            failed: false,
        })
    }

    /// Runs one round. A failed round leaves the session unusable, since
    /// the parties can no longer be assumed to be in step.
    pub async fn run_round(&mut self, round: &Round<'_>) -> Result<Vec<u32>> {
        round.check_shape()?;
        if self.failed {
            return Err(Error::protocol("session aborted by an earlier failed round"));
        }

        let result = self.run_round_inner(round).await;
        match result {
            Ok(_) => self.next_round += 1,
            Err(_) => self.failed = true,
        }
        result
    }

    async fn run_round_inner(&mut self, round: &Round<'_>) -> Result<Vec<u32>> {
        let index = self.next_round;

        if self.topology.len() == 1 {
            debug!("Single-party roster, round {} needs no network", index);
            let mut sums = round.counts.to_vec();
            suppress(&mut sums, round.k_threshold);
            return Ok(sums);
        }

        if self.links.is_none() {
            self.links = Some(self.connect().await?);
        }

        info!(
            "Round {} ({}): exchanging {} buckets with {} parties",
            index,
            round.name,
            round.counts.len(),
            self.topology.len() - 1
        );

        match self.settings.round_timeout {
            Some(limit) => timeout(limit, self.exchange_round(index, round))
                .await
                .map_err(|_| {
                    Error::protocol(format!(
                        "round {} ({}) did not complete within {}s",
                        index,
                        round.name,
                        limit.as_secs()
                    ))
                })?,
            None => self.exchange_round(index, round).await,
        }
    }

    /// Opens one connection to every peer and runs the handshake.
    async fn connect(&self) -> Result<Vec<PeerLink>> {
        let local = self.topology.local();
        let own_position = self.topology.local_position();
        let deadline = Instant::now() + self.settings.connect_timeout;

        let listener = TcpListener::bind((self.settings.bind_host.as_str(), local.port))
            .await
            .map_err(|e| {
                Error::protocol(format!(
                    "cannot listen on {}:{}: {}",
                    self.settings.bind_host, local.port, e
                ))
            })?;
        info!(
            "Party {} listening on {}:{}, connecting to {} peers",
            local.id,
            self.settings.bind_host,
            local.port,
            self.topology.len() - 1
        );

        let hello = Frame::Hello {
            party_id: local.id,
            version: PROTOCOL_VERSION,
            roster: self.topology.fingerprint(),
        };

        let dials = self
            .topology
            .peers()
            .filter(|(position, _)| *position < own_position)
            .map(|(position, party)| self.dial(position, party, &hello, deadline));

        let (mut links, accepted) =
            tokio::try_join!(try_join_all(dials), self.accept_all(&listener, &hello, deadline))?;
        links.extend(accepted);
        links.sort_by_key(|link| link.position);

        info!("Connected to all {} peers", links.len());
        Ok(links)
    }

    async fn dial(&self, position: usize, party: &Party, hello: &Frame, deadline: Instant) -> Result<PeerLink> {
        let unreachable = |reason: String| {
            Error::protocol(format!(
                "cannot reach party {} before the connect timeout: {}",
                party, reason
            ))
        };
        let mut stream = loop {
            let attempt = timeout_at(deadline, TcpStream::connect((party.host.as_str(), party.port)))
                .await
                .map_err(|_| unreachable("connect attempt timed out".to_string()))?;
            match attempt {
                Ok(stream) => break stream,
                Err(e) if Instant::now() + DIAL_RETRY < deadline => {
                    debug!("Party {} not reachable yet ({}), retrying", party, e);
                    sleep(DIAL_RETRY).await;
                }
                Err(e) => return Err(unreachable(e.to_string())),
            }
        };

        let handshake = async {
            stream.set_nodelay(true)?;
            wire::write_frame(&mut stream, hello).await?;
            Ok::<Frame, Error>(wire::read_frame(&mut stream).await?)
        };
        let reply = timeout_at(deadline, handshake)
            .await
            .map_err(|_| Error::protocol(format!("party {} never answered the handshake", party)))?
            .map_err(|e| link_error(party.id, e))?;

        let party_id = self.check_hello(&reply)?;
        if party_id != party.id {
            return Err(Error::protocol(format!(
                "expected party {} at {}:{} but party {} answered",
                party.id, party.host, party.port, party_id
            )));
        }
        debug!("Dialed party {}", party);

        Ok(PeerLink {
            position,
            party_id,
            stream,
        })
    }

    /// Accepts every later party. Connections that never complete a
    /// handshake, or whose hello names no awaited party, are dropped without
    /// holding up the others; a listed party with a foreign roster or
    /// protocol version is fatal.
    async fn accept_all(&self, listener: &TcpListener, hello: &Frame, deadline: Instant) -> Result<Vec<PeerLink>> {
        let own_position = self.topology.local_position();
        let mut pending: Vec<(usize, &Party)> = self
            .topology
            .peers()
            .filter(|(position, _)| *position > own_position)
            .collect();
        let mut links = Vec::with_capacity(pending.len());
        let mut handshakes = FuturesUnordered::new();

        while !pending.is_empty() {
            let (mut stream, addr, greeting) = tokio::select! {
                _ = sleep_until(deadline) => {
                    let waiting: Vec<String> = pending.iter().map(|(_, p)| p.id.to_string()).collect();
                    return Err(Error::protocol(format!(
                        "timed out waiting for parties {} to connect",
                        waiting.join(", ")
                    )));
                }
                accepted = listener.accept() => {
                    let (stream, addr) = accepted
                        .map_err(|e| Error::protocol(format!("cannot accept connections: {}", e)))?;
                    handshakes.push(read_greeting(stream, addr, deadline));
                    continue;
                }
                Some(greeted) = handshakes.next() => greeted,
            };

            let frame = match greeting {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping connection from {}: {}", addr, e);
                    continue;
                }
            };
            let party_id = match &frame {
                Frame::Hello { party_id, .. } => *party_id,
                other => {
                    warn!("Dropping connection from {} that opened with a {} frame", addr, other.kind());
                    continue;
                }
            };
            let Some(slot) = pending.iter().position(|(_, p)| p.id == party_id) else {
                warn!("Rejecting unexpected connection from party {} at {}", party_id, addr);
                continue;
            };
            self.check_hello(&frame)?;
            let (position, _) = pending.swap_remove(slot);

            wire::write_frame(&mut stream, hello)
                .await
                .map_err(|e| link_error(party_id, e))?;
            debug!("Accepted party {} from {}", party_id, addr);

            links.push(PeerLink {
                position,
                party_id,
                stream,
            });
        }

        Ok(links)
    }

    /// Validates a peer's hello and returns its party id.
    fn check_hello(&self, frame: &Frame) -> Result<u32> {
        match frame {
            Frame::Hello {
                party_id,
                version,
                roster,
            } => {
                if *version != PROTOCOL_VERSION {
                    return Err(Error::protocol(format!(
                        "party {} speaks protocol version {}, expected {}",
                        party_id, version, PROTOCOL_VERSION
                    )));
                }
                if *roster != self.topology.fingerprint() {
                    return Err(Error::protocol(format!(
                        "party {} was started with a different roster",
                        party_id
                    )));
                }
                Ok(*party_id)
            }
            other => Err(Error::protocol(format!(
                "expected a hello frame, got {}",
                other.kind()
            ))),
        }
    }

    async fn exchange_round(&mut self, index: u64, round: &Round<'_>) -> Result<Vec<u32>> {
        let own_position = self.topology.local_position();
        let labels_digest = self.settings.verify_labels.then(|| round.labels_digest());
        let links = self
            .links
            .as_mut()
            .ok_or_else(|| Error::protocol("no connections to peers"))?;

        let mut shares = split_shares(round.counts, self.topology.len(), own_position);
        let mut partial = std::mem::take(&mut shares[own_position]);

        let outgoing: Vec<Frame> = links
            .iter()
            .map(|link| Frame::Share {
                round: index,
                name: round.name.to_string(),
                k_threshold: round.k_threshold,
                labels_digest: labels_digest.clone(),
                values: std::mem::take(&mut shares[link.position]),
            })
            .collect();

        for (party_id, frame) in exchange(links, outgoing).await? {
            let values = check_share(party_id, frame, index, round, labels_digest.as_deref())?;
            add_wrapping(&mut partial, &values);
        }

        let outgoing: Vec<Frame> = links
            .iter()
            .map(|_| Frame::Partial {
                round: index,
                values: partial.clone(),
            })
            .collect();

        let mut sums = partial;
        for (party_id, frame) in exchange(links, outgoing).await? {
            let values = check_partial(party_id, frame, index, round.counts.len())?;
            add_wrapping(&mut sums, &values);
        }

        suppress(&mut sums, round.k_threshold);
        debug!("Round {} ({}) complete", index, round.name);
        Ok(sums)
    }
}

impl SecureAggregator for TcpAggregator {
    async fn aggregate(&mut self, round: &Round<'_>) -> Result<Vec<u32>> {
        self.run_round(round).await
    }
}

/// Sends one frame to every peer and receives one frame from every peer,
/// all links at once so that no pair of parties blocks on each other.
async fn exchange(links: &mut [PeerLink], outgoing: Vec<Frame>) -> Result<Vec<(u32, Frame)>> {
    let transfers = links.iter_mut().zip(outgoing).map(|(link, frame)| async move {
        let party_id = link.party_id;
        let (mut reader, mut writer) = link.stream.split();
        let (_, incoming) = tokio::try_join!(
            wire::write_frame(&mut writer, &frame),
            wire::read_frame(&mut reader)
        )
        .map_err(|e| link_error(party_id, e))?;
        Ok::<_, Error>((party_id, incoming))
    });

    try_join_all(transfers).await
}

/// Attributes a failure on a peer link to that party, keeping it a
/// protocol error.
fn link_error(party_id: u32, error: Error) -> Error {
    match error {
        Error::Io(io) => Error::protocol(format!("connection to party {} failed: {}", party_id, io)),
        Error::Protocol(message) => Error::protocol(format!("party {}: {}", party_id, message)),
        other => other,
    }
}

/// Reads the first frame of an accepted connection, bounded by its own
/// short timeout.
async fn read_greeting(mut stream: TcpStream, addr: SocketAddr, deadline: Instant) -> (TcpStream, SocketAddr, Result<Frame>) {
    let limit = deadline.min(Instant::now() + HANDSHAKE_TIMEOUT);
    let greeting = match stream.set_nodelay(true) {
        Ok(()) => timeout_at(limit, wire::read_frame(&mut stream))
            .await
            .unwrap_or_else(|_| Err(Error::protocol("sent no handshake"))),
        Err(e) => Err(e.into()),
    };
    (stream, addr, greeting)
}

/// Splits `values` into `parties` random vectors that sum to `values`
/// modulo 2^32. The share at `own_position` is the one the local party keeps.
fn split_shares(values: &[u32], parties: usize, own_position: usize) -> Vec<Vec<u32>> {
    let mut rng = rand::thread_rng();
    let mut own_share = values.to_vec();

    let mut shares: Vec<Vec<u32>> = (0..parties)
        .map(|position| {
            if position == own_position {
                return Vec::new();
            }
            let mask: Vec<u32> = (0..values.len()).map(|_| rng.gen()).collect();
            for (own, m) in own_share.iter_mut().zip(&mask) {
                *own = own.wrapping_sub(*m);
            }
            mask
        })
        .collect();

    shares[own_position] = own_share;
    shares
}

fn check_share(
    party_id: u32,
    frame: Frame,
    index: u64,
    round: &Round<'_>,
    labels_digest: Option<&str>,
) -> Result<Vec<u32>> {
    let (their_round, name, k_threshold, their_digest, values) = match frame {
        Frame::Share {
            round,
            name,
            k_threshold,
            labels_digest,
            values,
        } => (round, name, k_threshold, labels_digest, values),
        other => {
            return Err(Error::protocol(format!(
                "party {} sent a {} frame, expected a share",
                party_id,
                other.kind()
            )));
        }
    };

    if their_round != index || name != round.name {
        return Err(Error::protocol(format!(
            "rounds out of step: party {} is at round {} ({}), this party at round {} ({})",
            party_id, their_round, name, index, round.name
        )));
    }
    if k_threshold != round.k_threshold {
        return Err(Error::protocol(format!(
            "party {} uses k = {}, this party k = {}",
            party_id, k_threshold, round.k_threshold
        )));
    }
    if values.len() != round.counts.len() {
        return Err(Error::protocol(format!(
            "party {} submitted {} buckets, this party {}",
            party_id,
            values.len(),
            round.counts.len()
        )));
    }
    if their_digest.as_deref() != labels_digest {
        return Err(match (their_digest.is_some(), labels_digest.is_some()) {
            (true, true) => Error::protocol(format!(
                "party {} built round {} from different bucket labels",
                party_id, round.name
            )),
            _ => Error::protocol(format!(
                "label verification is enabled at some parties only (party {})",
                party_id
            )),
        });
    }

    Ok(values)
}

fn check_partial(party_id: u32, frame: Frame, index: u64, len: usize) -> Result<Vec<u32>> {
    match frame {
        Frame::Partial { round, values } if round == index && values.len() == len => Ok(values),
        Frame::Partial { round, values } => Err(Error::protocol(format!(
            "party {} sent a partial sum for round {} with {} buckets, expected round {} with {}",
            party_id,
            round,
            values.len(),
            index,
            len
        ))),
        other => Err(Error::protocol(format!(
            "party {} sent a {} frame, expected a partial sum",
            party_id,
            other.kind()
        ))),
    }
}
