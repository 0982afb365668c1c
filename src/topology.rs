//! Party roster parsing.
//!
//! A roster lists every participant as `id@host:port`, separated by `;`.
//! The order is significant: the aggregation protocol addresses parties
//! by their position in the roster, so every party must be started with
//! the same roster string.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// One participant process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Party {
    pub id: u32,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

impl Party {
    /// Parses a single `id@host:port` entry.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let (rest, port) = entry
            .rsplit_once(':')
            .ok_or_else(|| Error::format(format!("party '{}' is missing ':port'", entry)))?;
        let (id, host) = rest
            .split_once('@')
            .ok_or_else(|| Error::format(format!("party '{}' is missing 'id@'", entry)))?;

        let id = id
            .parse::<u32>()
            .map_err(|_| Error::format(format!("party id '{}' is not a non-negative integer", id)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::format(format!("port '{}' of party {} is not a valid port", port, id)))?;

        if host.is_empty() || host.contains(['@', ';']) || host.chars().any(char::is_whitespace) {
            return Err(Error::format(format!("party {} has an invalid host '{}'", id, host)));
        }

        Ok(Self {
            id,
            host: host.to_string(),
            port,
        })
    }
}

/// The ordered, immutable roster of a run plus the local party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    local_id: u32,
    local_position: usize,
    parties: Vec<Party>,
}

impl Topology {
    /// Parses `roster` and checks that `local_id` is one of its parties.
    pub fn parse(roster: &str, local_id: u32) -> Result<Self> {
        let parties = roster
            .split(';')
            .map(Party::parse)
            .collect::<Result<Vec<_>>>()?;
        Self::new(parties, local_id)
    }

    /// Builds a topology from already parsed parties.
    pub fn new(parties: Vec<Party>, local_id: u32) -> Result<Self> {
        if parties.is_empty() {
            return Err(Error::format("roster contains no parties"));
        }

        for (i, party) in parties.iter().enumerate() {
            if parties[..i].iter().any(|p| p.id == party.id) {
                return Err(Error::format(format!("party id {} appears twice in the roster", party.id)));
            }
        }

        let local_position = parties
            .iter()
            .position(|p| p.id == local_id)
            .ok_or_else(|| Error::format(format!("local id {} is not part of the roster", local_id)))?;

        Ok(Self {
            local_id,
            local_position,
            parties,
        })
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Position of the local party in the roster.
    pub fn local_position(&self) -> usize {
        self.local_position
    }

    pub fn local(&self) -> &Party {
        &self.parties[self.local_position]
    }

    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    /// Every party except the local one, with its roster position.
    pub fn peers(&self) -> impl Iterator<Item = (usize, &Party)> {
        self.parties
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.local_position)
    }

    /// SHA-256 over the serialized roster. Parties compare this during the
    /// handshake so a reordered or edited roster is caught before any round.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, party) in self.parties.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}", party)?;
        }
        Ok(())
    }
}
