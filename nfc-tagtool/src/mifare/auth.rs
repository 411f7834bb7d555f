//! Sector authentication
//!
//! Keys are tried in a fixed cascade: keys already known for the sector,
//! then the hint carried over from the previous sector of a read pass, then
//! the whole key database with Key A and finally with Key B. A failed
//! attempt halts the card, so every failure is followed by a re-select.

use log::{debug, warn};
use std::time::Duration;

use super::layout::{self, MAX_SECTORS};
use crate::error::TagError;
use crate::keys::MifareKey;
use crate::tag::MifareDump;
use crate::transport::{KeyType, MifareTransport};

/// Keys known to open one sector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorKeys {
    pub key_a: Option<MifareKey>,
    pub key_b: Option<MifareKey>,
}

impl SectorKeys {
    pub fn get(&self, key_type: KeyType) -> Option<MifareKey> {
        match key_type {
            KeyType::A => self.key_a,
            KeyType::B => self.key_b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_a.is_none() && self.key_b.is_none()
    }
}

/// Working keys per sector, kept for the life of an engine
#[derive(Debug, Clone)]
pub struct SectorKeyCache {
    sectors: [SectorKeys; MAX_SECTORS],
}

impl Default for SectorKeyCache {
    fn default() -> Self {
        Self {
            sectors: [SectorKeys::default(); MAX_SECTORS],
        }
    }
}

impl SectorKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys for a sector (empty for sectors past the 4K range)
    pub fn get(&self, sector: usize) -> SectorKeys {
        self.sectors.get(sector).copied().unwrap_or_default()
    }

    pub fn set(&mut self, sector: usize, key_type: KeyType, key: MifareKey) {
        if let Some(entry) = self.sectors.get_mut(sector) {
            match key_type {
                KeyType::A => entry.key_a = Some(key),
                KeyType::B => entry.key_b = Some(key),
            }
        }
    }

    pub fn clear(&mut self) {
        self.sectors = [SectorKeys::default(); MAX_SECTORS];
    }

    /// Number of sectors with at least one known key
    pub fn known_sectors(&self) -> usize {
        self.sectors.iter().filter(|s| !s.is_empty()).count()
    }

    /// Take both trailer keys of every read sector of a dump as known
    pub fn seed_from_dump(&mut self, dump: &MifareDump) -> usize {
        let mut seeded = 0;
        for sector in 0..dump.sector_count() {
            if !dump.is_sector_read(sector) {
                continue;
            }
            let (key_a, key_b) = dump.trailer_keys(sector);
            self.set(sector, KeyType::A, MifareKey(key_a));
            self.set(sector, KeyType::B, MifareKey(key_b));
            seeded += 1;
        }
        debug!("Extracted keys for {} sectors from dump", seeded);
        seeded
    }
}

/// Key hint shared across the sectors of one read pass
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthHint {
    pub key_a: Option<MifareKey>,
    pub key_b: Option<MifareKey>,
}

impl AuthHint {
    fn get(&self, key_type: KeyType) -> Option<MifareKey> {
        match key_type {
            KeyType::A => self.key_a,
            KeyType::B => self.key_b,
        }
    }

    fn set(&mut self, key_type: KeyType, key: MifareKey) {
        match key_type {
            KeyType::A => self.key_a = Some(key),
            KeyType::B => self.key_b = Some(key),
        }
    }
}

/// Where a successful key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    SectorCache,
    Hint,
    Database,
}

/// A successful authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated {
    pub key_type: KeyType,
    pub key: MifareKey,
    pub source: KeySource,
    /// Hardware attempts it took, including the successful one
    pub attempts: usize,
}

/// Inputs of one cascade run
pub struct AuthRequest<'a> {
    /// UID of the card in the field
    pub uid: &'a [u8],
    /// Block to authenticate against; the cascade opens its whole sector
    pub block: usize,
    /// Key database snapshot, in iteration order
    pub database: &'a [MifareKey],
    pub reactivate_timeout: Duration,
}

fn candidates(
    known: SectorKeys,
    hint: Option<&AuthHint>,
    database: &[MifareKey],
) -> Vec<(KeyType, MifareKey, KeySource)> {
    let mut out: Vec<(KeyType, MifareKey, KeySource)> = Vec::new();
    let mut push = |key_type: KeyType, key: Option<MifareKey>, source: KeySource| {
        if let Some(key) = key {
            if !out.iter().any(|(t, k, _)| *t == key_type && *k == key) {
                out.push((key_type, key, source));
            }
        }
    };

    push(KeyType::A, known.key_a, KeySource::SectorCache);
    push(KeyType::B, known.key_b, KeySource::SectorCache);
    if let Some(hint) = hint {
        push(KeyType::A, hint.get(KeyType::A), KeySource::Hint);
        push(KeyType::B, hint.get(KeyType::B), KeySource::Hint);
    }
    for key in database {
        push(KeyType::A, Some(*key), KeySource::Database);
    }
    for key in database {
        push(KeyType::B, Some(*key), KeySource::Database);
    }
    out
}

/// Run the cascade for the sector containing `request.block`
///
/// On success the key is stored in `cache` and, when a hint is given,
/// carried over to the next sector.
pub fn authenticate(
    transport: &mut dyn MifareTransport,
    request: &AuthRequest<'_>,
    cache: &mut SectorKeyCache,
    mut hint: Option<&mut AuthHint>,
) -> Result<Authenticated, TagError> {
    let sector = layout::sector_of(request.block);
    let block = request.block as u8;
    let plan = candidates(cache.get(sector), hint.as_deref(), request.database);

    for (attempt, (key_type, key, source)) in plan.iter().enumerate() {
        match transport.authenticate(request.uid, block, *key_type, key) {
            Ok(()) => {
                debug!(
                    "Sector {} authenticated with key {:?} {} ({:?}, attempt {})",
                    sector,
                    key_type,
                    key,
                    source,
                    attempt + 1
                );
                cache.set(sector, *key_type, *key);
                if let Some(hint) = hint.as_deref_mut() {
                    hint.set(*key_type, *key);
                }
                return Ok(Authenticated {
                    key_type: *key_type,
                    key: *key,
                    source: *source,
                    attempts: attempt + 1,
                });
            }
            Err(_) => {
                if let Err(e) = reactivate(transport, request) {
                    debug!("Re-activation after failed auth: {}", e);
                }
            }
        }
    }

    warn!("Sector {}: no key in {} candidates", sector, plan.len());
    Err(TagError::AuthenticationFailed(format!("sector {}", sector)))
}

/// Re-select the card after a failed attempt
fn reactivate(transport: &mut dyn MifareTransport, request: &AuthRequest<'_>) -> Result<(), TagError> {
    let uid = transport
        .select(request.reactivate_timeout)
        .map_err(|_| TagError::NoTagDetected)?;
    if uid != request.uid {
        warn!("Different card detected during re-activation");
    }
    Ok(())
}
