//! Claim registry: which addresses have already been funded
//!
//! A slot is reserved before any transfer is dispatched and either committed
//! once the transfer confirms or released when the claim fails. `reserve` is
//! an atomic check-and-insert, so two concurrent claims for one address can
//! never both reach dispatch.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// A committed claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Normalized recipient address
    pub address: String,
    /// Amount sent (in wei)
    pub amount_wei: u128,
    /// Transaction hash
    pub tx_hash: String,
    /// Unix timestamp of the commit
    pub claimed_at: i64,
}

impl ClaimRecord {
    pub fn new(address: String, amount_wei: u128, tx_hash: String) -> Self {
        Self {
            address,
            amount_wei,
            tx_hash,
            claimed_at: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum ClaimSlot {
    Reserved { since: i64 },
    Claimed(ClaimRecord),
}

impl ClaimSlot {
    fn reserved() -> Self {
        ClaimSlot::Reserved {
            since: Utc::now().timestamp(),
        }
    }

    fn is_claimed(&self) -> bool {
        matches!(self, ClaimSlot::Claimed(_))
    }
}

/// Store of claimed addresses, keyed by normalized address
#[async_trait]
pub trait ClaimRegistry: Send + Sync {
    /// Take the slot for `address`. Returns `false` if it is already claimed
    /// or another claim holds the reservation.
    async fn reserve(&self, address: &str) -> FaucetResult<bool>;

    /// Turn a reservation into a permanent claim
    async fn commit(&self, record: ClaimRecord) -> FaucetResult<()>;

    /// Drop a reservation; committed claims are left untouched
    async fn release(&self, address: &str) -> FaucetResult<()>;

    /// Committed claim for `address`, if any
    async fn get(&self, address: &str) -> FaucetResult<Option<ClaimRecord>>;

    /// Number of committed claims
    async fn claimed_count(&self) -> FaucetResult<usize>;
}

/// Process-lifetime registry
#[derive(Debug, Default)]
pub struct MemoryClaimRegistry {
    slots: DashMap<String, ClaimSlot>,
    claimed: AtomicUsize,
}

impl MemoryClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimRegistry for MemoryClaimRegistry {
    async fn reserve(&self, address: &str) -> FaucetResult<bool> {
        match self.slots.entry(address.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(ClaimSlot::reserved());
                Ok(true)
            }
        }
    }

    async fn commit(&self, record: ClaimRecord) -> FaucetResult<()> {
        debug!("Recorded claim for address: {}", record.address);
        let previous = self
            .slots
            .insert(record.address.clone(), ClaimSlot::Claimed(record));
        if !matches!(previous, Some(ClaimSlot::Claimed(_))) {
            self.claimed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn release(&self, address: &str) -> FaucetResult<()> {
        self.slots
            .remove_if(address, |_, slot| matches!(slot, ClaimSlot::Reserved { .. }));
        Ok(())
    }

    async fn get(&self, address: &str) -> FaucetResult<Option<ClaimRecord>> {
        Ok(self.slots.get(address).and_then(|slot| match slot.value() {
            ClaimSlot::Claimed(record) => Some(record.clone()),
            ClaimSlot::Reserved { .. } => None,
        }))
    }

    async fn claimed_count(&self) -> FaucetResult<usize> {
        Ok(self.claimed.load(Ordering::SeqCst))
    }
}

/// Durable registry backed by sled
pub struct SledClaimRegistry {
    _db: sled::Db,
    claims: sled::Tree,
    /// Committed claims, counted once on open and kept current by `commit`
    claimed: AtomicUsize,
}

impl SledClaimRegistry {
    /// Open or create the registry. Reservations left behind by a previous
    /// process are dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!("Opening claim registry at: {}", path.as_ref().display());

        let db = sled::Config::default().path(path).open()?;
        let claims = db.open_tree("claims")?;

        let registry = Self {
            _db: db,
            claims,
            claimed: AtomicUsize::new(0),
        };
        let (claimed, stale) = registry.scan()?;
        registry.claimed.store(claimed, Ordering::SeqCst);
        if stale > 0 {
            warn!("Dropped {} reservations left by an interrupted run", stale);
        }
        info!("Claim registry holds {} funded addresses", claimed);

        Ok(registry)
    }

    /// Count committed claims and drop leftover reservations
    fn scan(&self) -> FaucetResult<(usize, usize)> {
        let mut claimed = 0;
        let mut stale = Vec::new();
        for item in self.claims.iter() {
            let (key, value) = item?;
            if decode(&value)?.is_claimed() {
                claimed += 1;
            } else {
                stale.push(key);
            }
        }

        for key in &stale {
            self.claims.remove(key)?;
        }
        Ok((claimed, stale.len()))
    }
}

fn encode(slot: &ClaimSlot) -> FaucetResult<Vec<u8>> {
    bincode::serialize(slot).map_err(|e| FaucetError::Internal(e.to_string()))
}

fn decode(bytes: &[u8]) -> FaucetResult<ClaimSlot> {
    bincode::deserialize(bytes).map_err(|e| FaucetError::Internal(e.to_string()))
}

#[async_trait]
impl ClaimRegistry for SledClaimRegistry {
    async fn reserve(&self, address: &str) -> FaucetResult<bool> {
        let value = encode(&ClaimSlot::reserved())?;
        let swapped = self
            .claims
            .compare_and_swap(address.as_bytes(), None::<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    async fn commit(&self, record: ClaimRecord) -> FaucetResult<()> {
        let key = record.address.clone();
        let value = encode(&ClaimSlot::Claimed(record))?;
        let previous = self.claims.insert(key.as_bytes(), value)?;
        self.claims.flush_async().await?;

        let was_claimed = match previous {
            Some(bytes) => decode(&bytes)?.is_claimed(),
            None => false,
        };
        if !was_claimed {
            self.claimed.fetch_add(1, Ordering::SeqCst);
        }

        debug!("Recorded claim for address: {}", key);
        Ok(())
    }

    async fn release(&self, address: &str) -> FaucetResult<()> {
        if let Some(current) = self.claims.get(address.as_bytes())? {
            if matches!(decode(&current)?, ClaimSlot::Reserved { .. }) {
                // A mismatch means the slot changed underneath us; leave it.
                let _ = self
                    .claims
                    .compare_and_swap(address.as_bytes(), Some(current), None::<Vec<u8>>)?;
            }
        }
        Ok(())
    }

    async fn get(&self, address: &str) -> FaucetResult<Option<ClaimRecord>> {
        match self.claims.get(address.as_bytes())? {
            Some(bytes) => match decode(&bytes)? {
                ClaimSlot::Claimed(record) => Ok(Some(record)),
                ClaimSlot::Reserved { .. } => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn claimed_count(&self) -> FaucetResult<usize> {
        Ok(self.claimed.load(Ordering::SeqCst))
    }
}
