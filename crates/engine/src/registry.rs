//! Request registry: authoritative state store and leasing authority.
//!
//! Every request row moves through the state machine
//! `pending → in_flight → fulfilled | failed`, with `expired` reachable
//! from the two non-terminal states and `release` returning rows to
//! `pending`. The linearization point of every transition is a
//! compare-and-swap on the serialized row; the `(status, created_at_block,
//! request_id)` index only accelerates scans and is repaired against the
//! rows at startup.

use crate::error::EngineError;
use nsl_core::{sha256_hash, RequestRecord, RequestStatus, ServiceKind, ServiceRequest, UInt256};
use nsl_store::{Column, SharedStore, Store};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome recorded by [`RequestRegistry::complete`].
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    Fulfilled {
        result_hash: UInt256,
        tx_hash: UInt256,
    },
    Failed {
        reason: String,
        tx_hash: Option<UInt256>,
    },
}

/// Exclusive time-bounded claim over one request row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub request_id: u64,
    pub worker_id: String,
    pub lease_id: u64,
    pub leased_until_ms: u64,
}

/// What happened to a row on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    Released,
    /// `attempt_count` hit `max_attempts`; the row went to `failed`.
    AttemptsExhausted,
}

pub struct RequestRegistry {
    store: SharedStore,
    max_attempts: u32,
}

fn request_key(request_id: u64) -> [u8; 8] {
    request_id.to_be_bytes()
}

/// `status_tag ∥ created_at_block:u32be ∥ request_id:u64be` — lexicographic
/// order equals the dispatcher's oldest-first order.
fn index_key(status: RequestStatus, created_at_block: u32, request_id: u64) -> [u8; 13] {
    let mut key = [0u8; 13];
    key[0] = status.index_tag();
    key[1..5].copy_from_slice(&created_at_block.to_be_bytes());
    key[5..13].copy_from_slice(&request_id.to_be_bytes());
    key
}

fn parse_index_key(key: &[u8]) -> Option<(u32, u64)> {
    if key.len() != 13 {
        return None;
    }
    let block = u32::from_be_bytes(key[1..5].try_into().ok()?);
    let id = u64::from_be_bytes(key[5..13].try_into().ok()?);
    Some((block, id))
}

impl RequestRegistry {
    pub fn new(store: SharedStore, max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            store,
            max_attempts,
        })
    }

    fn load(&self, request_id: u64) -> Result<Option<(RequestRecord, Vec<u8>)>, EngineError> {
        match self.store.get(Column::Requests, &request_key(request_id))? {
            Some(bytes) => {
                let record: RequestRecord = bincode::deserialize(&bytes)?;
                Ok(Some((record, bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn get(&self, request_id: u64) -> Result<Option<RequestRecord>, EngineError> {
        Ok(self.load(request_id)?.map(|(record, _)| record))
    }

    /// Swaps the serialized row and moves its index entry. `expected` is
    /// the exact bytes read; losing the race returns `false`.
    fn swap(
        &self,
        old: &RequestRecord,
        expected: &[u8],
        new: &RequestRecord,
    ) -> Result<bool, EngineError> {
        let id = new.request.request_id;
        let encoded = bincode::serialize(new)?;
        if !self
            .store
            .compare_and_swap(Column::Requests, &request_key(id), Some(expected), &encoded)?
        {
            return Ok(false);
        }
        if old.status != new.status {
            self.store.delete(
                Column::Index,
                &index_key(old.status, old.request.created_at_block, id),
            )?;
            self.store.put(
                Column::Index,
                &index_key(new.status, new.request.created_at_block, id),
                &[],
            )?;
        }
        Ok(true)
    }

    /// Creates the row in `pending` if absent; returns the current row
    /// either way. Idempotent under duplicate event delivery.
    pub fn upsert_pending(&self, request: ServiceRequest) -> Result<RequestRecord, EngineError> {
        let id = request.request_id;
        let record = RequestRecord::pending(request);
        let encoded = bincode::serialize(&record)?;
        if self
            .store
            .create_if_absent(Column::Requests, &request_key(id), &encoded)?
        {
            self.store.put(
                Column::Index,
                &index_key(RequestStatus::Pending, record.request.created_at_block, id),
                &[],
            )?;
            debug!(request_id = id, kind = %record.request.kind, "request ingested");
            return Ok(record);
        }
        // Already known (duplicate delivery or reorg replay).
        Ok(self
            .load(id)?
            .map(|(existing, _)| existing)
            .unwrap_or(record))
    }

    /// Atomic `pending → in_flight`. Exactly one concurrent caller wins.
    pub fn claim(
        &self,
        request_id: u64,
        worker_id: &str,
        lease_ms: u64,
        now_ms: u64,
    ) -> Result<Option<Lease>, EngineError> {
        let Some((record, raw)) = self.load(request_id)? else {
            return Ok(None);
        };
        if record.status != RequestStatus::Pending || record.not_before_ms > now_ms {
            return Ok(None);
        }

        let mut claimed = record.clone();
        claimed.status = RequestStatus::InFlight;
        claimed.leased_by = Some(worker_id.to_string());
        claimed.lease_id = rand::random::<u64>() | 1;
        claimed.leased_until_ms = now_ms + lease_ms;
        // An attempt begins at claim; a shutdown release hands it back.
        claimed.attempt_count = record.attempt_count + 1;

        if self.swap(&record, &raw, &claimed)? {
            Ok(Some(Lease {
                request_id,
                worker_id: worker_id.to_string(),
                lease_id: claimed.lease_id,
                leased_until_ms: claimed.leased_until_ms,
            }))
        } else {
            Ok(None)
        }
    }

    /// Oldest-first claimable candidates: `(request_id, kind,
    /// created_at_block)` for pending rows whose backoff window has
    /// passed.
    pub fn claim_candidates(
        &self,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<(u64, ServiceKind, u32)>, EngineError> {
        let entries = self.store.scan_prefix(
            Column::Index,
            &[RequestStatus::Pending.index_tag()],
            limit.max(1) * 2,
        )?;
        let mut out = Vec::new();
        for (key, _) in entries {
            let Some((_, id)) = parse_index_key(&key) else {
                continue;
            };
            let Some(record) = self.get(id)? else {
                // Stale index entry; repair.
                self.store.delete(Column::Index, &key)?;
                continue;
            };
            if record.status != RequestStatus::Pending || record.not_before_ms > now_ms {
                continue;
            }
            out.push((id, record.request.kind, record.request.created_at_block));
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Extends a held lease. Fails on a stale or stolen lease.
    pub fn renew(&self, lease: &Lease, lease_ms: u64, now_ms: u64) -> Result<Lease, EngineError> {
        let Some((record, raw)) = self.load(lease.request_id)? else {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        };
        if record.status != RequestStatus::InFlight || record.lease_id != lease.lease_id {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        }
        let mut renewed = record.clone();
        renewed.leased_until_ms = now_ms + lease_ms;
        if self.swap(&record, &raw, &renewed)? {
            Ok(Lease {
                leased_until_ms: renewed.leased_until_ms,
                ..lease.clone()
            })
        } else {
            Err(EngineError::StaleLease {
                request_id: lease.request_id,
            })
        }
    }

    /// Terminal transition `in_flight → fulfilled | failed` under a held
    /// lease.
    pub fn complete(
        &self,
        lease: &Lease,
        outcome: CompleteOutcome,
        now_ms: u64,
    ) -> Result<RequestRecord, EngineError> {
        let Some((record, raw)) = self.load(lease.request_id)? else {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        };
        if record.status != RequestStatus::InFlight || record.lease_id != lease.lease_id {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        }

        let mut done = record.clone();
        done.leased_by = None;
        done.lease_id = 0;
        done.leased_until_ms = 0;
        done.completed_at_ms = Some(now_ms);
        match outcome {
            CompleteOutcome::Fulfilled {
                result_hash,
                tx_hash,
            } => {
                done.status = RequestStatus::Fulfilled;
                done.result_hash = Some(result_hash);
                done.tx_hash = Some(tx_hash);
                done.last_error = None;
            }
            CompleteOutcome::Failed { reason, tx_hash } => {
                done.status = RequestStatus::Failed;
                done.last_error = Some(reason);
                done.tx_hash = tx_hash;
            }
        }

        if self.swap(&record, &raw, &done)? {
            Ok(done)
        } else {
            Err(EngineError::StaleLease {
                request_id: lease.request_id,
            })
        }
    }

    /// Returns a leased row to `pending`. The attempt begun at claim
    /// stays counted unless the release is a shutdown cancellation; at
    /// `max_attempts` the row goes to `failed("max_attempts_exceeded")`
    /// instead.
    pub fn release(
        &self,
        lease: &Lease,
        error: Option<String>,
        not_before_ms: u64,
        count_attempt: bool,
        now_ms: u64,
    ) -> Result<ReleaseResult, EngineError> {
        let Some((record, raw)) = self.load(lease.request_id)? else {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        };
        if record.status != RequestStatus::InFlight || record.lease_id != lease.lease_id {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        }

        let attempts = if count_attempt {
            record.attempt_count
        } else {
            record.attempt_count.saturating_sub(1)
        };
        let mut released = record.clone();
        released.attempt_count = attempts;
        released.leased_by = None;
        released.lease_id = 0;
        released.leased_until_ms = 0;
        released.last_error = error.or(released.last_error);

        let result = if count_attempt && attempts >= self.max_attempts {
            released.status = RequestStatus::Failed;
            released.last_error = Some("max_attempts_exceeded".into());
            released.completed_at_ms = Some(now_ms);
            ReleaseResult::AttemptsExhausted
        } else {
            released.status = RequestStatus::Pending;
            released.not_before_ms = not_before_ms;
            ReleaseResult::Released
        };

        if self.swap(&record, &raw, &released)? {
            Ok(result)
        } else {
            Err(EngineError::StaleLease {
                request_id: lease.request_id,
            })
        }
    }

    /// Increments the panic counter on a leased row, keeping it in
    /// flight. Returns the new count.
    pub fn record_panic(&self, lease: &Lease) -> Result<u32, EngineError> {
        let Some((record, raw)) = self.load(lease.request_id)? else {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        };
        if record.status != RequestStatus::InFlight || record.lease_id != lease.lease_id {
            return Err(EngineError::StaleLease {
                request_id: lease.request_id,
            });
        }
        let mut updated = record.clone();
        updated.panic_count += 1;
        if self.swap(&record, &raw, &updated)? {
            Ok(updated.panic_count)
        } else {
            Err(EngineError::StaleLease {
                request_id: lease.request_id,
            })
        }
    }

    /// Returns expired leases to `pending` (or `failed` once attempts run
    /// out). Called periodically by the supervisor.
    pub fn sweep_expired_leases(&self, now_ms: u64) -> Result<Vec<u64>, EngineError> {
        let entries = self
            .store
            .scan_prefix(Column::Index, &[RequestStatus::InFlight.index_tag()], 1024)?;
        let mut swept = Vec::new();
        for (key, _) in entries {
            let Some((_, id)) = parse_index_key(&key) else {
                continue;
            };
            let Some((record, raw)) = self.load(id)? else {
                continue;
            };
            if record.status != RequestStatus::InFlight || record.leased_until_ms >= now_ms {
                continue;
            }
            let lease = Lease {
                request_id: id,
                worker_id: record.leased_by.clone().unwrap_or_default(),
                lease_id: record.lease_id,
                leased_until_ms: record.leased_until_ms,
            };
            // A crashed worker's run counts as an attempt.
            drop(raw);
            match self.release(&lease, Some("lease_expired".into()), now_ms, true, now_ms) {
                Ok(_) => {
                    warn!(request_id = id, "expired lease swept");
                    swept.push(id);
                }
                Err(EngineError::StaleLease { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(swept)
    }

    /// `pending | in_flight → expired` once the deadline block has
    /// passed. Never touches terminal rows.
    pub fn expire(&self, request_id: u64, now_ms: u64) -> Result<bool, EngineError> {
        let Some((record, raw)) = self.load(request_id)? else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }
        let mut expired = record.clone();
        expired.status = RequestStatus::Expired;
        expired.leased_by = None;
        expired.lease_id = 0;
        expired.leased_until_ms = 0;
        expired.completed_at_ms = Some(now_ms);
        self.swap(&record, &raw, &expired)
    }

    /// Expires every non-terminal row whose `deadline_block` is behind
    /// `current_height`.
    pub fn expire_overdue(&self, current_height: u32, now_ms: u64) -> Result<Vec<u64>, EngineError> {
        let mut expired = Vec::new();
        for tag in [RequestStatus::Pending, RequestStatus::InFlight] {
            let entries = self
                .store
                .scan_prefix(Column::Index, &[tag.index_tag()], 1024)?;
            for (key, _) in entries {
                let Some((_, id)) = parse_index_key(&key) else {
                    continue;
                };
                let Some(record) = self.get(id)? else {
                    continue;
                };
                if let Some(deadline) = record.request.deadline_block {
                    if deadline < current_height && !record.status.is_terminal() {
                        if self.expire(id, now_ms)? {
                            info!(request_id = id, deadline, current_height, "request expired");
                            expired.push(id);
                        }
                    }
                }
            }
        }
        Ok(expired)
    }

    /// Converges local state with a fulfillment another worker landed on
    /// chain. Unknown rows are ignored; terminal rows never move.
    pub fn converge_terminal(
        &self,
        request_id: u64,
        success: bool,
        result: &[u8],
        error: &str,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let Some((record, raw)) = self.load(request_id)? else {
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }
        let mut done = record.clone();
        done.leased_by = None;
        done.lease_id = 0;
        done.leased_until_ms = 0;
        done.completed_at_ms = Some(now_ms);
        if success {
            done.status = RequestStatus::Fulfilled;
            done.result_hash = Some(sha256_hash(result));
        } else {
            done.status = RequestStatus::Failed;
            done.last_error = Some(error.to_string());
        }
        let _ = self.swap(&record, &raw, &done)?;
        debug!(request_id, success, "state converged from fleet fulfillment");
        Ok(())
    }

    /// Deletes terminal rows older than the retention window. Returns the
    /// number of rows collected.
    pub fn gc_terminal(&self, retention_ms: u64, now_ms: u64) -> Result<usize, EngineError> {
        let mut collected = 0;
        for tag in [
            RequestStatus::Fulfilled,
            RequestStatus::Failed,
            RequestStatus::Expired,
        ] {
            let entries = self
                .store
                .scan_prefix(Column::Index, &[tag.index_tag()], 4096)?;
            for (key, _) in entries {
                let Some((_, id)) = parse_index_key(&key) else {
                    continue;
                };
                let Some(record) = self.get(id)? else {
                    self.store.delete(Column::Index, &key)?;
                    continue;
                };
                let old_enough = record
                    .completed_at_ms
                    .is_some_and(|at| now_ms.saturating_sub(at) >= retention_ms);
                if record.status == tag && old_enough {
                    self.store.delete(Column::Requests, &request_key(id))?;
                    self.store.delete(Column::Index, &key)?;
                    collected += 1;
                }
            }
        }
        Ok(collected)
    }

    /// Rebuilds the status index from the rows. Run at startup; repairs
    /// entries lost to a crash between a row swap and its index update.
    pub fn rebuild_index(&self) -> Result<(), EngineError> {
        let rows = self.store.scan_prefix(Column::Requests, &[], usize::MAX)?;
        let stale = self.store.scan_prefix(Column::Index, &[], usize::MAX)?;
        for (key, _) in stale {
            self.store.delete(Column::Index, &key)?;
        }
        for (_, raw) in rows {
            let record: RequestRecord = bincode::deserialize(&raw)?;
            self.store.put(
                Column::Index,
                &index_key(
                    record.status,
                    record.request.created_at_block,
                    record.request.request_id,
                ),
                &[],
            )?;
        }
        Ok(())
    }
}
