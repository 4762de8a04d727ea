//! The accumulator state tracker
//!
//! Maintains the client's view of the ledger's accumulator: the current
//! checkpoint plus a bounded log of recent deltas. Deltas must arrive in
//! strict ledger order; anything out of order is rejected rather than
//! buffered. The retained log is what witness updates replay, so its length
//! bounds how stale a witness can get before it must be reissued.

use std::sync::Arc;

use tracing::{debug, info, warn};

use stele_crypto::{CryptoContext, StateValue};

use crate::delta::{Checkpoint, StateDelta};
use crate::errors::{TrackerError, TrackerResult};

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum deltas kept for witness replay; older entries are pruned
    pub max_retained_deltas: usize,
    /// Verify published proofs (or recompute pure additions) on apply
    pub verify_proofs: bool,
    /// Maximum reorg depth accepted before requiring a full reset
    pub max_reorg_depth: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_retained_deltas: 1024,
            verify_proofs: true,
            max_reorg_depth: 64,
        }
    }
}

/// Tracker counters
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerStats {
    pub deltas_applied: u64,
    pub deltas_rejected: u64,
    pub reorgs: u64,
    pub resets: u64,
    pub pruned: u64,
}

/// Ordered log of accumulator state transitions.
pub struct StateTracker {
    ctx: Arc<CryptoContext>,
    config: TrackerConfig,
    current: Checkpoint,
    log: Vec<StateDelta>,
    stats: TrackerStats,
}

impl StateTracker {
    /// Start tracking from an explicit checkpoint (e.g. a queried snapshot).
    pub fn new(ctx: Arc<CryptoContext>, config: TrackerConfig, start: Checkpoint) -> Self {
        Self {
            ctx,
            config,
            current: start,
            log: Vec::new(),
            stats: TrackerStats::default(),
        }
    }

    /// Start tracking from the genesis accumulator (sequence 0, generator).
    pub fn from_genesis(ctx: Arc<CryptoContext>, config: TrackerConfig) -> Self {
        let genesis = Checkpoint::new(0, ctx.initial_state());
        Self::new(ctx, config, genesis)
    }

    /// The checkpoint the tracker currently stands at.
    pub fn current(&self) -> &Checkpoint {
        &self.current
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Sequence range of retained deltas, oldest to newest.
    pub fn retained_window(&self) -> Option<(u64, u64)> {
        match (self.log.first(), self.log.last()) {
            (Some(first), Some(last)) => Some((first.sequence, last.sequence)),
            _ => None,
        }
    }

    /// Apply the next published delta.
    ///
    /// The delta must continue exactly from the current checkpoint: sequence
    /// `current + 1` and prior state equal to the tracked value. Out-of-order
    /// deltas are errors, never buffered or merged.
    pub fn apply_delta(&mut self, delta: StateDelta) -> TrackerResult<()> {
        if let Err(err) = self.check_delta(&delta) {
            self.stats.deltas_rejected += 1;
            return Err(err);
        }

        debug!(
            sequence = delta.sequence,
            state = %delta.new_state,
            empty = delta.is_empty(),
            "applied state delta"
        );

        self.current = delta.checkpoint();
        self.log.push(delta);
        self.stats.deltas_applied += 1;
        self.prune();
        Ok(())
    }

    fn check_delta(&self, delta: &StateDelta) -> TrackerResult<()> {
        let expected = self.current.sequence + 1;
        if delta.sequence != expected {
            return Err(TrackerError::SequenceGap {
                expected,
                got: delta.sequence,
            });
        }
        if delta.prior_state != self.current.state {
            return Err(TrackerError::PriorStateMismatch {
                sequence: delta.sequence,
            });
        }
        if delta.is_empty() && delta.new_state != delta.prior_state {
            return Err(TrackerError::InconsistentDelta {
                sequence: delta.sequence,
            });
        }

        if self.config.verify_proofs && !delta.is_empty() {
            if delta.proof.is_some() {
                if !delta.verify_proof(&self.ctx) {
                    return Err(TrackerError::ProofVerificationFailed {
                        sequence: delta.sequence,
                    });
                }
            } else if delta.deleted_product.is_identity() {
                // No proof, but a pure addition can be checked directly.
                let recomputed = self
                    .ctx
                    .add_elements(&delta.prior_state, &delta.added_product);
                if recomputed != delta.new_state {
                    return Err(TrackerError::InconsistentDelta {
                        sequence: delta.sequence,
                    });
                }
            } else {
                // Deletions cannot be checked without a proof; the witness
                // arithmetic will surface a lie when it fails to recombine.
                warn!(
                    sequence = delta.sequence,
                    "accepting unproven delta containing deletions"
                );
            }
        }
        Ok(())
    }

    /// All deltas applied after `anchor`, oldest first.
    ///
    /// An anchor equal to the current checkpoint yields an empty slice. An
    /// anchor whose sequence is retained but whose state no longer matches
    /// was orphaned by a reorg ([`TrackerError::StaleCheckpoint`]); one
    /// outside the retained window cannot be replayed at all
    /// ([`TrackerError::UnknownCheckpoint`]).
    pub fn deltas_since(&self, anchor: &Checkpoint) -> TrackerResult<&[StateDelta]> {
        if anchor.sequence == self.current.sequence {
            return if anchor.state == self.current.state {
                Ok(&[])
            } else {
                Err(TrackerError::StaleCheckpoint {
                    sequence: anchor.sequence,
                })
            };
        }
        if anchor.sequence > self.current.sequence {
            return Err(TrackerError::UnknownCheckpoint {
                sequence: anchor.sequence,
            });
        }

        let first = match self.log.first() {
            Some(first) => first.sequence,
            None => {
                return Err(TrackerError::UnknownCheckpoint {
                    sequence: anchor.sequence,
                })
            }
        };
        if anchor.sequence + 1 < first {
            return Err(TrackerError::UnknownCheckpoint {
                sequence: anchor.sequence,
            });
        }

        let idx = (anchor.sequence + 1 - first) as usize;
        if self.log[idx].prior_state != anchor.state {
            return Err(TrackerError::StaleCheckpoint {
                sequence: anchor.sequence,
            });
        }
        Ok(&self.log[idx..])
    }

    /// Truncate history back to `to` after a ledger reorg.
    ///
    /// Returns the dropped suffix, newest history first discarded but
    /// delivered oldest-first, so callers can invalidate anything anchored
    /// inside it. The replacing branch then arrives as ordinary in-order
    /// deltas from `to`.
    pub fn on_reorg(&mut self, to: &Checkpoint) -> TrackerResult<Vec<StateDelta>> {
        if to.sequence > self.current.sequence {
            return Err(TrackerError::UnknownCheckpoint {
                sequence: to.sequence,
            });
        }
        let depth = self.current.sequence - to.sequence;
        if depth > self.config.max_reorg_depth {
            return Err(TrackerError::ReorgTooDeep {
                depth,
                max: self.config.max_reorg_depth,
            });
        }
        if depth == 0 {
            return if to.state == self.current.state {
                Ok(Vec::new())
            } else {
                Err(TrackerError::StaleCheckpoint {
                    sequence: to.sequence,
                })
            };
        }

        // The target must be a state this tracker actually passed through.
        let retained_state = self.state_at(to.sequence)?;
        if retained_state != &to.state {
            return Err(TrackerError::StaleCheckpoint {
                sequence: to.sequence,
            });
        }

        let keep = self
            .log
            .iter()
            .take_while(|delta| delta.sequence <= to.sequence)
            .count();
        let dropped = self.log.split_off(keep);
        self.current = to.clone();
        self.stats.reorgs += 1;
        info!(
            sequence = to.sequence,
            dropped = dropped.len(),
            "reorged back to checkpoint"
        );
        Ok(dropped)
    }

    /// Retained delta at `sequence`, if it is still in the window.
    pub fn delta_at(&self, sequence: u64) -> Option<&StateDelta> {
        let first = self.log.first()?.sequence;
        if sequence < first || sequence > self.current.sequence {
            return None;
        }
        self.log.get((sequence - first) as usize)
    }

    /// Hard resync from a freshly queried snapshot.
    ///
    /// Clears all retained history; every outstanding witness anchor becomes
    /// unreplayable and must be reissued.
    pub fn reset(&mut self, snapshot: Checkpoint) {
        info!(sequence = snapshot.sequence, state = %snapshot.state, "tracker reset");
        self.log.clear();
        self.current = snapshot;
        self.stats.resets += 1;
    }

    /// State value the tracker held at `sequence`, if retained.
    fn state_at(&self, sequence: u64) -> TrackerResult<&StateValue> {
        let first = match self.log.first() {
            Some(first) => first.sequence,
            None => {
                return Err(TrackerError::UnknownCheckpoint { sequence });
            }
        };
        if sequence + 1 == first {
            // The state the oldest retained delta started from.
            return Ok(&self.log[0].prior_state);
        }
        if sequence < first || sequence > self.current.sequence {
            return Err(TrackerError::UnknownCheckpoint { sequence });
        }
        let idx = (sequence - first) as usize;
        Ok(&self.log[idx].new_state)
    }

    fn prune(&mut self) {
        if self.log.len() > self.config.max_retained_deltas {
            let excess = self.log.len() - self.config.max_retained_deltas;
            self.log.drain(..excess);
            self.stats.pruned += excess as u64;
        }
    }
}
