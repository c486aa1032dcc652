//! Per-symbol trade lock actor.
//!
//! Buy, Sell and BuyExtra must never overlap on the same symbol. Instead of a
//! shared mutex map, one actor task owns the lock table and every request is
//! a message on a single channel:
//!
//! ```text
//!  acquire("ETHUSDT") ──┐
//!  acquire("ETHUSDT") ──┼──► mpsc ──► actor ──► oneshot grant (FIFO per symbol)
//!  release("ETHUSDT") ──┘               │
//!                                       └──► RwLock<symbol → locked>  (read by is_locked)
//! ```
//!
//! [`TradeLock::acquire`] resolves to a [`TradeLockGuard`]; dropping the guard
//! releases the symbol on every exit path, including errors and cancelled
//! futures. Each request carries a ticket so that a caller which gives up
//! while queued is removed from the queue instead of releasing someone
//! else's lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

enum LockMessage {
    Acquire { symbol: String, ticket: u64, grant: oneshot::Sender<()> },
    Release { symbol: String, ticket: u64 },
}

/// Handle to the lock actor. Cheap to clone.
#[derive(Clone)]
pub struct TradeLock {
    tx: mpsc::UnboundedSender<LockMessage>,
    state: Arc<RwLock<AHashMap<String, bool>>>,
    tickets: Arc<AtomicU64>,
}

impl TradeLock {
    /// Start the actor on the current tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(AHashMap::new()));
        tokio::spawn(run_actor(rx, Arc::clone(&state)));
        Self { tx, state, tickets: Arc::new(AtomicU64::new(1)) }
    }

    /// Wait until `symbol` is free and take it.
    pub async fn acquire(&self, symbol: &str) -> EngineResult<TradeLockGuard> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let (grant, granted) = oneshot::channel();
        self.tx
            .send(LockMessage::Acquire { symbol: symbol.to_string(), ticket, grant })
            .map_err(|_| EngineError::Shutdown)?;

        // Released on drop whether or not the grant arrived.
        let guard = TradeLockGuard { symbol: symbol.to_string(), ticket, tx: self.tx.clone() };
        granted.await.map_err(|_| EngineError::Shutdown)?;
        debug!("[trade-lock] {symbol} acquired (ticket {ticket})");
        Ok(guard)
    }

    pub fn is_locked(&self, symbol: &str) -> bool {
        self.state.read().get(symbol).copied().unwrap_or(false)
    }
}

/// Holds a symbol lock until dropped.
pub struct TradeLockGuard {
    symbol: String,
    ticket: u64,
    tx: mpsc::UnboundedSender<LockMessage>,
}

impl TradeLockGuard {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Drop for TradeLockGuard {
    fn drop(&mut self) {
        let symbol = std::mem::take(&mut self.symbol);
        let _ = self.tx.send(LockMessage::Release { symbol, ticket: self.ticket });
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SymbolSlot {
    holder: Option<u64>,
    waiters: VecDeque<(u64, oneshot::Sender<()>)>,
}

async fn run_actor(
    mut rx: mpsc::UnboundedReceiver<LockMessage>,
    state: Arc<RwLock<AHashMap<String, bool>>>,
) {
    let mut slots: AHashMap<String, SymbolSlot> = AHashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            LockMessage::Acquire { symbol, ticket, grant } => {
                let slot = slots.entry(symbol.clone()).or_default();
                slot.waiters.push_back((ticket, grant));
                if slot.holder.is_none() {
                    grant_next(&state, &symbol, slot);
                }
            }
            LockMessage::Release { symbol, ticket } => {
                let Some(slot) = slots.get_mut(&symbol) else {
                    continue;
                };
                if slot.holder == Some(ticket) {
                    grant_next(&state, &symbol, slot);
                } else {
                    // gave up while still queued
                    slot.waiters.retain(|(t, _)| *t != ticket);
                }
                if slot.holder.is_none() && slot.waiters.is_empty() {
                    slots.remove(&symbol);
                }
            }
        }
    }
}

/// Hand the lock to the first waiter still listening. The state map is
/// updated before the grant is delivered.
fn grant_next(state: &RwLock<AHashMap<String, bool>>, symbol: &str, slot: &mut SymbolSlot) {
    while let Some((ticket, grant)) = slot.waiters.pop_front() {
        slot.holder = Some(ticket);
        state.write().insert(symbol.to_string(), true);
        if grant.send(()).is_ok() {
            return;
        }
    }
    slot.holder = None;
    state.write().remove(symbol);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn acquire_and_release_on_drop() {
        let locks = TradeLock::spawn();
        let guard = locks.acquire("ETHUSDT").await.unwrap();
        assert!(locks.is_locked("ETHUSDT"));
        assert!(!locks.is_locked("BTCUSDT"));
        drop(guard);

        // the release message is processed asynchronously
        let again = tokio::time::timeout(Duration::from_secs(1), locks.acquire("ETHUSDT")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn same_symbol_is_exclusive() {
        let locks = TradeLock::spawn();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("BTCUSDT").await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_symbols_run_in_parallel() {
        let locks = TradeLock::spawn();
        let _eth = locks.acquire("ETHUSDT").await.unwrap();
        let btc = tokio::time::timeout(Duration::from_millis(200), locks.acquire("BTCUSDT")).await;
        assert!(btc.is_ok());
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_release_holder() {
        let locks = TradeLock::spawn();
        let held = locks.acquire("ETHUSDT").await.unwrap();

        // waiter times out while queued
        let waiting =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("ETHUSDT")).await;
        assert!(waiting.is_err());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locks.is_locked("ETHUSDT"));

        drop(held);
        let next = tokio::time::timeout(Duration::from_secs(1), locks.acquire("ETHUSDT")).await;
        assert!(next.is_ok());
    }
}
