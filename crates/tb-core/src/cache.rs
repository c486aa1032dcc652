//! Typed cache keys and a TTL key/value cache.
//!
//! Several bot instances may share one cache store, so every key is scoped by
//! the bot id. Instead of ad hoc key strings, keys are built through
//! [`CacheKeys`], which makes collisions between purposes impossible.
//!
//! [`TtlCache`] stores values with a per-entry time-to-live. Expired entries
//! are invisible to readers and dropped lazily on access or by
//! [`TtlCache::purge_expired`].

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::enums::Side;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// What a cached value is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CachePurpose {
    /// The currently open bot order of a symbol.
    OpenedOrder,
    /// Mirror of the exchange order being worked for a symbol and side.
    PendingExchangeOrder(Side),
    /// Best swap chain found for an asset.
    SwapChain,
    Depth,
    KLines { interval: String, limit: u32 },
    Balance,
    /// Temporary ban on new buys.
    BuyLock,
    /// An externally queued cancel for the symbol's working order.
    CancelRequest,
    /// Manual order override.
    ManualOrder,
}

impl std::fmt::Display for CachePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenedOrder => f.write_str("opened-order"),
            Self::PendingExchangeOrder(side) => write!(f, "pending-exchange-order-{side}"),
            Self::SwapChain => f.write_str("swap-chain"),
            Self::Depth => f.write_str("depth"),
            Self::KLines { interval, limit } => write!(f, "klines-{interval}-{limit}"),
            Self::Balance => f.write_str("balance"),
            Self::BuyLock => f.write_str("buy-lock"),
            Self::CancelRequest => f.write_str("cancel-request"),
            Self::ManualOrder => f.write_str("manual-order"),
        }
    }
}

/// A fully qualified cache key: `(bot id, scope, purpose)`.
///
/// `scope` is a symbol or an asset depending on the purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub bot_id: Arc<str>,
    pub scope: String,
    pub purpose: CachePurpose,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.bot_id, self.scope, self.purpose)
    }
}

/// Builds [`CacheKey`]s for one bot.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    bot_id: Arc<str>,
}

impl CacheKeys {
    pub fn new(bot_id: &str) -> Self {
        Self { bot_id: Arc::from(bot_id) }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    fn key(&self, scope: &str, purpose: CachePurpose) -> CacheKey {
        CacheKey { bot_id: Arc::clone(&self.bot_id), scope: scope.to_string(), purpose }
    }

    pub fn opened_order(&self, symbol: &str) -> CacheKey {
        self.key(symbol, CachePurpose::OpenedOrder)
    }

    pub fn pending_exchange_order(&self, symbol: &str, side: Side) -> CacheKey {
        self.key(symbol, CachePurpose::PendingExchangeOrder(side))
    }

    pub fn swap_chain(&self, asset: &str) -> CacheKey {
        self.key(asset, CachePurpose::SwapChain)
    }

    pub fn depth(&self, symbol: &str) -> CacheKey {
        self.key(symbol, CachePurpose::Depth)
    }

    pub fn klines(&self, symbol: &str, interval: &str, limit: u32) -> CacheKey {
        self.key(symbol, CachePurpose::KLines { interval: interval.to_string(), limit })
    }

    pub fn balance(&self, asset: &str) -> CacheKey {
        self.key(asset, CachePurpose::Balance)
    }

    pub fn buy_lock(&self, symbol: &str) -> CacheKey {
        self.key(symbol, CachePurpose::BuyLock)
    }

    pub fn cancel_request(&self, symbol: &str) -> CacheKey {
        self.key(symbol, CachePurpose::CancelRequest)
    }

    pub fn manual_order(&self, symbol: &str) -> CacheKey {
        self.key(symbol, CachePurpose::ManualOrder)
    }
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe key/value cache with per-entry expiry.
pub struct TtlCache<K, V> {
    entries: RwLock<AHashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(AHashMap::new()) }
    }

    /// Returns a clone of the live value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let map = self.entries.read();
            match map.get(key) {
                Some(e) if e.expires_at > now => return Some(e.value.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        // expired: drop it
        self.entries.write().remove(key);
        None
    }

    /// Insert or replace `key` for `ttl`.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let entry = Entry { value, expires_at: Instant::now() + ttl };
        self.entries.write().insert(key, entry);
    }

    /// Remove `key`, returning the live value if there was one.
    pub fn take(&self, key: &K) -> Option<V> {
        let entry = self.entries.write().remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    pub fn remove(&self, key: &K) {
        self.entries.write().remove(key);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        before - map.len()
    }

    /// Number of stored entries, including not yet purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_bot() {
        let a = CacheKeys::new("bot-a");
        let b = CacheKeys::new("bot-b");
        assert_ne!(a.opened_order("BTCUSDT"), b.opened_order("BTCUSDT"));
        assert_ne!(a.opened_order("BTCUSDT"), a.depth("BTCUSDT"));
        assert_ne!(
            a.pending_exchange_order("BTCUSDT", Side::Buy),
            a.pending_exchange_order("BTCUSDT", Side::Sell)
        );
        assert_eq!(a.klines("BTCUSDT", "1h", 200).to_string(), "bot-a:BTCUSDT:klines-1h-200");
    }

    #[test]
    fn ttl_expiry() {
        let keys = CacheKeys::new("bot");
        let cache: TtlCache<CacheKey, f64> = TtlCache::new();
        cache.set(keys.balance("USDT"), 10.0, Duration::from_secs(60));
        cache.set(keys.balance("BTC"), 1.0, Duration::ZERO);

        assert_eq!(cache.get(&keys.balance("USDT")), Some(10.0));
        assert_eq!(cache.get(&keys.balance("BTC")), None);
        assert_eq!(cache.take(&keys.balance("USDT")), Some(10.0));
        assert!(!cache.contains(&keys.balance("USDT")));
    }

    #[test]
    fn purge_drops_expired_only() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new();
        cache.set("live", 1, Duration::from_secs(60));
        cache.set("dead", 2, Duration::ZERO);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
