//! Short URL allocation.
//!
//! Short URLs are random strings over the URL-safe base64 alphabet, drawn
//! from the OS CSPRNG. They start at [`AllocatorConfig::min_length`]
//! characters and grow when the current length fills up or keeps colliding.
//! A length is only counted for fullness after a candidate at it collides,
//! so the common path costs one indexed lookup.
//!
//! # Uniqueness
//!
//! [`ShortUrlAllocator::allocate`] only checks that a candidate is free at the
//! moment it looks. Two callers can still pick the same id; the `UNIQUE`
//! constraint on `paste.shortUrl` rejects the second insert with
//! [`Error::ShortUrlTaken`], and [`ShortUrlAllocator::insert_with_short_url`]
//! retries with a fresh id.

use std::sync::atomic::{AtomicUsize, Ordering};

use plonk_core::metrics::{increment, set_gauge};
use rand::{Rng, rngs::OsRng};
use tracing::{debug, warn};

use crate::cache::{CacheStore, PasteRow, UpsertOutcome};
use crate::{Error, Result};

/// Characters a short URL is made of.
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Allocator tuning.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Length of the first ids handed out.
    pub min_length: usize,
    /// Longest id the allocator will generate before giving up.
    pub max_length: usize,
    /// Consecutive collisions at one length before moving to the next.
    pub max_collisions: usize,
    /// Inserts attempted by [`ShortUrlAllocator::insert_with_short_url`].
    pub max_insert_attempts: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 16,
            max_collisions: 8,
            max_insert_attempts: 16,
        }
    }
}

/// Hands out unused short URLs.
///
/// Thread-safe. The current length is shared by every caller and only grows.
pub struct ShortUrlAllocator {
    config: AllocatorConfig,
    length: AtomicUsize,
    capacity_checks: AtomicUsize,
    generate: fn(usize) -> String,
}

impl ShortUrlAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self::with_generator(config, random_id)
    }

    fn with_generator(config: AllocatorConfig, generate: fn(usize) -> String) -> Self {
        let length = config.min_length.max(1);
        set_gauge("shorturl_length", length as f64);
        Self {
            config,
            length: AtomicUsize::new(length),
            capacity_checks: AtomicUsize::new(0),
            generate,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Length new allocations start at.
    pub fn current_length(&self) -> usize {
        self.length.load(Ordering::Relaxed)
    }

    /// Return a short URL no cached paste currently holds.
    pub fn allocate(&self, store: &CacheStore) -> Result<String> {
        let mut length = self.current_length();
        let mut collisions = 0;
        let mut attempts = 0;

        loop {
            if length > self.config.max_length {
                warn!(
                    "Short URL space exhausted after {} attempts (max length {})",
                    attempts, self.config.max_length
                );
                return Err(Error::ShortUrlExhausted {
                    attempts,
                    length: self.config.max_length,
                });
            }

            let candidate = (self.generate)(length);
            attempts += 1;

            if !store.short_url_exists(&candidate)? {
                increment("shorturl_allocations_total", 1);
                return Ok(candidate);
            }

            increment("shorturl_collisions_total", 1);
            collisions += 1;

            // Only count the length once it has collided; when every id is
            // taken, retrying at it is pointless
            if collisions == 1 && self.length_is_full(store, length)? {
                length = self.escalate(length);
                collisions = 0;
            } else if collisions >= self.config.max_collisions {
                debug!(
                    "{} consecutive collisions at length {}, growing",
                    collisions, length
                );
                length = self.escalate(length);
                collisions = 0;
            }
        }
    }

    /// Insert the paste built by `build` under a free short URL.
    ///
    /// `preferred` is used when no other paste holds it; otherwise, and after
    /// every lost race on the uniqueness constraint, a fresh id is allocated.
    /// `build` receives the chosen short URL and must return the row to
    /// insert. Returns the row as written.
    pub fn insert_with_short_url<F>(
        &self,
        store: &CacheStore,
        preferred: Option<&str>,
        mut build: F,
    ) -> Result<(PasteRow, UpsertOutcome)>
    where
        F: FnMut(&str) -> PasteRow,
    {
        let mut preferred = preferred;

        for attempt in 1..=self.config.max_insert_attempts {
            let short_url = match preferred.take() {
                Some(s) if !store.short_url_exists(s)? => s.to_string(),
                _ => self.allocate(store)?,
            };

            let row = build(&short_url);
            match store.upsert_paste(&row) {
                Ok(outcome) => return Ok((row, outcome)),
                Err(e) if e.is_retriable_collision() => {
                    increment("shorturl_collisions_total", 1);
                    debug!(
                        "Short URL {} taken before insert (attempt {}), retrying",
                        short_url, attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ShortUrlExhausted {
            attempts: self.config.max_insert_attempts,
            length: self.current_length(),
        })
    }

    /// How many times an allocation has counted the ids of a length.
    pub fn capacity_checks(&self) -> usize {
        self.capacity_checks.load(Ordering::Relaxed)
    }

    fn length_is_full(&self, store: &CacheStore, length: usize) -> Result<bool> {
        let Some(capacity) = capacity(length) else {
            return Ok(false);
        };
        self.capacity_checks.fetch_add(1, Ordering::Relaxed);
        let full = store.short_url_count(length)? >= capacity;
        if full {
            debug!("All {} short URLs of length {} are taken", capacity, length);
        }
        Ok(full)
    }

    /// Move past `from`, returning the length to continue at.
    fn escalate(&self, from: usize) -> usize {
        let next = from + 1;
        if next > self.config.max_length {
            return next;
        }
        let previous = self.length.fetch_max(next, Ordering::Relaxed);
        if previous < next {
            debug!("Short URL length raised to {}", next);
            set_gauge("shorturl_length", next as f64);
        }
        previous.max(next)
    }
}

/// Number of distinct ids of `length`, or `None` if it does not fit in a u64.
fn capacity(length: usize) -> Option<u64> {
    u32::try_from(length)
        .ok()
        .and_then(|len| (ALPHABET.len() as u64).checked_pow(len))
}

fn random_id(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
