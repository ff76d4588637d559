// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed identifiers for tasks and events.
//!
//! Resources are addressed by [`Path`]s. A path is either `/dev/null` (a
//! resource that does not exist), a *prefixed* path (a resource owned by one
//! particular [`FiberSystem`](crate::FiberSystem), prefixed by its UUID) or a
//! *global* path (a resource addressable from any system, e.g. a named
//! event). Delivery is by path equality only.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// The identifying part of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ident {
    /// A human readable name.
    Named(String),
    /// A generated, process-unique token.
    Unique(u64),
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Named(name) => write!(f, ":{name}"),
            Ident::Unique(token) => write!(f, "#{token}"),
        }
    }
}

/// A path to a resource (a task or an event).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Path {
    /// A resource that doesn't exist. Compares equal only to itself; sends
    /// addressed to it are dropped.
    DevNull,
    /// A resource on one particular fiber system.
    Prefixed { prefix: Uuid, ident: Ident },
    /// A resource that could be located on any fiber system.
    Global(Ident),
}

impl Path {
    pub fn is_dev_null(&self) -> bool {
        matches!(self, Path::DevNull)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::DevNull => Ok(()),
            Path::Prefixed { prefix, ident } => write!(f, "{prefix}{ident}"),
            Path::Global(ident) => write!(f, "{ident}"),
        }
    }
}

/// Number of low bits of a unique token taken up by the per-generator
/// counter; the generator id lives above them.
const GENERATOR_SHIFT: u32 = 48;

static GENERATORS: AtomicU64 = AtomicU64::new(0);

/// Generator of process-unique tokens.
///
/// Not thread safe by itself; it is used as a thread-local. Every generator
/// instance claims a distinct id, so tokens from different threads never
/// collide. At most 2^16 generator instances can be created.
struct UniqueIdentGenerator {
    generator_id: u64,
    next_token: u64,
}

impl UniqueIdentGenerator {
    fn new() -> Self {
        let generator_id = GENERATORS.fetch_add(1, Ordering::Relaxed);
        assert!(
            generator_id < 1 << (64 - GENERATOR_SHIFT),
            "too many unique ident generators"
        );
        Self {
            generator_id,
            next_token: 0,
        }
    }

    fn generate(&mut self) -> Ident {
        let token = self.next_token;
        self.next_token += 1;
        Ident::Unique(token | (self.generator_id << GENERATOR_SHIFT))
    }
}

thread_local! {
    static UNIQUE_IDENT_GENERATOR: RefCell<UniqueIdentGenerator> =
        RefCell::new(UniqueIdentGenerator::new());
}

/// Generates an identifier that is unique within this process.
pub(crate) fn unique_ident() -> Ident {
    UNIQUE_IDENT_GENERATOR.with(|generator| generator.borrow_mut().generate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dev_null_equals_itself_only() {
        let named = Path::Global(Ident::Named("a".into()));
        assert_eq!(Path::DevNull, Path::DevNull);
        assert_ne!(Path::DevNull, named);
        assert_eq!(named, Path::Global(Ident::Named("a".into())));
        assert_ne!(named, Path::Global(Ident::Named("b".into())));
    }

    #[test]
    fn prefixed_paths_compare_prefix_and_ident() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ident = Ident::Unique(7);
        assert_eq!(
            Path::Prefixed { prefix: a, ident: ident.clone() },
            Path::Prefixed { prefix: a, ident: ident.clone() }
        );
        assert_ne!(
            Path::Prefixed { prefix: a, ident: ident.clone() },
            Path::Prefixed { prefix: b, ident }
        );
    }

    #[test]
    fn unique_idents_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1000).map(|_| unique_ident()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ident in handle.join().unwrap() {
                assert!(seen.insert(ident));
            }
        }
    }

    #[test]
    fn display() {
        assert_eq!(Path::DevNull.to_string(), "");
        assert_eq!(Path::Global(Ident::Named("kill".into())).to_string(), ":kill");
        assert_eq!(Path::Global(Ident::Unique(3)).to_string(), "#3");
    }
}
