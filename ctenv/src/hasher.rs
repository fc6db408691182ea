use blake3;
use std::hash::{Hash, Hasher};

use crate::config::Config;

pub trait DigestHasher {
    fn input<I: Hash>(&mut self, input: I);
}

impl DigestHasher for blake3::Hasher {
    fn input<I: Hash>(&mut self, input: I) {
        struct StdHasher<'a>(&'a mut blake3::Hasher);

        impl<'a> Hasher for StdHasher<'a> {
            fn finish(&self) -> u64 {
                unreachable!("digest is read through blake3::Hasher::finalize");
            }

            fn write(&mut self, bytes: &[u8]) {
                self.0.update(bytes);
            }
        }

        input.hash(&mut StdHasher(self))
    }
}

/// Hex digest of everything that shapes the environment.
///
/// Written onto the primary service container so a reused environment can be
/// compared against the configuration of the current run.
pub fn fingerprint(config: &Config) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.input(config);
    hasher.finalize().to_hex().to_string()
}
