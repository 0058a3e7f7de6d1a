//! Temporary login credentials handed out after checkout.

use rand::Rng;
use rand::rngs::OsRng;
use std::collections::VecDeque;
use std::sync::Mutex;

const CREDENTIAL_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%";

/// Default length of a temporary credential.
pub const DEFAULT_CREDENTIAL_LENGTH: usize = 16;

/// Source of temporary credentials.
pub trait CredentialGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform characters from a fixed alphabet, drawn from the OS RNG.
#[derive(Debug, Clone)]
pub struct AlphabetGenerator {
    length: usize,
}

impl AlphabetGenerator {
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for AlphabetGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_LENGTH)
    }
}

impl CredentialGenerator for AlphabetGenerator {
    fn generate(&self) -> String {
        let mut rng = OsRng;
        (0..self.length)
            .map(|_| CREDENTIAL_ALPHABET[rng.gen_range(0..CREDENTIAL_ALPHABET.len())] as char)
            .collect()
    }
}

/// Hands out queued credentials in order, then falls back to numbered ones.
///
/// Lets tests know which credential each provisioning attempt drew.
#[derive(Debug, Default)]
pub struct SequenceCredentialGenerator {
    queue: Mutex<VecDeque<String>>,
    counter: Mutex<u64>,
}

impl SequenceCredentialGenerator {
    pub fn new<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(credentials.into_iter().map(Into::into).collect()),
            counter: Mutex::new(0),
        }
    }
}

impl CredentialGenerator for SequenceCredentialGenerator {
    fn generate(&self) -> String {
        if let Ok(mut queue) = self.queue.lock() {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter += 1;
        format!("temp-credential-{:04}", *counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_alphabet_generator_shape() {
        let generator = AlphabetGenerator::default();
        for _ in 0..200 {
            let credential = generator.generate();
            assert_eq!(credential.len(), 16);
            assert!(credential.bytes().all(|b| CREDENTIAL_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_alphabet_generator_is_not_repetitive() {
        let generator = AlphabetGenerator::new(16);
        let seen: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_sequence_generator() {
        let generator = SequenceCredentialGenerator::new(["first", "second"]);
        assert_eq!(generator.generate(), "first");
        assert_eq!(generator.generate(), "second");
        assert_eq!(generator.generate(), "temp-credential-0001");
        assert_eq!(generator.generate(), "temp-credential-0002");
    }
}
