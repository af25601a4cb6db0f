//! Reward code generation.
//!
//! Codes are 12 characters from an alphabet without `I`, `O`, `0` and `1`,
//! printed in groups of four behind a prefix: `GC-7KQ2-M9XA-4TRD`.
//! Generation only proposes candidates; uniqueness is enforced by the store.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;

/// Characters a code may contain.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random characters per code, excluding prefix and separators.
pub const CODE_LENGTH: usize = 12;

const GROUP_SIZE: usize = 4;

/// Proposes candidate reward codes.
pub struct CodeGenerator {
    prefix: String,
    scripted: Option<Mutex<VecDeque<String>>>,
}

impl CodeGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            scripted: None,
        }
    }

    /// A generator that hands out `codes` in order, then falls back to random.
    ///
    /// Lets tests force collisions.
    pub fn scripted<I, S>(prefix: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            scripted: Some(Mutex::new(codes.into_iter().map(Into::into).collect())),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next candidate code.
    pub fn next_code(&self) -> String {
        if let Some(queue) = &self.scripted {
            let next = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(poisoned) => poisoned.into_inner().pop_front(),
            };
            if let Some(code) = next {
                return code;
            }
        }
        self.random_code()
    }

    fn random_code(&self) -> String {
        let mut rng = rand::rng();
        let body: Vec<u8> = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())])
            .collect();

        let mut code = String::with_capacity(self.prefix.len() + CODE_LENGTH + 3);
        code.push_str(&self.prefix);
        for group in body.chunks(GROUP_SIZE) {
            if !code.is_empty() {
                code.push('-');
            }
            code.extend(group.iter().map(|&b| b as char));
        }
        code
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CODE_PREFIX)
    }
}
