//! Cues: notifications produced while processing a stream.

use std::collections::VecDeque;

use cesr_verifier_core::{Prefix, Said, VerifiedCredential};

/// A notification for the caller of a processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cue {
    /// A credential passed every check and was saved.
    CredentialSaved { credential: VerifiedCredential },
    /// A key event was accepted into its log.
    EventVerified { prefix: Prefix, sn: u64, said: Said },
    /// An accepted key event that this node may receipt.
    ReceiptNeeded { prefix: Prefix, sn: u64, said: Said },
}

/// First-in, first-out cue list owned by one processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cues {
    queue: VecDeque<Cue>,
}

impl Cues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cue: Cue) {
        self.queue.push_back(cue);
    }

    /// Remove the oldest cue.
    pub fn pop(&mut self) -> Option<Cue> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cue> {
        self.queue.iter()
    }

    /// Credentials saved during the run, in order.
    pub fn saved_credentials(&self) -> impl Iterator<Item = &VerifiedCredential> {
        self.queue.iter().filter_map(|cue| match cue {
            Cue::CredentialSaved { credential } => Some(credential),
            _ => None,
        })
    }
}

impl Extend<Cue> for Cues {
    fn extend<I: IntoIterator<Item = Cue>>(&mut self, iter: I) {
        self.queue.extend(iter);
    }
}

impl IntoIterator for Cues {
    type Item = Cue;
    type IntoIter = std::collections::vec_deque::IntoIter<Cue>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cesr_verifier_core::DigestCode;

    #[test]
    fn test_fifo_order() {
        let said = |n: u8| Said::compute(DigestCode::Blake3_256, &[n]);
        let mut cues = Cues::new();
        for n in 0..3u8 {
            cues.push(Cue::EventVerified {
                prefix: said(9).as_prefix(),
                sn: u64::from(n),
                said: said(n),
            });
        }
        assert_eq!(cues.len(), 3);
        let order: Vec<u64> = std::iter::from_fn(|| cues.pop())
            .map(|cue| match cue {
                Cue::EventVerified { sn, .. } => sn,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(cues.is_empty());
        assert_eq!(cues.saved_credentials().count(), 0);
    }
}
