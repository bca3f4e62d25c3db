//! Per-call processing report.

use crate::cue::{Cue, Cues};
use crate::error::{EventingError, Rejection};
use crate::escrow::Dependency;

/// What happened to one message group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Waiting on an unresolved dependency.
    Escrowed(Dependency),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    /// Short description, e.g. `icp E... sn=0`.
    pub label: String,
    pub disposition: Disposition,
    /// The group came out of escrow rather than the input stream.
    pub retried: bool,
}

/// Result of processing one input.
///
/// Cues and outcomes cover every group handled before `failure`, including
/// groups released from escrow along the way.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub cues: Cues,
    pub outcomes: Vec<GroupOutcome>,
    /// Set when the call stopped early; earlier groups keep their effects.
    pub failure: Option<EventingError>,
}

impl ParseReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn accepted(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Accepted))
    }

    pub fn escrowed(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Escrowed(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Rejected(_)))
    }

    /// Rejections in the order they happened.
    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.outcomes.iter().filter_map(|o| match &o.disposition {
            Disposition::Rejected(r) => Some(r),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&Disposition) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.disposition)).count()
    }
}

/// Effects of an accepted group, applied by the pipeline once the group's
/// lock is released.
#[derive(Debug, Default)]
pub(crate) struct Accepted {
    pub cues: Vec<Cue>,
    /// Dependencies this acceptance may have satisfied.
    pub notify: Vec<Dependency>,
}

impl Accepted {
    pub fn notify(dependency: Dependency) -> Self {
        Self {
            cues: Vec::new(),
            notify: vec![dependency],
        }
    }

    pub fn and_notify(mut self, dependency: Dependency) -> Self {
        self.notify.push(dependency);
        self
    }

    pub fn with_cue(mut self, cue: Cue) -> Self {
        self.cues.push(cue);
        self
    }
}
