//! Accepted signature shares of a round

use crate::{Error, MemberIndex, Result};

/// Shares accepted so far, one slot per group member.
///
/// The first share accepted for a member is kept; the set never shrinks.
#[derive(Debug, Clone)]
pub struct ShareSet {
    slots: Vec<Option<Vec<u8>>>,
    accepted: usize,
}

impl ShareSet {
    pub fn new(group_size: usize) -> Self {
        Self {
            slots: vec![None; group_size],
            accepted: 0,
        }
    }

    pub fn group_size(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.accepted
    }

    pub fn is_empty(&self) -> bool {
        self.accepted == 0
    }

    pub fn contains(&self, sender: MemberIndex) -> bool {
        matches!(self.slots.get(sender), Some(Some(_)))
    }

    pub fn get(&self, sender: MemberIndex) -> Option<&[u8]> {
        self.slots.get(sender).and_then(|slot| slot.as_deref())
    }

    /// Store `share` for `sender`.
    ///
    /// Returns `false` without replacing anything if `sender` already has a
    /// share, and an error if `sender` is not a group member.
    pub fn insert(&mut self, sender: MemberIndex, share: Vec<u8>) -> Result<bool> {
        let group_size = self.slots.len();
        let slot = self.slots.get_mut(sender).ok_or_else(|| Error::InvalidShare {
            sender,
            reason: format!("not a member of a group of {}", group_size),
        })?;

        if slot.is_some() {
            return Ok(false);
        }

        *slot = Some(share);
        self.accepted += 1;
        Ok(true)
    }

    /// Up to `threshold` shares in ascending sender order
    pub fn select(&self, threshold: usize) -> Vec<(MemberIndex, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(sender, slot)| slot.as_deref().map(|share| (sender, share)))
            .take(threshold)
            .collect()
    }

    /// Members with an accepted share, ascending
    pub fn senders(&self) -> Vec<MemberIndex> {
        self.select(self.slots.len())
            .into_iter()
            .map(|(sender, _)| sender)
            .collect()
    }
}
