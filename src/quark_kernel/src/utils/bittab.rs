//! A two-level bit table supporting constant-time find-first-set scans.
//!
//! The table stores one word per priority level plus a summary word; summary
//! bit `i` is set iff `levels[i] != 0`. Finding the most urgent set bit is
//! two find-first-set operations, one on the summary and one on the selected
//! level word.

use crate::cfg::{NUM_PRIO_LEVELS, TASKS_PER_PRIO};
use crate::utils::Init;

pub(crate) type Word = usize;

/// Mask covering the valid slot bits of a level word.
pub(crate) const SLOT_MASK: Word = Word::MAX >> (Word::BITS as usize - TASKS_PER_PRIO);

/// Position of the lowest set bit. The word must be nonzero.
#[inline]
pub(crate) fn find_first_set(word: Word) -> usize {
    debug_assert!(word != 0);
    word.trailing_zeros() as usize
}

/// Position of the lowest set bit at or after `offset`, scanning circularly.
/// The word must be nonzero and `offset` less than the word size.
#[inline]
pub(crate) fn find_first_set_from(word: Word, offset: usize) -> usize {
    debug_assert!(word != 0);
    let rotated = word.rotate_right(offset as u32);
    (rotated.trailing_zeros() as usize + offset) % Word::BITS as usize
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct BitTable {
    // Invariant: `summary` bit `i` is set iff `levels[i] != 0`
    summary: Word,
    levels: [Word; NUM_PRIO_LEVELS],
}

impl Init for BitTable {
    const INIT: Self = Self {
        summary: 0,
        levels: [0; NUM_PRIO_LEVELS],
    };
}

impl BitTable {
    #[inline]
    pub(crate) fn set(&mut self, level: usize, slot: usize) {
        debug_assert!(level < NUM_PRIO_LEVELS && slot < TASKS_PER_PRIO);
        self.levels[level] |= (1 as Word) << slot;
        self.summary |= (1 as Word) << level;
    }

    #[inline]
    pub(crate) fn clear(&mut self, level: usize, slot: usize) {
        debug_assert!(level < NUM_PRIO_LEVELS && slot < TASKS_PER_PRIO);
        self.levels[level] &= !((1 as Word) << slot);
        if self.levels[level] == 0 {
            self.summary &= !((1 as Word) << level);
        }
    }

    #[inline]
    pub(crate) fn get(&self, level: usize, slot: usize) -> bool {
        self.levels[level] & ((1 as Word) << slot) != 0
    }

    /// The raw word of one level.
    #[inline]
    pub(crate) fn level_word(&self, level: usize) -> Word {
        self.levels[level]
    }

    /// The raw summary word.
    #[inline]
    pub(crate) fn summary(&self) -> Word {
        self.summary
    }

    /// The lowest level index containing a set bit. Level `0` corresponds to
    /// the highest task priority, so this finds the most urgent level.
    #[inline]
    pub(crate) fn first_level(&self) -> Option<usize> {
        if self.summary == 0 {
            None
        } else {
            Some(find_first_set(self.summary))
        }
    }

    /// The most urgent set bit, ignoring round-robin offsets. The scheduler
    /// proper goes through [`find_first_set_from`]; this plain query backs
    /// the model test.
    #[cfg(test)]
    pub(crate) fn find_first(&self) -> Option<(usize, usize)> {
        let level = self.first_level()?;
        Some((level, find_first_set(self.levels[level])))
    }
}
