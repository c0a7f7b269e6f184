//! Dice and battle resolution.
//!
//! All randomness (combat rolls and the opening deal) comes from a single
//! [`Dice`] source owned by whoever resolves actions. Observers never roll:
//! the outcomes are recorded in events and replayed from there.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Most dice an attacker may roll
pub const MAX_ATTACK_DICE: u32 = 3;

/// Most dice a defender may roll
pub const MAX_DEFENCE_DICE: u32 = 2;

/// A source of six-sided die rolls
pub trait Dice {
    /// Roll a single die (1-6)
    fn roll_die(&mut self) -> u8;

    /// Shuffle items into a random order
    fn shuffle<T>(&mut self, items: &mut [T]);

    /// Roll `count` dice, sorted highest first
    fn roll(&mut self, count: u32) -> Vec<u8> {
        let mut dice: Vec<u8> = (0..count).map(|_| self.roll_die()).collect();
        dice.sort_unstable_by(|a, b| b.cmp(a));
        dice
    }
}

/// Dice backed by a random number generator
#[derive(Debug, Clone)]
pub struct RandomDice<R: Rng> {
    rng: R,
}

impl<R: Rng> RandomDice<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> Dice for RandomDice<R> {
    fn roll_die(&mut self) -> u8 {
        self.rng.gen_range(1..=6)
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

/// Dice that replay a fixed script of faces, cycling when exhausted.
/// An empty script rolls ones. Shuffling leaves the order untouched.
#[derive(Debug, Clone, Default)]
pub struct LoadedDice {
    script: Vec<u8>,
    upcoming: VecDeque<u8>,
}

impl LoadedDice {
    pub fn new(faces: impl IntoIterator<Item = u8>) -> Self {
        let script: Vec<u8> = faces.into_iter().map(|f| f.clamp(1, 6)).collect();
        Self {
            upcoming: script.iter().copied().collect(),
            script,
        }
    }
}

impl Dice for LoadedDice {
    fn roll_die(&mut self) -> u8 {
        if self.upcoming.is_empty() {
            self.upcoming.extend(self.script.iter().copied());
        }
        self.upcoming.pop_front().unwrap_or(1)
    }

    fn shuffle<T>(&mut self, _items: &mut [T]) {}
}

/// Troops lost by each side in one round of combat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Losses {
    pub attacker: u32,
    pub defender: u32,
}

impl Losses {
    pub fn total(&self) -> u32 {
        self.attacker + self.defender
    }
}

/// Number of dice the attacker rolls from a territory holding `troops`
pub fn attacker_dice(troops: u32) -> u32 {
    troops.saturating_sub(1).min(MAX_ATTACK_DICE)
}

/// Number of dice the defender rolls from a territory holding `troops`
pub fn defender_dice(troops: u32) -> u32 {
    troops.min(MAX_DEFENCE_DICE)
}

/// Compare the highest dice pairwise. The defender wins ties.
pub fn resolve(attacker: &[u8], defender: &[u8]) -> Losses {
    let mut attacker = attacker.to_vec();
    let mut defender = defender.to_vec();
    attacker.sort_unstable_by(|a, b| b.cmp(a));
    defender.sort_unstable_by(|a, b| b.cmp(a));

    attacker
        .iter()
        .zip(defender.iter())
        .fold(Losses::default(), |mut losses, (a, d)| {
            if a > d {
                losses.defender += 1;
            } else {
                losses.attacker += 1;
            }
            losses
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_attacker_sweeps() {
        let losses = resolve(&[6, 4, 2], &[5, 3]);
        assert_eq!(
            losses,
            Losses {
                attacker: 0,
                defender: 2
            }
        );
    }

    #[test]
    fn test_defender_wins_ties() {
        let losses = resolve(&[5, 3], &[5, 3]);
        assert_eq!(losses.attacker, 2);
        assert_eq!(losses.defender, 0);
    }

    #[test]
    fn test_split_result() {
        let losses = resolve(&[6, 1], &[4, 4]);
        assert_eq!(losses.attacker, 1);
        assert_eq!(losses.defender, 1);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        assert_eq!(resolve(&[2, 6, 4], &[3, 5]), resolve(&[6, 4, 2], &[5, 3]));
    }

    #[test]
    fn test_single_die_each() {
        let losses = resolve(&[1], &[6, 6]);
        assert_eq!(losses.total(), 1);
        assert_eq!(losses.attacker, 1);
    }

    #[test]
    fn test_dice_counts() {
        assert_eq!(attacker_dice(1), 0);
        assert_eq!(attacker_dice(2), 1);
        assert_eq!(attacker_dice(4), 3);
        assert_eq!(attacker_dice(40), 3);
        assert_eq!(defender_dice(1), 1);
        assert_eq!(defender_dice(7), 2);
    }

    #[test]
    fn test_loaded_dice_cycle_and_sort() {
        let mut dice = LoadedDice::new([2, 6, 4]);
        assert_eq!(dice.roll(3), vec![6, 4, 2]);
        assert_eq!(dice.roll_die(), 2);
        assert_eq!(dice.roll_die(), 6);
    }

    #[test]
    fn test_empty_loaded_dice_roll_ones() {
        let mut dice = LoadedDice::default();
        assert_eq!(dice.roll(2), vec![1, 1]);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let mut first: Vec<u32> = (0..20).collect();
        let mut second = first.clone();
        RandomDice::new(StdRng::seed_from_u64(3)).shuffle(&mut first);
        RandomDice::new(StdRng::seed_from_u64(3)).shuffle(&mut second);
        assert_eq!(first, second);

        let mut loaded: Vec<u32> = (0..5).collect();
        LoadedDice::default().shuffle(&mut loaded);
        assert_eq!(loaded, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_random_dice_in_range() {
        let mut dice = RandomDice::new(StdRng::seed_from_u64(7));
        for _ in 0..200 {
            let face = dice.roll_die();
            assert!((1..=6).contains(&face));
        }
    }
}
