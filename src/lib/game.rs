pub mod rows;

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use crate::error::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Unknown,
}

impl Outcome {
    pub fn is_known(self) -> bool {
        self != Outcome::Unknown
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Outcome::Win => "Win",
            Outcome::Loss => "Loss",
            Outcome::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// The position capability consumed by the solver core.
///
/// Positions are canonical: `compute_children` returns simplified
/// successors, and two positions are equal iff their compact forms are.
/// A terminal position has no subgames, and a multi-land position is
/// never terminal.
pub trait Game: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// True for games scored by nimbers under normal play.
    const NORMAL_IMPARTIAL: bool;

    /// Stable byte-string form, usable as a hash key and as a line in the
    /// nimber database. Parsing (`FromStr`) validates and canonicalizes,
    /// so `from_compact` never fails on a compact built by this crate.
    type Compact: Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + FromStr<Err = Error> + Send + Sync + 'static;

    fn from_compact(compact: &Self::Compact) -> Self;
    fn to_compact(&self) -> Self::Compact;

    fn lives(&self) -> u32;
    fn is_terminal(&self) -> bool;
    fn is_multi_land(&self) -> bool;
    /// Independent sub-positions; empty iff not multi-land.
    fn subgames(&self) -> Vec<Self>;
    fn subgames_number(&self) -> usize;
    fn from_subgames(subgames: Vec<Self>) -> Self;

    fn compute_children(&self) -> Vec<Self>;
    fn estimate_children_number(&self) -> usize;
    fn estimate_proof_depth(&self) -> usize;
    fn estimate_disproof_depth(&self) -> usize;
}
