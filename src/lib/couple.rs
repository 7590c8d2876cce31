use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::game::{Game, Outcome};
use crate::heuristics;
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;

/// A position combined with a Nim pile: the unit the solvers reason about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Couple<G: Game> {
    pub position: G,
    pub nimber: Nimber,
}

/// The hashable, serializable form of a couple: `<position> <nimber>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CoupleCompact<G: Game> {
    pub position: G::Compact,
    pub nimber: Nimber,
}

impl<G: Game> Couple<G> {
    pub fn new(position: G, nimber: Nimber) -> Self {
        Couple { position, nimber }
    }

    pub fn from_compact(compact: &CoupleCompact<G>) -> Self {
        Couple {
            position: G::from_compact(&compact.position),
            nimber: compact.nimber,
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let compact: CoupleCompact<G> = s.parse()?;
        Ok(Couple::from_compact(&compact))
    }

    pub fn to_compact(&self) -> CoupleCompact<G> {
        CoupleCompact {
            position: self.position.to_compact(),
            nimber: self.nimber,
        }
    }

    /// Immediate outcome, known only for terminal positions.
    pub fn outcome(&self) -> Outcome {
        if !self.position.is_terminal() {
            return Outcome::Unknown;
        }
        if G::NORMAL_IMPARTIAL {
            if self.nimber.is_win() {
                Outcome::Win
            } else {
                Outcome::Loss
            }
        } else {
            Outcome::Loss
        }
    }

    pub fn estimate_proof_depth(&self) -> usize {
        self.position.estimate_proof_depth() + self.nimber.value() as usize
    }

    pub fn estimate_disproof_depth(&self) -> usize {
        self.position.estimate_disproof_depth() + self.nimber.value() as usize
    }

    /// Folds every subgame whose nimber the database already knows into
    /// the Nim part and drops it from the position. No-op unless the game
    /// is normal impartial and the position is multi-land. Returns whether
    /// anything was merged.
    pub fn merge_computed_lands(&mut self, db: &NimberDatabase<G>) -> bool {
        if !G::NORMAL_IMPARTIAL || !self.position.is_multi_land() {
            return false;
        }

        let mut modified = false;
        let mut uncomputed = Vec::with_capacity(self.position.subgames_number());
        for subgame in self.position.subgames() {
            match db.get(&subgame.to_compact()) {
                Some(stored) => {
                    self.nimber = Nimber::merge(self.nimber, stored);
                    modified = true;
                }
                None => uncomputed.push(subgame),
            }
        }

        self.position = G::from_subgames(uncomputed);
        modified
    }

    /// Computes the ordered child list. The returned outcome short-circuits
    /// the children: `Win` when some reply is a proven loss, `Loss` when no
    /// reply survives, `Unknown` otherwise.
    pub fn compute_children(&self, db: &NimberDatabase<G>) -> (Outcome, Vec<Couple<G>>) {
        let outcome = self.outcome();
        if outcome != Outcome::Unknown {
            return (outcome, Vec::new());
        }

        let mut children = Vec::new();

        // Nim children: shrink the pile.
        for k in 0..self.nimber.value() {
            children.push(Couple::new(self.position.clone(), Nimber::new(k)));
        }

        // Position children, folded against the database.
        for child_position in self.position.compute_children() {
            if !G::NORMAL_IMPARTIAL
                && !child_position.is_terminal()
                && db.get(&child_position.to_compact()).is_some()
            {
                return (Outcome::Win, Vec::new());
            }

            let mut child = Couple::new(child_position, self.nimber);
            child.merge_computed_lands(db);
            if child.position.is_terminal() {
                if child.outcome() == Outcome::Loss {
                    return (Outcome::Win, Vec::new());
                }
            } else {
                children.push(child);
            }
        }

        if children.is_empty() {
            return (Outcome::Loss, Vec::new());
        }
        children.sort_by(heuristics::couple_order);
        (Outcome::Unknown, children)
    }
}

impl<G: Game> fmt::Display for Couple<G> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_compact())
    }
}

impl<G: Game> fmt::Display for CoupleCompact<G> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.position, self.nimber)
    }
}

impl<G: Game> FromStr for CoupleCompact<G> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (position, nimber) = s
            .split_once(' ')
            .ok_or_else(|| Error::InvalidCouple(s.to_owned()))?;
        Ok(CoupleCompact {
            position: position.parse()?,
            nimber: nimber.parse()?,
        })
    }
}

impl<G: Game> PartialOrd for CoupleCompact<G> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<G: Game> Ord for CoupleCompact<G> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position
            .cmp(&other.position)
            .then(self.nimber.cmp(&other.nimber))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    #[test]
    fn test_terminal_outcome() {
        assert_eq!(couple("0 0").outcome(), Outcome::Loss);
        assert_eq!(couple("0 1").outcome(), Outcome::Win);
        assert_eq!(couple("3 0").outcome(), Outcome::Unknown);
    }

    #[test]
    fn test_compact_roundtrip() {
        for s in ["0 0", "0*2 3", "5+2*2 1"] {
            let c = couple(s);
            assert_eq!(c.to_compact().to_string(), s);
            assert_eq!(Couple::<Rows>::parse(&c.to_string()).unwrap(), c);
        }
        assert!(Couple::<Rows>::parse("3").is_err());
        assert!(Couple::<Rows>::parse("3 x").is_err());
    }

    #[test]
    fn test_merge_computed_lands() {
        let db = NimberDatabase::<Rows>::new(false);
        db.insert("3".parse().unwrap(), Nimber::new(3));

        let mut c = couple("5+3 0");
        assert!(c.merge_computed_lands(&db));
        assert_eq!(c.nimber, Nimber::new(3));
        assert_eq!(c.position.to_compact().as_str(), "5");

        // Idempotent against a fixed database.
        let mut again = c.clone();
        assert!(!again.merge_computed_lands(&db));
        assert_eq!(again, c);
    }

    #[test]
    fn test_merge_may_turn_terminal() {
        let db = NimberDatabase::<Rows>::new(false);
        db.insert("3".parse().unwrap(), Nimber::new(3));
        db.insert("2".parse().unwrap(), Nimber::new(2));

        let mut c = couple("3+2 0");
        assert!(c.merge_computed_lands(&db));
        assert!(c.position.is_terminal());
        assert_eq!(c.nimber, Nimber::new(1));
        assert_eq!(c.outcome(), Outcome::Win);
    }

    #[test]
    fn test_nim_children() {
        let db = NimberDatabase::<Rows>::new(false);
        let (outcome, children) = couple("2 2").compute_children(&db);
        assert_eq!(outcome, Outcome::Unknown);
        // Two nim children (nimber 0 and 1) plus the position children of "2".
        let nim: Vec<_> = children
            .iter()
            .filter(|c| c.position.to_compact().as_str() == "2")
            .collect();
        assert_eq!(nim.len(), 2);
    }

    #[test]
    fn test_immediate_win_on_losing_reply() {
        // "1" has the single child "0", terminal with nimber 0.
        let db = NimberDatabase::<Rows>::new(false);
        let (outcome, children) = couple("1 0").compute_children(&db);
        assert_eq!(outcome, Outcome::Win);
        assert!(children.is_empty());
    }

    #[test]
    fn test_loss_when_no_reply_survives() {
        // "1 1": replies are the nim child "1 0" (kept) — not a loss.
        // "0*2 0" is multi-land so child generation is not the loss path;
        // use a terminal couple instead.
        let db = NimberDatabase::<Rows>::new(false);
        let (outcome, _) = couple("0 0").compute_children(&db);
        assert_eq!(outcome, Outcome::Loss);
    }
}
