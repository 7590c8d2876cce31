//! The reference solver: a plain recursive nimber computation with
//! alpha-beta-style cutoffs. It needs no proof-number machinery and
//! serves as ground truth for the PNS family.

use std::sync::Arc;

use crate::couple::Couple;
use crate::game::{Game, Outcome};
use crate::heuristics;
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;

pub struct DfsSolver<G: Game> {
    db: Arc<NimberDatabase<G>>,
    iterations: u64,
    current_tree: usize,
    max_tree: usize,
}

impl<G: Game> DfsSolver<G> {
    pub fn new(db: Arc<NimberDatabase<G>>) -> Self {
        DfsSolver {
            db,
            iterations: 0,
            current_tree: 0,
            max_tree: 0,
        }
    }

    pub fn nimber_db(&self) -> &Arc<NimberDatabase<G>> {
        &self.db
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn max_tree_size(&self) -> usize {
        self.max_tree
    }

    pub fn solve_position(&mut self, position: &G) -> Outcome {
        self.solve_couple(&Couple::new(position.clone(), Nimber::new(0)))
    }

    pub fn solve_couple(&mut self, couple: &Couple<G>) -> Outcome {
        self.current_tree = 0;
        self.max_tree = 0;
        self.couple_outcome(couple.clone())
    }

    /// The smallest nimber at which the position is a loss.
    pub fn compute_nimber(&mut self, position: &G) -> Nimber {
        if let Some(stored) = self.db.get(&position.to_compact()) {
            return stored;
        }
        let mut nimber = Nimber::new(0);
        loop {
            if self.couple_outcome(Couple::new(position.clone(), nimber)) == Outcome::Loss {
                return nimber;
            }
            nimber = nimber.succ();
        }
    }

    fn couple_outcome(&mut self, mut couple: Couple<G>) -> Outcome {
        couple.merge_computed_lands(&self.db);
        self.merge_extra_lands(&mut couple);
        couple.merge_computed_lands(&self.db);
        let outcome = couple.outcome();
        if outcome != Outcome::Unknown {
            return outcome;
        }
        self.single_land_outcome(&couple)
    }

    /// Solves all subgames but the last recursively and folds their
    /// nimbers into the couple.
    fn merge_extra_lands(&mut self, couple: &mut Couple<G>) {
        if !couple.position.is_multi_land() {
            return;
        }
        let mut subgames = couple.position.subgames();
        subgames.sort_by(heuristics::game_order);
        self.iterations += 1;

        let last = subgames.pop().expect("multi-land position without subgames");
        let mut merged = couple.nimber;
        for subgame in subgames {
            merged = Nimber::merge(merged, self.compute_nimber(&subgame));
        }
        couple.position = last;
        couple.nimber = merged;
    }

    fn single_land_outcome(&mut self, couple: &Couple<G>) -> Outcome {
        let (outcome, children) = couple.compute_children(&self.db);
        if outcome != Outcome::Unknown {
            if outcome == Outcome::Loss {
                self.db.insert_position(&couple.position, couple.nimber);
            }
            return outcome;
        }

        self.iterations += 1;
        let children_len = children.len();
        self.current_tree += children_len;
        self.max_tree = self.max_tree.max(self.current_tree);

        let mut child_outcome = Outcome::Unknown;
        for child in children {
            child_outcome = self.couple_outcome(child);
            if child_outcome == Outcome::Loss {
                break;
            }
        }
        self.current_tree -= children_len;

        if child_outcome == Outcome::Loss {
            return Outcome::Win;
        }
        self.db.insert_position(&couple.position, couple.nimber);
        Outcome::Loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;

    fn solver() -> DfsSolver<Rows> {
        DfsSolver::new(Arc::new(NimberDatabase::new(false)))
    }

    fn row(n: u32) -> Rows {
        Rows::single(n)
    }

    #[test]
    fn test_kayles_grundy_values() {
        let mut dfs = solver();
        let expected = [0u8, 1, 2, 3, 1, 4, 3, 2, 1];
        for (n, &g) in expected.iter().enumerate() {
            assert_eq!(
                dfs.compute_nimber(&row(n as u32)),
                Nimber::new(g),
                "K({})",
                n
            );
        }
    }

    #[test]
    fn test_terminal_couples() {
        let mut dfs = solver();
        assert_eq!(dfs.solve_couple(&Couple::parse("0 0").unwrap()), Outcome::Loss);
        assert_eq!(dfs.solve_couple(&Couple::parse("0 1").unwrap()), Outcome::Win);
    }

    #[test]
    fn test_two_dead_singletons() {
        let mut dfs = solver();
        assert_eq!(dfs.solve_position(&Rows::from_compact(&"0*2".parse().unwrap())), Outcome::Loss);
    }

    #[test]
    fn test_decomposed_positions() {
        let mut dfs = solver();
        // 4+1: K(4) ^ K(1) = 1 ^ 1 = 0, a loss.
        assert_eq!(dfs.solve_position(&Rows::from_compact(&"4+1".parse().unwrap())), Outcome::Loss);
        // 4+3: 1 ^ 3 = 2, a win.
        assert_eq!(dfs.solve_position(&Rows::from_compact(&"4+3".parse().unwrap())), Outcome::Win);
        // 2+2+3: 2 ^ 2 ^ 3 = 3, a win.
        assert_eq!(dfs.solve_position(&Rows::from_compact(&"2*2+3".parse().unwrap())), Outcome::Win);
    }

    #[test]
    fn test_losses_land_in_database() {
        let mut dfs = solver();
        assert_eq!(dfs.compute_nimber(&row(3)), Nimber::new(3));
        assert_eq!(dfs.nimber_db().get(&"3".parse().unwrap()), Some(Nimber::new(3)));
        // A second query is a pure lookup.
        let before = dfs.iterations();
        assert_eq!(dfs.compute_nimber(&row(3)), Nimber::new(3));
        assert_eq!(dfs.iterations(), before);
    }

    #[test]
    fn test_preseeded_database_short_circuits() {
        let db = Arc::new(NimberDatabase::<Rows>::new(false));
        db.insert("5".parse().unwrap(), Nimber::new(4));
        let mut dfs = DfsSolver::new(db);
        // 5+4: 4 ^ 1 = 5, a win; "5" comes straight from the database.
        assert_eq!(dfs.solve_position(&Rows::from_compact(&"5+4".parse().unwrap())), Outcome::Win);
    }
}
