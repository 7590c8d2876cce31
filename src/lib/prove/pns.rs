//! Best-first proof-number search over the shared tree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::couple::Couple;
use crate::game::Game;
use crate::heuristics::{default_estimator, SharedEstimator};
use crate::nimber_db::NimberDatabase;
use crate::progress::{Counter, Ticker};
use crate::prove::node::ExpansionInfo;
use crate::prove::tree::PnsTree;
use crate::prove::Expander;
use crate::util;

#[derive(Clone, Debug)]
pub struct Config {
    pub debug: usize,
    /// Non-zero seeds an RNG used to break MPN ties.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config { debug: 0, seed: 0 }
    }
}

static TICK_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_INTERVAL: usize = 1024;

pub struct BasicPnsSolver<G: Game> {
    cfg: Config,
    db: Arc<NimberDatabase<G>>,
    tree: PnsTree<G>,
    rng: Option<StdRng>,
    iterations: u64,
    tick: Ticker,
    progress: Counter<PROGRESS_INTERVAL>,
}

impl<G: Game> BasicPnsSolver<G> {
    pub fn new(db: Arc<NimberDatabase<G>>, cfg: Config) -> Self {
        Self::with_estimator(db, cfg, default_estimator())
    }

    pub fn with_estimator(
        db: Arc<NimberDatabase<G>>,
        cfg: Config,
        estimator: SharedEstimator<G>,
    ) -> Self {
        let rng = (cfg.seed > 0).then(|| StdRng::seed_from_u64(cfg.seed));
        BasicPnsSolver {
            cfg,
            db,
            tree: PnsTree::new(estimator),
            rng,
            iterations: 0,
            tick: Ticker::new(TICK_INTERVAL),
            progress: Counter::new(),
        }
    }

    pub fn tree(&self) -> &PnsTree<G> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut PnsTree<G> {
        &mut self.tree
    }
}

impl<G: Game> Expander<G> for BasicPnsSolver<G> {
    fn expand_couple(&mut self, couple: &Couple<G>, max_iterations: u64) -> ExpansionInfo<G> {
        self.iterations = 0;
        self.tree.set_root(couple);
        let start = Instant::now();

        while !self.tree.is_proved() && (max_iterations == 0 || self.iterations < max_iterations) {
            let Some(mpn) = self.tree.get_mpn(self.rng.as_mut(), false) else {
                break;
            };
            self.tree.expand_from_db(mpn, &self.db);
            self.tree.update_paths(mpn, &self.db);
            self.iterations += 1;

            if self.progress.tick() && self.cfg.debug > 0 && self.tick.tick() {
                let root = self.tree.root().expect("tree root");
                let elapsed = start.elapsed();
                eprintln!(
                    "t={}.{:03}s iters={} nodes={} root={:?} nimbers={} rss={}",
                    elapsed.as_secs(),
                    elapsed.subsec_millis(),
                    self.iterations,
                    self.tree.len(),
                    self.tree.info(root).pns,
                    self.db.len(),
                    util::read_rss(),
                );
            }
        }

        let root = self.tree.root().expect("tree root");
        self.tree.expansion_info(root)
    }

    fn clear_tree(&mut self) {
        self.tree.clear();
    }

    fn tree_size(&self) -> usize {
        self.tree.len()
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn nimber_db(&self) -> &Arc<NimberDatabase<G>> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;
    use crate::game::Outcome;

    fn solver() -> BasicPnsSolver<Rows> {
        BasicPnsSolver::new(Arc::new(NimberDatabase::new(false)), Config::default())
    }

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    #[test]
    fn test_solves_terminals() {
        let mut pns = solver();
        assert_eq!(pns.solve_couple(&couple("0 0")), Outcome::Loss);
        assert_eq!(pns.solve_couple(&couple("0 1")), Outcome::Win);
    }

    #[test]
    fn test_solves_single_rows() {
        let mut pns = solver();
        assert_eq!(pns.solve_couple(&couple("4 1")), Outcome::Loss);
        assert_eq!(pns.solve_couple(&couple("4 0")), Outcome::Win);
        assert_eq!(pns.solve_couple(&couple("3 3")), Outcome::Loss);
    }

    #[test]
    fn test_solves_multi_land() {
        let mut pns = solver();
        assert_eq!(pns.solve_couple(&couple("0*2 0")), Outcome::Loss);
        assert_eq!(pns.solve_couple(&couple("4+1 0")), Outcome::Loss);
        assert_eq!(pns.solve_couple(&couple("4+3 0")), Outcome::Win);
    }

    #[test]
    fn test_budget_returns_unknown() {
        let mut pns = solver();
        let info = pns.expand_couple(&couple("5+4 0"), 1);
        assert_eq!(info.pns.outcome(), Outcome::Unknown);
        assert_eq!(pns.iterations(), 1);
        assert!(pns.tree_size() > 1);
    }

    #[test]
    fn test_matches_dfs() {
        use crate::prove::dfs::DfsSolver;
        for s in ["3 0", "3 1", "5 0", "2+2 0", "3+2 1", "4+2+1 0"] {
            let mut dfs = DfsSolver::new(Arc::new(NimberDatabase::new(false)));
            let mut pns = solver();
            assert_eq!(
                dfs.solve_couple(&couple(s)),
                pns.solve_couple(&couple(s)),
                "outcome mismatch on {}",
                s
            );
        }
    }
}
