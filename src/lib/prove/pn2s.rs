//! PN²: best-first PNS whose leaf expansions are themselves small df-pn
//! searches, so each tree node arrives with proof numbers backed by real
//! work instead of estimates.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::couple::Couple;
use crate::game::Game;
use crate::heuristics::{default_estimator, SharedEstimator};
use crate::nimber_db::NimberDatabase;
use crate::pns_db::DEFAULT_TABLE_CAPACITY;
use crate::prove::node::ExpansionInfo;
use crate::prove::tree::PnsTree;
use crate::prove::{dfpn, Expander};

#[derive(Clone, Debug)]
pub struct Config {
    /// Iterations granted to the inner df-pn per leaf expansion.
    pub inner_budget: u64,
    pub tt_capacity: usize,
    pub epsilon: f32,
    pub seed: u64,
    pub debug: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inner_budget: 100,
            tt_capacity: DEFAULT_TABLE_CAPACITY,
            epsilon: 1.0,
            seed: 0,
            debug: 0,
        }
    }
}

pub struct Pn2sSolver<G: Game> {
    db: Arc<NimberDatabase<G>>,
    tree: PnsTree<G>,
    inner: dfpn::DfpnSolver<G>,
    inner_budget: u64,
    rng: Option<StdRng>,
    iterations: u64,
}

impl<G: Game> Pn2sSolver<G> {
    pub fn new(db: Arc<NimberDatabase<G>>, cfg: Config) -> Self {
        Self::with_estimator(db, cfg, default_estimator())
    }

    pub fn with_estimator(
        db: Arc<NimberDatabase<G>>,
        cfg: Config,
        estimator: SharedEstimator<G>,
    ) -> Self {
        let inner = dfpn::DfpnSolver::with_estimator(
            db.clone(),
            dfpn::Config {
                tt_capacity: cfg.tt_capacity,
                epsilon: cfg.epsilon,
                seed: cfg.seed,
                debug: cfg.debug.saturating_sub(1),
            },
            estimator.clone(),
        );
        Pn2sSolver {
            db,
            tree: PnsTree::new(estimator),
            inner,
            inner_budget: cfg.inner_budget,
            rng: (cfg.seed > 0).then(|| StdRng::seed_from_u64(cfg.seed)),
            iterations: 0,
        }
    }

    pub fn tree(&self) -> &PnsTree<G> {
        &self.tree
    }
}

impl<G: Game> Expander<G> for Pn2sSolver<G> {
    fn expand_couple(&mut self, couple: &Couple<G>, max_iterations: u64) -> ExpansionInfo<G> {
        self.iterations = 0;
        self.tree.set_root(couple);

        while !self.tree.is_proved() && (max_iterations == 0 || self.iterations < max_iterations) {
            let Some(mpn) = self.tree.get_mpn(self.rng.as_mut(), false) else {
                break;
            };
            let leaf = Couple::from_compact(self.tree.compact(mpn));
            let info = self.inner.expand_couple(&leaf, self.inner_budget);
            self.tree.expand_info(mpn, &info);
            self.tree.update_paths(mpn, &self.db);
            self.iterations += 1;
        }

        let root = self.tree.root().expect("tree root");
        self.tree.expansion_info(root)
    }

    fn clear_tree(&mut self) {
        self.tree.clear();
        self.inner.clear_tree();
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
