//! The master side of distributed search: one tree, grown best-first,
//! whose most-proving leaves are handed out as locked jobs; workers send
//! expansions back and newly proven nimbers are diffused through the
//! tree before reaching the database.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::couple::{Couple, CoupleCompact};
use crate::error::Error;
use crate::game::Game;
use crate::heuristics::{default_estimator, SharedEstimator};
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;
use crate::prove::node::ExpansionInfo;
use crate::prove::tree::{NodeId, PnsTree};
use crate::prove::ProofNumbers;

pub struct PnsTreeManager<G: Game> {
    db: Arc<NimberDatabase<G>>,
    tree: PnsTree<G>,
    iterations: u64,
    rng: Option<StdRng>,
}

impl<G: Game> PnsTreeManager<G> {
    pub fn new(seed: u64) -> Self {
        Self::with_database(NimberDatabase::new(true), default_estimator(), seed)
    }

    pub fn with_database(
        db: NimberDatabase<G>,
        estimator: SharedEstimator<G>,
        seed: u64,
    ) -> Self {
        db.set_track_new(true);
        PnsTreeManager {
            db: Arc::new(db),
            tree: PnsTree::new(estimator),
            iterations: 0,
            rng: (seed > 0).then(|| StdRng::seed_from_u64(seed)),
        }
    }

    pub fn nimber_db(&self) -> &Arc<NimberDatabase<G>> {
        &self.db
    }

    pub fn tree(&self) -> &PnsTree<G> {
        &self.tree
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn is_proved(&self) -> bool {
        self.tree.is_proved()
    }

    pub fn locked_nodes(&self) -> usize {
        self.tree.locked_nodes()
    }

    pub fn node(&self, compact: &CoupleCompact<G>) -> Option<NodeId> {
        self.tree.get_node(compact)
    }

    pub fn load_nimbers(&self, path: &Path) -> Result<usize, Error> {
        self.db.load(path)
    }

    pub fn tracked_nimbers(&self, clear: bool) -> HashMap<G::Compact, Nimber> {
        self.db.tracked_nimbers(clear)
    }

    /// Grows the tree best-first until it holds `init_size` nodes or the
    /// root proves.
    pub fn init_tree(&mut self, root: &Couple<G>, init_size: usize) {
        self.iterations = 0;
        self.tree.clear();
        self.tree.set_root(root);

        while !self.tree.is_proved() && init_size > 0 && self.tree.len() < init_size {
            let Some(mpn) = self.tree.get_mpn(self.rng.as_mut(), true) else {
                break;
            };
            self.tree.expand_from_db(mpn, &self.db);
            self.tree.update_paths(mpn, &self.db);
            self.iterations += 1;
        }
    }

    /// The next job: the tree's most-proving leaf, locked so it is not
    /// handed out twice.
    pub fn get_job(&mut self) -> Option<NodeId> {
        let mpn = self.tree.get_mpn(self.rng.as_mut(), true)?;
        self.tree.lock(mpn);
        self.tree.update_paths(mpn, &self.db);
        Some(mpn)
    }

    /// Applies a definitive result from a worker that aborted before
    /// producing an expansion. The node stays unexpanded so it can be
    /// reassigned if the proof turns out partial.
    pub fn update_job(&mut self, id: NodeId, pns: ProofNumbers) {
        assert!(pns.is_proved(), "update_job expects a proved result");
        self.tree.set_proof_numbers(id, pns);
        self.tree.update_paths(id, &self.db);
    }

    /// Grafts a completed expansion and reopens the node for search.
    pub fn submit_job(&mut self, id: NodeId, info: &ExpansionInfo<G>) {
        self.iterations += 1;
        self.tree.expand_info(id, info);
        self.close_job(id);
    }

    /// Unlocks a job without grafting anything; the failure path.
    pub fn close_job(&mut self, id: NodeId) {
        self.tree.unlock(id);
        self.tree.update_paths(id, &self.db);
    }

    /// Diffuses freshly computed nimbers: every tree node carrying one of
    /// the positions collapses to its now-known outcome, then the batch
    /// lands in the database. Returns how many entries were new there.
    pub fn add_nimbers(&mut self, nimbers: HashMap<G::Compact, Nimber>) -> usize {
        for (position, &nimber) in nimbers.iter() {
            if self.db.get(position).is_some() {
                continue;
            }
            for id in self.tree.nodes_for_position(position) {
                let carried = self.tree.compact(id).nimber;
                if Nimber::merge(nimber, carried).is_win() {
                    self.tree.set_to_win(id);
                } else {
                    self.tree.set_to_loss(id);
                }
                self.tree.update_paths(id, &self.db);
            }
        }
        self.db.add_nimbers(nimbers)
    }
}
