//! Sequential depth-first proof-number search. Recursion keeps only the
//! current path in memory; everything else is memoized in the
//! transposition table and re-derived on demand. Descent is controlled
//! by the threshold algebra, which guarantees the chosen child stays the
//! most-proving node of its subtree while the thresholds hold.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::couple::Couple;
use crate::game::Game;
use crate::heuristics::{default_estimator, ProofNumberEstimator, SharedEstimator};
use crate::nimber_db::NimberDatabase;
use crate::pns_db::{PnsDatabase, StoredInfo, DEFAULT_TABLE_CAPACITY};
use crate::prove::node::{ChildFactory, ExpansionInfo, PnsNode};
use crate::prove::{Expander, PnValue, ProofNumbers, INF};
use crate::table::Value;
use crate::util;

/// Iterative-deepening bounds carried down the search. A node is worth
/// staying in while they hold; the derived child thresholds keep the
/// selected child most-proving within its subtree.
#[derive(Clone, Debug)]
pub struct Thresholds {
    pub proof_th: PnValue,
    pub disproof_th: PnValue,
    pub p_shift: PnValue,
    pub d_shift: PnValue,
    pub min_th: PnValue,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            proof_th: INF,
            disproof_th: INF,
            p_shift: PnValue::new(0),
            d_shift: PnValue::new(0),
            min_th: INF,
        }
    }
}

impl Thresholds {
    pub fn hold(&self, pns: ProofNumbers) -> bool {
        pns.proof < self.proof_th
            && pns.disproof < self.disproof_th
            && (pns.proof + self.p_shift).min(pns.disproof + self.d_shift) < self.min_th
    }

    /// Thresholds for the most-proving child. `switching_th` is the
    /// complexity at which the runner-up would take over (INF when there
    /// is none).
    pub fn descend(
        &self,
        multi_land: bool,
        children_len: usize,
        parent: ProofNumbers,
        mpn: ProofNumbers,
        switching_th: PnValue,
        epsilon: f32,
    ) -> Thresholds {
        if multi_land {
            self.descend_lands(children_len, parent, mpn, switching_th)
        } else {
            self.descend_plain(parent, mpn, switching_th, epsilon)
        }
    }

    fn descend_lands(
        &self,
        children_len: usize,
        parent: ProofNumbers,
        mpn: ProofNumbers,
        switching_th: PnValue,
    ) -> Thresholds {
        if children_len == 1 {
            return self.clone();
        }
        let bound = self
            .proof_th
            .min(self.disproof_th)
            .min(self.min_th - self.p_shift.min(self.d_shift));
        let min_th = switching_th.min(bound - parent.proof + mpn.proof.min(mpn.disproof));
        Thresholds {
            proof_th: INF,
            disproof_th: INF,
            p_shift: PnValue::new(0),
            d_shift: PnValue::new(0),
            min_th,
        }
    }

    fn descend_plain(
        &self,
        parent: ProofNumbers,
        mpn: ProofNumbers,
        switching_th: PnValue,
        epsilon: f32,
    ) -> Thresholds {
        let proof_th = self.disproof_th - parent.disproof + mpn.proof;
        let disproof_th = if epsilon > 1.0 {
            self.proof_th
                .min(switching_th.scale(1.0 + epsilon as f64))
        } else {
            self.proof_th.min(switching_th)
        };
        Thresholds {
            proof_th,
            disproof_th,
            p_shift: self.d_shift + parent.disproof - mpn.proof,
            d_shift: self.p_shift,
            min_th: self.min_th,
        }
    }
}

/// Transposition-table record of the sequential df-pn.
#[derive(Clone, Debug)]
pub struct StoredNodeInfo {
    pub pns: ProofNumbers,
    pub iterations: u64,
}

impl Value for StoredNodeInfo {
    fn update(&mut self, fresh: Self) {
        if self.pns.is_proved() {
            return;
        }
        self.pns = fresh.pns;
        self.iterations = self.iterations.max(fresh.iterations);
    }

    fn outranks(&self, other: &Self) -> bool {
        (self.pns.is_proved(), self.iterations) > (other.pns.is_proved(), other.iterations)
    }
}

impl StoredInfo for StoredNodeInfo {
    fn new(pns: ProofNumbers, iterations: u64) -> Self {
        StoredNodeInfo { pns, iterations }
    }

    fn proof_numbers(&self) -> ProofNumbers {
        self.pns
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }
}

/// Periodic persistence of the nimber database, invoked at safe points
/// (right after a node is stored).
pub trait BackupPolicy<G: Game>: Send {
    fn after_persist(&mut self, db: &NimberDatabase<G>);
}

pub struct NoBackup;

impl<G: Game> BackupPolicy<G> for NoBackup {
    fn after_persist(&mut self, _db: &NimberDatabase<G>) {}
}

pub struct TimedFileBackup {
    path: PathBuf,
    interval: Duration,
    last: Instant,
}

impl TimedFileBackup {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        TimedFileBackup {
            path,
            interval,
            last: Instant::now(),
        }
    }
}

impl<G: Game> BackupPolicy<G> for TimedFileBackup {
    fn after_persist(&mut self, db: &NimberDatabase<G>) {
        if self.last.elapsed() < self.interval {
            return;
        }
        let start = Instant::now();
        match db.store(&self.path, true) {
            Ok(()) => eprintln!(
                "backed up {} nimbers to {:?} in {} ms",
                db.len(),
                self.path,
                start.elapsed().as_millis()
            ),
            Err(err) => eprintln!("nimber backup failed: {}", err),
        }
        self.last = Instant::now();
    }
}

#[derive(Clone, Serialize)]
pub struct Stats {
    pub expansions: u64,
    pub solved: u64,
    #[serde(serialize_with = "util::serialize_histogram")]
    pub branch: Histogram<u64>,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            expansions: 0,
            solved: 0,
            branch: Histogram::new(3).expect("histogram"),
        }
    }
}

impl Stats {
    pub fn merge(&self, other: &Stats) -> Stats {
        let mut branch = self.branch.clone();
        branch.add(&other.branch).expect("histogram merge");
        Stats {
            expansions: self.expansions + other.expansions,
            solved: self.solved + other.solved,
            branch,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub tt_capacity: usize,
    /// Widens the switching threshold when above 1, trading re-expansions
    /// for fewer sibling switches.
    pub epsilon: f32,
    pub seed: u64,
    pub debug: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tt_capacity: DEFAULT_TABLE_CAPACITY,
            epsilon: 1.0,
            seed: 0,
            debug: 0,
        }
    }
}

pub struct DfpnSolver<G: Game> {
    cfg: Config,
    db: Arc<NimberDatabase<G>>,
    tt: PnsDatabase<G, StoredNodeInfo>,
    estimator: SharedEstimator<G>,
    rng: Option<StdRng>,
    backup: Box<dyn BackupPolicy<G>>,
    stats: Stats,
    iterations: u64,
    max_iterations: u64,
    current_tree: usize,
    max_tree: usize,
}

impl<G: Game> DfpnSolver<G> {
    pub fn new(db: Arc<NimberDatabase<G>>, cfg: Config) -> Self {
        Self::with_estimator(db, cfg, default_estimator())
    }

    pub fn with_estimator(
        db: Arc<NimberDatabase<G>>,
        cfg: Config,
        estimator: SharedEstimator<G>,
    ) -> Self {
        let rng = (cfg.seed > 0).then(|| StdRng::seed_from_u64(cfg.seed));
        let tt = PnsDatabase::with_capacity(cfg.tt_capacity);
        DfpnSolver {
            cfg,
            db,
            tt,
            estimator,
            rng,
            backup: Box::new(NoBackup),
            stats: Stats::default(),
            iterations: 0,
            max_iterations: 0,
            current_tree: 0,
            max_tree: 0,
        }
    }

    pub fn set_backup_policy(&mut self, backup: Box<dyn BackupPolicy<G>>) {
        self.backup = backup;
    }

    pub fn pns_database(&self) -> &PnsDatabase<G, StoredNodeInfo> {
        &self.tt
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn max_reached(&self) -> bool {
        self.max_iterations != 0 && self.iterations >= self.max_iterations
    }

    /// Children start from the transposition table when it knows them,
    /// else from the estimator.
    fn make_child(
        tt: &PnsDatabase<G, StoredNodeInfo>,
        estimator: &dyn ProofNumberEstimator<G>,
        couple: &Couple<G>,
    ) -> PnsNode<G> {
        match tt.find(&couple.to_compact()) {
            Some(info) => PnsNode::with_stored(couple, info.pns, info.iterations, 0),
            None => PnsNode::with_proof_numbers(couple, estimator.estimate(couple)),
        }
    }

    fn dfpn(&mut self, node: &mut PnsNode<G>, thresholds: &Thresholds) -> u64 {
        node.expand(
            &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
            &self.db,
        );
        node.update(
            &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
            &self.db,
        );

        self.stats.expansions += 1;
        let _ = self.stats.branch.record(node.children.len() as u64);
        let children_len = node.children.len();
        self.current_tree += children_len;
        self.max_tree = self.max_tree.max(self.current_tree + self.tt.len());

        let mut local: u64 = 1;
        self.iterations += 1;

        while thresholds.hold(node.info.pns) && !self.max_reached() {
            let (mpn_idx, mpn2_idx) = node.mpn_idx(self.rng.as_mut(), false);
            let switching_th = match mpn2_idx {
                Some(j) => node.switching_threshold(mpn_idx, j),
                None => INF,
            };
            let child_th = thresholds.descend(
                node.is_multi_land(),
                node.children.len(),
                node.info.pns,
                node.children[mpn_idx].info.pns,
                switching_th,
                self.cfg.epsilon,
            );

            local += self.dfpn(&mut node.children[mpn_idx], &child_th);
            node.update(
                &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
                &self.db,
            );
        }

        node.add_iterations(local);
        if node.is_proved() {
            self.stats.solved += 1;
        }
        self.update_databases(node);
        self.backup.after_persist(&self.db);

        self.current_tree -= children_len;
        node.close();
        local
    }

    fn update_databases(&self, node: &PnsNode<G>) {
        let compact = node.compact();
        if node.info.pns.is_loss() && !node.is_multi_land() {
            self.db.insert(compact.position.clone(), compact.nimber);
        }
        self.tt.insert(
            compact.clone(),
            StoredNodeInfo::new(node.info.pns, node.info.iterations),
        );
    }
}

impl<G: Game> Expander<G> for DfpnSolver<G> {
    fn expand_couple(&mut self, couple: &Couple<G>, max_iterations: u64) -> ExpansionInfo<G> {
        self.iterations = 0;
        self.max_iterations = max_iterations;
        self.current_tree = 0;
        self.max_tree = 0;

        let mut root = PnsNode::new(couple);
        self.dfpn(&mut root, &Thresholds::default());

        if self.cfg.debug > 0 {
            eprintln!(
                "dfpn: root={:?} iterations={} max_tree={} tt={} nimbers={}",
                root.info.pns,
                self.iterations,
                self.max_tree,
                self.tt.len(),
                self.db.len(),
            );
        }

        // Re-derive the root from the transposition table so the caller
        // sees the final child proof numbers.
        let tt = &self.tt;
        let estimator = &*self.estimator;
        let mut factory =
            |c: &Couple<G>| Self::make_child(tt, estimator, c);
        let factory: &mut ChildFactory<G> = &mut factory;
        root.expand(factory, &self.db);
        root.update(factory, &self.db);
        root.expansion_info()
    }

    fn clear_tree(&mut self) {
        self.tt.clear();
    }

    fn tree_size(&self) -> usize {
        self.max_tree
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn nimber_db(&self) -> &Arc<NimberDatabase<G>> {
        &self.db
    }
}
