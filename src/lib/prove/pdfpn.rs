//! Parallel depth-first proof-number search. Workers share the
//! transposition table and coordinate through a bounded-depth sync tree
//! whose leaves are the work items; each worker runs a private df-pn
//! below its leaf. Workers inside the same entry see each other through
//! the table's worker marks (discouraging convergence) and through
//! per-worker mailboxes (cooperative backtracking when an entry proves
//! elsewhere).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::SmallVec;

use crate::couple::{Couple, CoupleCompact};
use crate::game::Game;
use crate::heuristics::{default_estimator, ProofNumberEstimator, SharedEstimator};
use crate::nimber_db::NimberDatabase;
use crate::pns_db::{PnsDatabase, StoredInfo, DEFAULT_TABLE_CAPACITY};
use crate::prove::dfpn::Thresholds;
use crate::prove::node::{ExpansionInfo, PnsNode};
use crate::prove::tree::{NodeId, PnsTree};
use crate::prove::{Expander, ProofNumbers, INF};
use crate::table::Value;

/// Dedup set of couples whose proof status changed elsewhere; drained
/// atomically by the owning worker.
pub struct Mailbox<G: Game> {
    messages: Mutex<HashSet<CoupleCompact<G>>>,
}

impl<G: Game> Mailbox<G> {
    pub fn new() -> Self {
        Mailbox {
            messages: Mutex::new(HashSet::new()),
        }
    }

    pub fn notify(&self, compact: CoupleCompact<G>) {
        self.messages.lock().insert(compact);
    }

    pub fn drain(&self) -> HashSet<CoupleCompact<G>> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl<G: Game> Default for Mailbox<G> {
    fn default() -> Self {
        Mailbox::new()
    }
}

/// Transposition-table record of the parallel df-pn: proof numbers plus
/// the workers currently exploring the entry.
#[derive(Clone, Debug)]
pub struct StoredParallelNodeInfo {
    pub pns: ProofNumbers,
    pub iterations: u64,
    pub workers: SmallVec<[u32; 4]>,
}

impl Value for StoredParallelNodeInfo {
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

    fn mark(&mut self, worker: usize) {
        let worker = worker as u32;
        if !self.workers.contains(&worker) {
            self.workers.push(worker);
        }
    }

    fn unmark(&mut self, worker: usize) {
        let worker = worker as u32;
        self.workers.retain(|&mut w| w != worker);
    }
}

impl StoredInfo for StoredParallelNodeInfo {
    fn new(pns: ProofNumbers, iterations: u64) -> Self {
        StoredParallelNodeInfo {
            pns,
            iterations,
            workers: SmallVec::new(),
        }
    }

    fn proof_numbers(&self) -> ProofNumbers {
        self.pns
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn workers(&self) -> usize {
        self.workers.len()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub workers: usize,
    /// Depth of the sync tree. Zero disables it: every worker then runs
    /// df-pn from the root against the shared table.
    pub branching_depth: usize,
    pub epsilon: f32,
    pub tt_capacity: usize,
    pub seed: u64,
    pub debug: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workers: 1,
            branching_depth: 2,
            epsilon: 1.0,
            tt_capacity: DEFAULT_TABLE_CAPACITY,
            seed: 0,
            debug: 0,
        }
    }
}

struct SyncState<G: Game> {
    tree: PnsTree<G>,
    finished: bool,
}

/// A mutex guard that can be released around a long job and re-acquired
/// afterwards.
struct YieldableGuard<'a, T> {
    lock: &'a Mutex<T>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T> YieldableGuard<'a, T> {
    fn new(lock: &'a Mutex<T>) -> Self {
        YieldableGuard {
            lock,
            guard: Some(lock.lock()),
        }
    }

    fn drop_lock(&mut self) {
        debug_assert!(self.guard.is_some());
        self.guard = None;
    }

    fn acquire_lock(&mut self) {
        debug_assert!(self.guard.is_none());
        self.guard = Some(self.lock.lock());
    }

    fn wait(&mut self, cond: &Condvar) {
        cond.wait(self.guard.as_mut().expect("guard held"));
    }

    fn get(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard held")
    }
}

pub struct ParallelDfpn<G: Game> {
    cfg: Config,
    db: Arc<NimberDatabase<G>>,
    tt: PnsDatabase<G, StoredParallelNodeInfo>,
    estimator: SharedEstimator<G>,
    sync: Mutex<SyncState<G>>,
    cv: Condvar,
    terminate: AtomicBool,
    mailboxes: Vec<Mailbox<G>>,
    iterations: AtomicU64,
    max_iterations: u64,
}

impl<G: Game> ParallelDfpn<G> {
    pub fn new(db: Arc<NimberDatabase<G>>, cfg: Config) -> Self {
        Self::with_estimator(db, cfg, default_estimator())
    }

    pub fn with_estimator(
        db: Arc<NimberDatabase<G>>,
        cfg: Config,
        estimator: SharedEstimator<G>,
    ) -> Self {
        assert!(cfg.workers >= 1, "at least one worker");
        let tt = PnsDatabase::with_capacity(cfg.tt_capacity);
        let mailboxes = (0..cfg.workers).map(|_| Mailbox::new()).collect();
        ParallelDfpn {
            sync: Mutex::new(SyncState {
                tree: PnsTree::new(estimator.clone()),
                finished: false,
            }),
            cfg,
            db,
            tt,
            estimator,
            cv: Condvar::new(),
            terminate: AtomicBool::new(false),
            mailboxes,
            iterations: AtomicU64::new(0),
            max_iterations: 0,
        }
    }

    pub fn pns_database(&self) -> &PnsDatabase<G, StoredParallelNodeInfo> {
        &self.tt
    }

    fn make_child(
        tt: &PnsDatabase<G, StoredParallelNodeInfo>,
        estimator: &dyn ProofNumberEstimator<G>,
        couple: &Couple<G>,
    ) -> PnsNode<G> {
        match tt.find(&couple.to_compact()) {
            Some(info) => {
                PnsNode::with_stored(couple, info.pns, info.iterations, info.workers.len())
            }
            None => PnsNode::with_proof_numbers(couple, estimator.estimate(couple)),
        }
    }

    fn limit_reached(&self, thread_iterations: u64) -> bool {
        self.max_iterations != 0 && thread_iterations >= self.max_iterations
    }

    fn run(&self, root: &Couple<G>, worker: usize) {
        let mut rng = StdRng::seed_from_u64(self.cfg.seed.wrapping_add(worker as u64));
        let use_rng = self.cfg.workers > 1 || self.cfg.seed > 0;

        if self.cfg.branching_depth == 0 {
            self.run_flat(root, worker, if use_rng { Some(&mut rng) } else { None });
            return;
        }

        let mut thread_iterations: u64 = 0;
        loop {
            let mut guard = YieldableGuard::new(&self.sync);
            {
                let state = guard.get();
                if state.tree.is_proved()
                    || state.finished
                    || self.limit_reached(thread_iterations)
                {
                    state.finished = true;
                    self.cv.notify_all();
                    break;
                }
            }

            let root_locked = |state: &SyncState<G>| {
                state
                    .tree
                    .root()
                    .map_or(false, |r| state.tree.info(r).locked)
            };
            if root_locked(guard.get()) {
                while root_locked(guard.get())
                    && !guard.get().tree.is_proved()
                    && !guard.get().finished
                {
                    guard.wait(&self.cv);
                }
                if guard.get().tree.is_proved() || guard.get().finished {
                    break;
                }
            }

            let remaining = if self.max_iterations != 0 {
                self.max_iterations - thread_iterations
            } else {
                u64::MAX
            };
            let local = self.try_run_job(
                &mut guard,
                remaining,
                worker,
                if use_rng { Some(&mut rng) } else { None },
            );
            thread_iterations += local;
            self.iterations.fetch_add(local, Ordering::Relaxed);
        }

        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Kaneko-style parallel df-pn without a sync tree: every worker
    /// searches from the root, differentiated only by RNG tie-breaks and
    /// the contention penalties in the shared table.
    fn run_flat(&self, root: &Couple<G>, worker: usize, rng: Option<&mut StdRng>) {
        let mut node = PnsNode::new(root);
        let mut path = vec![node.compact().clone()];
        let remaining = if self.max_iterations != 0 {
            self.max_iterations
        } else {
            u64::MAX
        };
        let (iterations, _) = self.dfpn(
            &mut node,
            &mut path,
            &Thresholds::default(),
            remaining,
            worker,
            rng,
            true,
        );
        self.terminate.store(true, Ordering::SeqCst);
        self.iterations.fetch_add(iterations, Ordering::Relaxed);
        self.cv.notify_all();
    }

    /// Select a sync-tree leaf, run a local df-pn below it, and fold the
    /// result back into the tree. Returns the iterations spent.
    fn try_run_job(
        &self,
        guard: &mut YieldableGuard<SyncState<G>>,
        remaining: u64,
        worker: usize,
        mut rng: Option<&mut StdRng>,
    ) -> u64 {
        let (mpn, thresholds, depth, selection_iterations) =
            self.get_sync_mpn(guard.get(), rng.as_deref_mut());
        let Some(mpn) = mpn else {
            return selection_iterations;
        };

        let couple = {
            let state = guard.get();
            state.tree.lock(mpn);
            state.tree.update_paths(mpn, &self.db);
            Couple::from_compact(state.tree.compact(mpn))
        };
        guard.drop_lock();

        let mut node = PnsNode::new(&couple);
        let mut path = vec![node.compact().clone()];
        let (job_iterations, _) = self.dfpn(
            &mut node,
            &mut path,
            &thresholds,
            remaining,
            worker,
            rng,
            false,
        );

        guard.acquire_lock();
        let state = guard.get();
        state.tree.unlock(mpn);
        if depth < self.cfg.branching_depth {
            let info = node.expansion_info();
            state.tree.expand_info(mpn, &info);
        } else {
            state.tree.set_proof_numbers(mpn, node.info.pns);
        }
        state.tree.update_paths(mpn, &self.db);
        if self.cfg.debug > 0 {
            let root = state.tree.root().expect("sync root");
            eprintln!(
                "[{}] job d={} iters={} root={:?}",
                worker,
                depth,
                job_iterations,
                state.tree.info(root).pns,
            );
        }
        self.cv.notify_all();

        job_iterations + selection_iterations
    }

    /// Walk the sync tree to the next work item, deriving thresholds on
    /// the way down and expanding frontier nodes that have no runner-up.
    fn get_sync_mpn(
        &self,
        state: &mut SyncState<G>,
        mut rng: Option<&mut StdRng>,
    ) -> (Option<NodeId>, Thresholds, usize, u64) {
        let default = (None, Thresholds::default(), 0, 0);
        let Some(root) = state.tree.root() else {
            return default;
        };
        if state.tree.info(root).pns.is_proved() || state.tree.info(root).locked {
            return default;
        }

        let mut mpn = root;
        let mut expand_mpn = false;
        let mut thresholds = Thresholds::default();
        let mut depth = 0;
        let mut iterations = 0;

        while state.tree.info(mpn).expanded || expand_mpn {
            if expand_mpn && !state.tree.info(mpn).expanded {
                let couple = Couple::from_compact(state.tree.compact(mpn));
                let mut temp = PnsNode::new(&couple);
                temp.expand(
                    &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
                    &self.db,
                );
                let info = temp.expansion_info();
                state.tree.expand_info(mpn, &info);
                state.tree.update_paths(mpn, &self.db);
                iterations += 1;
            }

            let info = state.tree.info(mpn);
            if state.tree.children_len(mpn) == 0 || info.locked || !thresholds.hold(info.pns) {
                return (None, Thresholds::default(), 0, iterations);
            }

            state.tree.add_iterations(mpn, 1);
            let (idx, mpn2_idx) = state.tree.mpn_idx(mpn, rng.as_deref_mut(), true);
            let switching_th = match mpn2_idx {
                Some(j) => state.tree.switching_threshold(mpn, idx, j),
                None => INF,
            };
            thresholds = thresholds.descend(
                state.tree.state(mpn).multi_land,
                state.tree.children_len(mpn),
                state.tree.info(mpn).pns,
                state.tree.info(state.tree.child_of(mpn, idx)).pns,
                switching_th,
                self.cfg.epsilon,
            );

            expand_mpn = mpn2_idx.is_none();
            mpn = state.tree.child_of(mpn, idx);
            depth += 1;
        }

        (Some(mpn), thresholds, depth, iterations)
    }

    /// The worker-local df-pn. `path` holds the compacts of the nodes on
    /// the current stack, leaf last; the returned index (if any) is the
    /// shallowest ancestor a mailbox notification asks to unwind to.
    fn dfpn(
        &self,
        node: &mut PnsNode<G>,
        path: &mut Vec<CoupleCompact<G>>,
        thresholds: &Thresholds,
        remaining: u64,
        worker: usize,
        mut rng: Option<&mut StdRng>,
        unexpand: bool,
    ) -> (u64, Option<usize>) {
        if remaining == 0 {
            return (0, None);
        }
        self.open_node(node, worker);

        let mut local: u64 = 1;
        while thresholds.hold(node.info.pns)
            && local < remaining
            && !self.terminate.load(Ordering::Relaxed)
        {
            let land_switching = self.cfg.workers > 1;
            let (idx, mpn2_idx) = node.mpn_idx(rng.as_deref_mut(), land_switching);
            let switching_th = match mpn2_idx {
                Some(j) => node.switching_threshold(idx, j),
                None => INF,
            };
            let child_th = thresholds.descend(
                node.is_multi_land(),
                node.children.len(),
                node.info.pns,
                node.children[idx].info.pns,
                switching_th,
                self.cfg.epsilon,
            );

            path.push(node.children[idx].compact().clone());
            let (child_iterations, mut backtrack) = self.dfpn(
                &mut node.children[idx],
                path,
                &child_th,
                remaining - local,
                worker,
                rng.as_deref_mut(),
                true,
            );
            path.pop();

            local += child_iterations;
            node.add_iterations(child_iterations);

            if self.cfg.workers > 1 {
                self.update_children_info(node);
            }
            node.update(
                &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
                &self.db,
            );
            self.update_databases(node, worker);

            if backtrack.is_none() {
                backtrack = self.check_mailbox(worker, path);
            }
            if let Some(target) = backtrack {
                self.close_node(node, worker, unexpand);
                let here = path.len() - 1;
                return (local, if target == here { None } else { Some(target) });
            }
        }

        self.close_node(node, worker, unexpand);
        (local, None)
    }

    fn open_node(&self, node: &mut PnsNode<G>, worker: usize) {
        node.add_iterations(1);
        node.expand(
            &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
            &self.db,
        );
        node.update(
            &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
            &self.db,
        );
        self.update_databases(node, worker);
        self.tt.mark(node.compact(), worker);
    }

    fn close_node(&self, node: &mut PnsNode<G>, worker: usize, unexpand: bool) {
        if unexpand {
            node.close();
        }
        self.tt.unmark(node.compact(), worker);
    }

    /// Refresh child records from the shared table so contention
    /// penalties and foreign proofs are visible.
    fn update_children_info(&self, node: &mut PnsNode<G>) {
        for child in &mut node.children {
            if let Some(info) = self.tt.find(child.compact()) {
                child.update_stored_info(info.pns, info.iterations, info.workers.len());
            }
        }
    }

    /// Store the node; when this flips an entry from unproved to proved,
    /// notify every other worker marked inside it.
    fn update_databases(&self, node: &PnsNode<G>, worker: usize) {
        let compact = node.compact();
        if node.info.pns.is_loss() && !node.is_multi_land() {
            self.db.insert(compact.position.clone(), compact.nimber);
        }

        let fresh = StoredParallelNodeInfo::new(node.info.pns, node.info.iterations);
        if let Some(previous) = self.tt.insert(compact.clone(), fresh) {
            if !previous.pns.is_proved() && node.info.pns.is_proved() {
                for &other in &previous.workers {
                    if other as usize != worker {
                        self.mailboxes[other as usize].notify(compact.clone());
                    }
                }
            }
        }
    }

    fn check_mailbox(&self, worker: usize, path: &[CoupleCompact<G>]) -> Option<usize> {
        let messages = self.mailboxes[worker].drain();
        if messages.is_empty() {
            return None;
        }
        path.iter().position(|compact| messages.contains(compact))
    }

    fn init_sync_tree(&mut self, root: &Couple<G>) {
        let state = self.sync.get_mut();
        if let Some(existing) = state.tree.root() {
            if *state.tree.compact(existing) == root.to_compact() {
                return;
            }
        }

        state.tree.update_pns_database(&self.tt);
        state.tree.clear();
        state.tree.set_root(root);

        let mut temp = PnsNode::new(root);
        temp.expand(
            &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
            &self.db,
        );
        let info = temp.expansion_info();
        let root_id = state.tree.root().expect("sync root");
        state.tree.expand_info(root_id, &info);
        state.tree.update(root_id, &self.db);
    }
}

impl<G: Game> Expander<G> for ParallelDfpn<G> {
    fn expand_couple(&mut self, couple: &Couple<G>, max_iterations: u64) -> ExpansionInfo<G> {
        self.max_iterations = max_iterations;
        self.iterations.store(0, Ordering::Relaxed);
        self.terminate.store(false, Ordering::SeqCst);
        if self.cfg.branching_depth > 0 {
            self.init_sync_tree(couple);
        }
        self.sync.get_mut().finished = false;
        for mailbox in &self.mailboxes {
            mailbox.clear();
        }

        let this: &Self = self;
        crossbeam::scope(|scope| {
            for worker in 0..this.cfg.workers {
                let root = couple.clone();
                scope
                    .builder()
                    .name(format!("worker-{}", worker))
                    .spawn(move |_| this.run(&root, worker))
                    .expect("spawn worker");
            }
        })
        .expect("worker panicked");

        if self.cfg.branching_depth > 0 {
            let state = self.sync.get_mut();
            let root = state.tree.root().expect("sync root");
            state.tree.expansion_info(root)
        } else {
            let mut root = PnsNode::new(couple);
            root.expand(
                &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
                &self.db,
            );
            root.update(
                &mut |c| Self::make_child(&self.tt, &*self.estimator, c),
                &self.db,
            );
            root.expansion_info()
        }
    }

    fn clear_tree(&mut self) {
        self.tt.clear();
    }

    fn tree_size(&self) -> usize {
        self.tt.len()
    }

    fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
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
    use crate::nimber::Nimber;

    fn config(workers: usize, branching_depth: usize) -> Config {
        Config {
            workers,
            branching_depth,
            tt_capacity: 1 << 12,
            seed: 7,
            ..Config::default()
        }
    }

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    fn solver(workers: usize, branching_depth: usize) -> ParallelDfpn<Rows> {
        ParallelDfpn::new(
            Arc::new(NimberDatabase::new(false)),
            config(workers, branching_depth),
        )
    }

    #[test]
    fn test_mailbox_dedups_and_drains() {
        let mailbox = Mailbox::<Rows>::new();
        let compact = couple("3 0").to_compact();
        mailbox.notify(compact.clone());
        mailbox.notify(compact.clone());
        let drained = mailbox.drain();
        assert_eq!(drained.len(), 1);
        assert!(mailbox.drain().is_empty());
    }

    #[test]
    fn test_stored_info_marks() {
        let mut info = StoredParallelNodeInfo::new(ProofNumbers::unity(), 0);
        info.mark(3);
        info.mark(3);
        info.mark(5);
        assert_eq!(info.workers(), 2);
        info.unmark(3);
        assert_eq!(info.workers.as_slice(), &[5]);
    }

    #[test]
    fn test_single_worker_solves() {
        let mut pdfpn = solver(1, 2);
        assert_eq!(pdfpn.solve_couple(&couple("4+1 0")), Outcome::Loss);
        assert_eq!(pdfpn.solve_couple(&couple("4+3 0")), Outcome::Win);
    }

    #[test]
    fn test_four_workers_solve() {
        let mut pdfpn = solver(4, 2);
        assert_eq!(pdfpn.solve_couple(&couple("5+4 0")), Outcome::Win);
        assert_eq!(pdfpn.solve_couple(&couple("4+1 0")), Outcome::Loss);
    }

    #[test]
    fn test_flat_mode_solves() {
        let mut pdfpn = solver(2, 0);
        assert_eq!(pdfpn.solve_couple(&couple("4+3 0")), Outcome::Win);
        let mut pdfpn = solver(2, 0);
        assert_eq!(pdfpn.solve_couple(&couple("4+1 0")), Outcome::Loss);
    }

    #[test]
    fn test_losses_reach_shared_nimber_db() {
        let db = Arc::new(NimberDatabase::<Rows>::new(false));
        let mut pdfpn = ParallelDfpn::new(db.clone(), config(2, 2));
        assert_eq!(pdfpn.solve_couple(&couple("3 3")), Outcome::Loss);
        assert_eq!(db.get(&"3".parse().unwrap()), Some(Nimber::new(3)));
    }

    #[test]
    fn test_matches_dfs() {
        use crate::prove::dfs::DfsSolver;
        for s in ["5 0", "4 1", "3+2 0", "4+2+1 0", "2*2 0"] {
            let mut dfs = DfsSolver::new(Arc::new(NimberDatabase::new(false)));
            let mut pdfpn = solver(3, 2);
            assert_eq!(
                dfs.solve_couple(&couple(s)),
                pdfpn.solve_couple(&couple(s)),
                "outcome mismatch on {}",
                s
            );
        }
    }
}
