//! A pool of expanders sharing one nimber database. Jobs are handed to
//! the worker that last touched the same couple when possible, so each
//! worker's transposition table stays warm across related jobs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::couple::{Couple, CoupleCompact};
use crate::error::Error;
use crate::game::Game;
use crate::heuristics::{default_estimator, SharedEstimator};
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;
use crate::pns_db::DEFAULT_TABLE_CAPACITY;
use crate::prove::node::ExpansionInfo;
use crate::prove::{dfpn, pdfpn, pns, Expander};

/// A couple to expand together with its iteration budget.
pub type Job<G> = (Couple<G>, u64);

#[derive(Clone, Debug)]
pub struct Config {
    pub group_size: usize,
    /// Workers inside each expander; zero selects a sequential expander.
    pub workers: usize,
    pub branching_depth: usize,
    pub epsilon: f32,
    pub tt_capacity: usize,
    /// Cache invalidation on context switch: 0 keeps everything, 1 clears
    /// the tree, 2 clears tree and nimbers.
    pub state_level: u8,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group_size: 1,
            workers: 0,
            branching_depth: 2,
            epsilon: 1.0,
            tt_capacity: DEFAULT_TABLE_CAPACITY,
            state_level: 0,
            seed: 0,
        }
    }
}

struct GroupState<G: Game> {
    unassigned: Vec<Job<G>>,
    assigned: Vec<Option<Job<G>>>,
    completed: Vec<ExpansionInfo<G>>,
    last_jobs: Vec<Option<CoupleCompact<G>>>,
    jobs_num: Vec<u64>,
    mini_jobs_num: Vec<u64>,
    tree_sizes: Vec<usize>,
    iterations: Vec<u64>,
    working_ms: Vec<u64>,
    waiting_ms: Vec<u64>,
    waiting_since: Vec<Instant>,
}

impl<G: Game> GroupState<G> {
    fn new(group_size: usize) -> Self {
        GroupState {
            unassigned: Vec::new(),
            assigned: vec![None; group_size],
            completed: Vec::new(),
            last_jobs: vec![None; group_size],
            jobs_num: vec![0; group_size],
            mini_jobs_num: vec![0; group_size],
            tree_sizes: vec![0; group_size],
            iterations: vec![0; group_size],
            working_ms: vec![0; group_size],
            waiting_ms: vec![0; group_size],
            waiting_since: vec![Instant::now(); group_size],
        }
    }
}

struct GroupShared<G: Game> {
    state: Mutex<GroupState<G>>,
    cv: Condvar,
    terminate: AtomicBool,
    db: Arc<NimberDatabase<G>>,
    estimator: SharedEstimator<G>,
    cfg: Config,
}

pub struct ParallelGroup<G: Game> {
    shared: Arc<GroupShared<G>>,
    threads: Vec<JoinHandle<()>>,
    standalone: Option<Box<dyn Expander<G> + Send>>,
}

fn build_expander<G: Game>(
    cfg: &Config,
    db: Arc<NimberDatabase<G>>,
    estimator: SharedEstimator<G>,
    seed: u64,
) -> Box<dyn Expander<G> + Send> {
    if cfg.workers >= 1 {
        Box::new(pdfpn::ParallelDfpn::with_estimator(
            db,
            pdfpn::Config {
                workers: cfg.workers,
                branching_depth: cfg.branching_depth,
                epsilon: cfg.epsilon,
                tt_capacity: cfg.tt_capacity,
                seed,
                debug: 0,
            },
            estimator,
        ))
    } else if cfg.state_level == 0 {
        Box::new(dfpn::DfpnSolver::with_estimator(
            db,
            dfpn::Config {
                tt_capacity: cfg.tt_capacity,
                epsilon: cfg.epsilon,
                seed,
                debug: 0,
            },
            estimator,
        ))
    } else {
        Box::new(pns::BasicPnsSolver::with_estimator(
            db,
            pns::Config { debug: 0, seed },
            estimator,
        ))
    }
}

impl<G: Game> ParallelGroup<G> {
    pub fn new(cfg: Config) -> Self {
        Self::with_database(cfg, NimberDatabase::new(true))
    }

    pub fn from_file(cfg: Config, path: &Path) -> Result<Self, Error> {
        Ok(Self::with_database(cfg, NimberDatabase::from_file(path, true)?))
    }

    pub fn with_database(cfg: Config, db: NimberDatabase<G>) -> Self {
        Self::with_estimator(cfg, db, default_estimator())
    }

    pub fn with_estimator(
        cfg: Config,
        db: NimberDatabase<G>,
        estimator: SharedEstimator<G>,
    ) -> Self {
        assert!(cfg.group_size >= 1, "empty group");
        db.set_track_new(true);
        let db = Arc::new(db);
        let shared = Arc::new(GroupShared {
            state: Mutex::new(GroupState::new(cfg.group_size)),
            cv: Condvar::new(),
            terminate: AtomicBool::new(false),
            db: db.clone(),
            estimator,
            cfg,
        });

        let mut group = ParallelGroup {
            shared: shared.clone(),
            threads: Vec::new(),
            standalone: None,
        };

        if shared.cfg.group_size > 1 {
            for worker in 0..shared.cfg.group_size {
                let shared = shared.clone();
                group.threads.push(std::thread::spawn(move || {
                    Self::run(shared, worker);
                }));
            }
        } else {
            group.standalone = Some(build_expander(
                &shared.cfg,
                db,
                shared.estimator.clone(),
                shared.cfg.seed,
            ));
        }
        group
    }

    /// Assigns jobs to the expanders and blocks until at least one
    /// completion is available; returns the completed batch.
    pub fn expand(&mut self, jobs: Vec<Job<G>>) -> Vec<ExpansionInfo<G>> {
        if self.standalone.is_some() {
            return self.standalone_expand(jobs);
        }

        let had_jobs = !jobs.is_empty();
        let mut state = self.shared.state.lock();
        for job in jobs {
            let compact = job.0.to_compact();
            let mut pending = Some(job);
            for i in 0..state.assigned.len() {
                if state.assigned[i].is_none() && state.last_jobs[i].as_ref() == Some(&compact) {
                    state.assigned[i] = pending.take();
                    break;
                }
            }
            if let Some(job) = pending {
                state.unassigned.push(job);
            }
        }

        if had_jobs {
            self.shared.cv.notify_all();
        }
        while state.completed.is_empty() {
            self.shared.cv.wait(&mut state);
        }
        std::mem::take(&mut state.completed)
    }

    fn standalone_expand(&mut self, jobs: Vec<Job<G>>) -> Vec<ExpansionInfo<G>> {
        let expander = self.standalone.as_mut().expect("standalone expander");
        let mut completed = Vec::with_capacity(jobs.len());
        for (couple, max_iterations) in jobs {
            let mut state = self.shared.state.lock();
            if state.jobs_num[0] > 0 {
                state.waiting_ms[0] += state.waiting_since[0].elapsed().as_millis() as u64;
            }
            let compact = couple.to_compact();
            if state.jobs_num[0] == 0 || state.last_jobs[0].as_ref() != Some(&compact) {
                state.last_jobs[0] = Some(compact);
                state.jobs_num[0] += 1;
                if self.shared.cfg.state_level > 1 {
                    expander.clear_nimbers();
                }
                if self.shared.cfg.state_level > 0 {
                    expander.clear_tree();
                }
            }
            drop(state);

            let start = Instant::now();
            let result = expander.expand_couple(&couple, max_iterations);
            let elapsed = start.elapsed();

            let mut state = self.shared.state.lock();
            completed.push(result);
            state.tree_sizes[0] = expander.tree_size();
            state.iterations[0] += expander.iterations();
            state.mini_jobs_num[0] += 1;
            state.working_ms[0] += elapsed.as_millis() as u64;
            state.waiting_since[0] = Instant::now();
        }
        completed
    }

    fn run(shared: Arc<GroupShared<G>>, worker: usize) {
        let mut expander = build_expander(
            &shared.cfg,
            shared.db.clone(),
            shared.estimator.clone(),
            shared.cfg.seed.wrapping_add(worker as u64),
        );
        loop {
            let mut state = shared.state.lock();
            while state.assigned[worker].is_none()
                && state.unassigned.is_empty()
                && !shared.terminate.load(Ordering::Relaxed)
            {
                shared.cv.wait(&mut state);
            }
            if shared.terminate.load(Ordering::Relaxed) {
                return;
            }

            if state.jobs_num[worker] > 0 {
                state.waiting_ms[worker] += state.waiting_since[worker].elapsed().as_millis() as u64;
            }

            let (couple, max_iterations) = match state.assigned[worker].take() {
                Some(job) => job,
                None => state.unassigned.pop().expect("woken without a job"),
            };
            let compact = couple.to_compact();
            if state.jobs_num[worker] == 0 || state.last_jobs[worker].as_ref() != Some(&compact) {
                state.last_jobs[worker] = Some(compact);
                state.jobs_num[worker] += 1;
                if shared.cfg.state_level > 1 {
                    expander.clear_nimbers();
                }
                if shared.cfg.state_level > 0 {
                    expander.clear_tree();
                }
            }
            drop(state);

            let start = Instant::now();
            let result = expander.expand_couple(&couple, max_iterations);
            let elapsed = start.elapsed();

            let mut state = shared.state.lock();
            state.completed.push(result);
            state.tree_sizes[worker] = expander.tree_size();
            state.iterations[worker] += expander.iterations();
            state.mini_jobs_num[worker] += 1;
            state.working_ms[worker] += elapsed.as_millis() as u64;
            state.waiting_since[worker] = Instant::now();
            shared.cv.notify_all();
        }
    }

    pub fn nimber_db(&self) -> &Arc<NimberDatabase<G>> {
        &self.shared.db
    }

    pub fn nimbers_len(&self) -> usize {
        self.shared.db.len()
    }

    pub fn clear_nimbers(&self) {
        self.shared.db.clear();
    }

    pub fn store_database(&self, path: &Path) -> Result<(), Error> {
        self.shared.db.store(path, false)
    }

    pub fn load_nimbers(&self, path: &Path) -> Result<usize, Error> {
        self.shared.db.load(path)
    }

    pub fn add_nimbers(&self, nimbers: HashMap<G::Compact, Nimber>) -> usize {
        self.shared.db.add_nimbers(nimbers)
    }

    pub fn tracked_nimbers(&self, clear: bool) -> HashMap<G::Compact, Nimber> {
        self.shared.db.tracked_nimbers(clear)
    }

    pub fn tree_sizes(&self) -> Vec<usize> {
        self.shared.state.lock().tree_sizes.clone()
    }

    pub fn iterations(&self) -> Vec<u64> {
        self.shared.state.lock().iterations.clone()
    }

    pub fn jobs_num(&self) -> Vec<u64> {
        self.shared.state.lock().jobs_num.clone()
    }

    pub fn mini_jobs_num(&self) -> Vec<u64> {
        self.shared.state.lock().mini_jobs_num.clone()
    }

    pub fn working_times(&self) -> Vec<u64> {
        self.shared.state.lock().working_ms.clone()
    }

    pub fn waiting_times(&self) -> Vec<u64> {
        self.shared.state.lock().waiting_ms.clone()
    }
}

impl<G: Game> Drop for ParallelGroup<G> {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.cv.notify_all();
        for thread in self.threads.drain(..) {
            thread.join().expect("group worker panicked");
        }
    }
}
