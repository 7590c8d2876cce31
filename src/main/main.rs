mod worker;

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;

use structopt::StructOpt;

use nimlands::couple::Couple;
use nimlands::game::rows::Rows;
use nimlands::game::Outcome;
use nimlands::nimber::Nimber;
use nimlands::nimber_db::NimberDatabase;
use nimlands::prove::dfs::DfsSolver;
use nimlands::prove::{dfpn, pdfpn, pn2s, pns, Expander};

#[derive(Debug, StructOpt)]
pub struct SolverOpts {
    /// One of: dfs, pns, pn2s, dfpn, pdfpn
    #[structopt(long, default_value = "dfpn")]
    solver: String,
    #[structopt(long, default_value = "0")]
    max_iterations: u64,
    #[structopt(long, default_value = "4")]
    workers: usize,
    #[structopt(long, default_value = "2")]
    branching_depth: usize,
    #[structopt(long, default_value = "1.0")]
    epsilon: f32,
    #[structopt(long, default_value = "1048576")]
    tt_capacity: usize,
    #[structopt(long, default_value = "0")]
    seed: u64,
    #[structopt(long, default_value = "0")]
    debug: usize,
    /// Seed the nimber database from a file before solving.
    #[structopt(long)]
    load_db: Option<PathBuf>,
    /// Write the nimber database out after solving.
    #[structopt(long)]
    store_db: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
#[structopt(name = "nimlands", about = "proof-number search for decomposable impartial games")]
enum Opt {
    /// Determine the winner of a position given in compact form.
    Solve {
        position: String,
        #[structopt(long, default_value = "0")]
        nimber: u8,
        #[structopt(flatten)]
        opts: SolverOpts,
    },
    /// Process job assignments from stdin, one JSON object per line,
    /// writing completed jobs to stdout.
    Worker {
        #[structopt(flatten)]
        opts: SolverOpts,
    },
}

impl SolverOpts {
    fn database(&self) -> Result<Arc<NimberDatabase<Rows>>, nimlands::error::Error> {
        let db = match &self.load_db {
            Some(path) => NimberDatabase::from_file(path, false)?,
            None => NimberDatabase::new(false),
        };
        Ok(Arc::new(db))
    }

    fn expander(
        &self,
        db: Arc<NimberDatabase<Rows>>,
    ) -> Result<Box<dyn Expander<Rows>>, String> {
        match self.solver.as_str() {
            "pns" => Ok(Box::new(pns::BasicPnsSolver::new(
                db,
                pns::Config {
                    debug: self.debug,
                    seed: self.seed,
                },
            ))),
            "dfpn" => Ok(Box::new(dfpn::DfpnSolver::new(
                db,
                dfpn::Config {
                    tt_capacity: self.tt_capacity,
                    epsilon: self.epsilon,
                    seed: self.seed,
                    debug: self.debug,
                },
            ))),
            "pn2s" => Ok(Box::new(pn2s::Pn2sSolver::new(
                db,
                pn2s::Config {
                    tt_capacity: self.tt_capacity,
                    epsilon: self.epsilon,
                    seed: self.seed,
                    debug: self.debug,
                    ..Default::default()
                },
            ))),
            "pdfpn" => Ok(Box::new(pdfpn::ParallelDfpn::new(
                db,
                pdfpn::Config {
                    workers: self.workers.max(1),
                    branching_depth: self.branching_depth,
                    epsilon: self.epsilon,
                    tt_capacity: self.tt_capacity,
                    seed: self.seed,
                    debug: self.debug,
                },
            ))),
            other => Err(format!("unknown solver {:?}", other)),
        }
    }
}

fn solve(position: &str, nimber: u8, opts: &SolverOpts) -> Result<(), String> {
    let couple = {
        let compact: nimlands::game::rows::Compact =
            position.parse().map_err(|e: nimlands::error::Error| e.to_string())?;
        Couple::new(
            <Rows as nimlands::game::Game>::from_compact(&compact),
            Nimber::new(nimber),
        )
    };
    let db = opts.database().map_err(|e| e.to_string())?;

    let start = Instant::now();
    let (outcome, iterations) = if opts.solver == "dfs" {
        let mut dfs = DfsSolver::new(db.clone());
        (dfs.solve_couple(&couple), dfs.iterations())
    } else {
        let mut expander = opts.expander(db.clone())?;
        let info = expander.expand_couple(&couple, opts.max_iterations);
        (info.pns.outcome(), expander.iterations())
    };
    let elapsed = start.elapsed();

    println!(
        "{} {} -> {} (iterations={} nimbers={} t={}.{:03}s)",
        couple.to_compact(),
        opts.solver,
        outcome,
        iterations,
        db.len(),
        elapsed.as_secs(),
        elapsed.subsec_millis(),
    );
    if outcome == Outcome::Unknown {
        println!("budget exhausted before proof");
    }

    if let Some(path) = &opts.store_db {
        db.store(path, true).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn main() {
    let opt = Opt::from_args();
    let result = match &opt {
        Opt::Solve {
            position,
            nimber,
            opts,
        } => solve(position, *nimber, opts),
        Opt::Worker { opts } => worker::run(opts),
    };
    if let Err(err) = result {
        eprintln!("nimlands: {}", err);
        exit(1);
    }
}
