//! The worker side of distributed search: read `JobAssignment` JSON
//! lines from stdin, expand each couple, answer with `CompletedJob`
//! lines on stdout.

use std::io::{self, BufRead, Write};

use nimlands::game::rows::Rows;
use nimlands::protocol::{CompletedJob, JobAssignment};
use nimlands::prove::Expander;

use crate::SolverOpts;

pub fn run(opts: &SolverOpts) -> Result<(), String> {
    let db = opts.database().map_err(|e| e.to_string())?;
    let mut expander = opts.expander(db)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line.map_err(|e| e.to_string())?;
        if line.is_empty() {
            continue;
        }
        let assignment: JobAssignment = match serde_json::from_str(&line) {
            Ok(assignment) => assignment,
            Err(err) => {
                eprintln!("worker: bad assignment {:?}: {}", line, err);
                continue;
            }
        };
        let couple = match assignment.couple::<Rows>() {
            Ok(couple) => couple,
            Err(err) => {
                eprintln!("worker: bad couple {:?}: {}", assignment.couple, err);
                continue;
            }
        };

        let info = expander.expand_couple(&couple, opts.max_iterations);
        let completed = CompletedJob::from_info(&info);
        let json = serde_json::to_string(&completed).map_err(|e| e.to_string())?;
        writeln!(out, "{}", json).map_err(|e| e.to_string())?;
        out.flush().map_err(|e| e.to_string())?;
    }
    Ok(())
}
