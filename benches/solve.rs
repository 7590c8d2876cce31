use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use nimlands::couple::Couple;
use nimlands::game::rows::Rows;
use nimlands::nimber_db::NimberDatabase;
use nimlands::prove::dfs::DfsSolver;
use nimlands::prove::{dfpn, Expander};

fn bench_dfs(c: &mut Criterion) {
    c.bench_function("dfs 6+5", |b| {
        let couple = Couple::<Rows>::parse("6+5 0").unwrap();
        b.iter(|| {
            let mut dfs = DfsSolver::new(Arc::new(NimberDatabase::new(false)));
            dfs.solve_couple(&couple)
        })
    });
}

fn bench_dfpn(c: &mut Criterion) {
    c.bench_function("dfpn 6+5", |b| {
        let couple = Couple::<Rows>::parse("6+5 0").unwrap();
        b.iter(|| {
            let mut solver = dfpn::DfpnSolver::new(
                Arc::new(NimberDatabase::new(false)),
                dfpn::Config {
                    tt_capacity: 1 << 16,
                    ..Default::default()
                },
            );
            solver.solve_couple(&couple)
        })
    });
}

criterion_group!(benches, bench_dfs, bench_dfpn);
criterion_main!(benches);
