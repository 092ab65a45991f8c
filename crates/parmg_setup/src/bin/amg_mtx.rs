use clap::Parser;
use parmg_comm::{Comm, SerialComm, ThreadComm};
use parmg_setup::sparse::mtx::load_triples_file;
use parmg_setup::{AmgConfig, LevelSummary, setup};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.3}s")
    } else if secs >= 1e-3 {
        format!("{:.3}ms", secs * 1e3)
    } else {
        format!("{:.3}us", secs * 1e6)
    }
}

#[derive(Parser, Debug)]
#[command(
    about = "Loads a MatrixMarket coordinate matrix (.mtx), runs the AMG setup on it, and prints the hierarchy.",
    after_help = "Notes:\n  - The matrix is fed to the setup in unassembled triple form; duplicate coordinates are assembled by addition.\n  - With --ranks N the setup also runs on N simulated ranks (round-robin triple distribution) and the per-level shapes are checked against the serial run.",
    version
)]
struct Args {
    /// Also run on this many simulated ranks and compare shapes.
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Path to MatrixMarket coordinate matrix (.mtx)
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

fn print_summaries(summaries: &[LevelSummary]) {
    println!("levels: {}", summaries.len());
    for (l, s) in summaries.iter().enumerate() {
        println!(
            "  level {l}: fine_rows {} nnz(Aff) {} W {}x{} (nnz {}) nnz(AfP) {} cheb_m {}",
            s.fine_rows, s.aff_nnz, s.w_dim.0, s.w_dim.1, s.w_nnz, s.afp_nnz, s.cheb_m
        );
    }
}

/// Sum the per-rank local shape numbers into global ones.
fn aggregate(per_rank: Vec<Vec<LevelSummary>>) -> Vec<LevelSummary> {
    let mut totals: Vec<LevelSummary> = Vec::new();
    for summaries in per_rank {
        for (l, s) in summaries.into_iter().enumerate() {
            match totals.get_mut(l) {
                Some(t) => {
                    t.fine_rows += s.fine_rows;
                    t.aff_nnz += s.aff_nnz;
                    t.w_dim = (t.w_dim.0 + s.w_dim.0, t.w_dim.1 + s.w_dim.1);
                    t.w_nnz += s.w_nnz;
                    t.afp_nnz += s.afp_nnz;
                }
                None => totals.push(s),
            }
        }
    }
    totals
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let total_start = Instant::now();
    let mut stages: Vec<(&str, Duration)> = Vec::new();

    let t = Instant::now();
    let m = match load_triples_file(&args.path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to load MatrixMarket file: {e}");
            std::process::exit(1);
        }
    };
    stages.push(("load_matrix", t.elapsed()));

    println!("matrix: {}", args.path.display());
    println!("dim: {} x {}", m.nrows, m.ncols);
    println!("triples: {}", m.entries.len());
    if m.nrows != m.ncols {
        eprintln!("AMG setup needs a square operator; skipping.");
        std::process::exit(2);
    }

    let ids: Vec<u64> = (1..=m.nrows as u64).collect();
    let rows: Vec<usize> = m.entries.iter().map(|&(i, _, _)| i).collect();
    let cols: Vec<usize> = m.entries.iter().map(|&(_, j, _)| j).collect();
    let vals: Vec<f64> = m.entries.iter().map(|&(_, _, v)| v).collect();

    let config = AmgConfig::default();
    let t = Instant::now();
    let hierarchy = match setup(&SerialComm, &ids, &rows, &cols, &vals, &config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("amg setup failed: {e}");
            std::process::exit(1);
        }
    };
    stages.push(("setup_serial", t.elapsed()));

    let serial_summaries = hierarchy.level_summaries();
    print_summaries(&serial_summaries);
    println!("tni: {:.6e}", hierarchy.tni);
    println!("dff entries: {}", hierarchy.dff.len());
    println!(
        "cheb_rho: {:?}",
        hierarchy.levels.iter().map(|l| l.cheb_rho).collect::<Vec<_>>()
    );

    if args.ranks > 1 {
        let t = Instant::now();
        let per_rank = ThreadComm::run(args.ranks, |comm| {
            // Round-robin triple distribution; every rank sees the full
            // dof id table.
            let rank = comm.rank();
            let nranks = comm.nranks();
            let pick = |k: &usize| *k % nranks == rank;
            let rows: Vec<usize> =
                rows.iter().enumerate().filter(|(k, _)| pick(k)).map(|(_, &r)| r).collect();
            let cols: Vec<usize> =
                cols.iter().enumerate().filter(|(k, _)| pick(k)).map(|(_, &c)| c).collect();
            let vals: Vec<f64> =
                vals.iter().enumerate().filter(|(k, _)| pick(k)).map(|(_, &v)| v).collect();
            setup(&comm, &ids, &rows, &cols, &vals, &config)
                .expect("distributed setup failed")
                .level_summaries()
        });
        stages.push(("setup_ranks", t.elapsed()));

        let aggregated = aggregate(per_rank);
        println!();
        println!("{} simulated ranks:", args.ranks);
        print_summaries(&aggregated);
        let same = aggregated.len() == serial_summaries.len()
            && aggregated.iter().zip(&serial_summaries).all(|(a, s)| {
                a.fine_rows == s.fine_rows && a.w_nnz == s.w_nnz && a.cheb_m == s.cheb_m
            });
        println!("matches serial hierarchy: {same}");
    }

    println!();
    println!("timing:");
    for (name, dur) in &stages {
        println!("  {name:<16} {:>10}", fmt_duration(*dur));
    }
    println!("  {:<16} {:>10}", "total", fmt_duration(total_start.elapsed()));
}
