use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;

use cfg_probe::coverage::{ApproxStyle, Level, OptimizationData, OptimizeOptions, ProbeView};
use cfg_probe::input::RawProcedure;

/// Select minimum-cost coverage probe sets for weighted control-flow graphs.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// YAML file with one weighted CFG per procedure
    input: PathBuf,

    /// Optimization level
    #[arg(long, value_enum, default_value = "2")]
    opt: LevelArg,

    /// Approximation style used at the locally-minimal level
    #[arg(long, value_enum, default_value = "local-prepass")]
    approx_style: StyleArg,

    /// Optimize for incomplete executions (any block may be the last)
    #[arg(long)]
    incomplete_exe: bool,

    /// Verify that each result is a coverage set of the desired blocks
    #[arg(long)]
    verify_coverage_set: bool,

    /// Verify that exact results admit no locally-optimal improvement
    #[arg(long)]
    verify_optimality: bool,

    /// Log statistics on coverage set cost and size
    #[arg(long)]
    log_stats: bool,

    /// Worker threads for per-procedure optimization (0 = one per core)
    #[arg(long, short, default_value_t = 0)]
    jobs: usize,

    /// Write a .dot rendering of each procedure with its probes highlighted
    #[arg(long)]
    dot_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LevelArg {
    /// no optimization
    #[value(name = "0")]
    None,
    /// dominator approximation
    #[value(name = "1")]
    Dominators,
    /// (default) locally-minimal approximation
    #[value(name = "2")]
    Local,
    /// fully optimal
    #[value(name = "3")]
    Full,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    /// simple approximation
    Simple,
    /// basic locally-optimal
    Local,
    /// (default) simple as prepass, then local
    LocalPrepass,
}

impl From<LevelArg> for Level {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::None => Level::O0,
            LevelArg::Dominators => Level::O1,
            LevelArg::Local => Level::O2,
            LevelArg::Full => Level::O3,
        }
    }
}

impl From<StyleArg> for ApproxStyle {
    fn from(arg: StyleArg) -> Self {
        match arg {
            StyleArg::Simple => ApproxStyle::Dominators,
            StyleArg::Local => ApproxStyle::Local,
            StyleArg::LocalPrepass => ApproxStyle::LocalWithPrepass,
        }
    }
}

struct Report {
    name: String,
    probes: BTreeSet<u64>,
    cost: f64,
}

fn optimize_one(
    procedure: &RawProcedure,
    options: &OptimizeOptions,
    dot_dir: Option<&Path>,
) -> Result<Report> {
    let graph = procedure
        .to_graph()
        .with_context(|| format!("procedure '{}'", procedure.name))?;
    let data = OptimizationData::new(graph);

    let probes = data
        .optimized_probes(None, None, options)
        .with_context(|| format!("procedure '{}'", procedure.name))?;
    let cost = data.graph().cost_of_set(&probes);

    if let Some(dir) = dot_dir {
        let path = dir.join(format!("{}.dot", procedure.name));
        let mut file =
            File::create(&path).with_context(|| format!("cannot create {}", path.display()))?;
        ProbeView::new(data.graph(), &probes)
            .render_to(&mut file)
            .with_context(|| format!("cannot render {}", path.display()))?;
    }

    Ok(Report {
        name: procedure.name.clone(),
        probes,
        cost,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file =
        File::open(&cli.input).with_context(|| format!("cannot open {}", cli.input.display()))?;
    let procedures: Vec<RawProcedure> =
        serde_yaml::from_reader(file).context("cannot parse procedure file")?;

    if let Some(dir) = &cli.dot_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let options = OptimizeOptions {
        level: cli.opt.into(),
        approx_style: cli.approx_style.into(),
        incomplete_exe: cli.incomplete_exe,
        verify_coverage_set: cli.verify_coverage_set,
        verify_optimality: cli.verify_optimality,
        log_stats: cli.log_stats,
        no_exact_heuristics: false,
    };

    // procedures are independent; a fixed-size pool of workers, each owning
    // its own graph and solver state, carries the whole batch
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs)
        .build()
        .context("cannot build worker pool")?;
    let reports: Vec<Result<Report>> = pool.install(|| {
        procedures
            .par_iter()
            .map(|procedure| optimize_one(procedure, &options, cli.dot_dir.as_deref()))
            .collect()
    });

    for report in reports {
        let report = report?;
        let probes: Vec<u64> = report.probes.iter().copied().collect();
        println!(
            "{}: {} probes, cost {:.4}, blocks {:?}",
            report.name,
            probes.len(),
            report.cost,
            probes
        );
    }

    Ok(())
}
