//! Live-tuning demo harness: feeds matmul traffic through the
//! selection engine and prints the learned state.

use anyhow::Result;
use autopick_engine::{
    call_site, stage_fn, Alternative, ProblemSize, Runtime, Tuned, TunedBuilder,
};
use autopick_kernels::{blocked_matmul, parallel_matmul, reference_matmul, MatmulTask};
use clap::{Parser, Subcommand};
use ndarray::Array2;
use std::path::PathBuf;
use tracing::info;

type MatmulArgs = (Array2<f32>, Array2<f32>);

#[derive(Parser, Debug)]
#[command(name = "autopick", about = "Selection-engine demo harness")]
struct Cli {
    /// Always dispatch to the first alternative (deterministic mode).
    #[arg(long, default_value_t = false)]
    force_first: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tune a single-stage matmul registry over live calls.
    Matmul {
        /// Square problem sizes to cycle through.
        #[arg(long, value_delimiter = ',', default_value = "48,64,96")]
        sizes: Vec<usize>,
        #[arg(long, default_value_t = 6)]
        rounds: usize,
        #[arg(long, default_value_t = 3.0)]
        pruning_speedup: f64,
        #[arg(long, default_value_t = 2)]
        prune_after_round: usize,
        /// Calls to issue per problem size.
        #[arg(long, default_value_t = 24)]
        calls: usize,
        /// Dump the learned state as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Tune a two-stage matmul pipeline registry.
    Pipeline {
        #[arg(long, value_delimiter = ',', default_value = "48,64")]
        sizes: Vec<usize>,
        #[arg(long, default_value_t = 4)]
        rounds: usize,
        #[arg(long, default_value_t = 12)]
        calls: usize,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::new();
    if cli.force_first {
        runtime.force_first_alternative();
    }

    match cli.command {
        Command::Matmul {
            sizes,
            rounds,
            pruning_speedup,
            prune_after_round,
            calls,
            output,
        } => {
            let gemm = TunedBuilder::<MatmulArgs, Array2<f32>>::new("gemm")
                .rounds(rounds)
                .pruning_speedup(pruning_speedup)
                .prune_after_round(prune_after_round)
                .classifier(|(lhs, rhs): &MatmulArgs| {
                    ProblemSize::dims(&[lhs.nrows(), rhs.ncols(), lhs.ncols()])
                })
                .single("reference", |(lhs, rhs): &MatmulArgs| {
                    reference_matmul(lhs.view(), rhs.view())
                })
                .single("blocked", |(lhs, rhs): &MatmulArgs| {
                    blocked_matmul(lhs.view(), rhs.view(), 32)
                })
                .single("parallel", |(lhs, rhs): &MatmulArgs| {
                    parallel_matmul(lhs.view(), rhs.view())
                })
                .build(&runtime)?;

            for &n in &sizes {
                let args = square_inputs(n);
                for _ in 0..calls {
                    let _ = gemm.invoke(call_site!(), &args)?;
                }
                report_selection(&gemm, &args);
            }

            print_reports(&runtime, &gemm, output)?;
        }
        Command::Pipeline {
            sizes,
            rounds,
            calls,
            output,
        } => {
            let pipeline = TunedBuilder::<MatmulTask, ()>::new("gemm-pipeline")
                .stages(2)
                .rounds(rounds)
                .pruning_speedup(3.0)
                .prune_after_round(2)
                .classifier(|task: &MatmulTask| ProblemSize::dims(&task.dims()))
                .alternative(Alternative::pipeline(
                    "transposed",
                    vec![
                        stage_fn(|task: &MatmulTask| task.prepare_transposed()),
                        stage_fn(|task: &MatmulTask| task.multiply_transposed()),
                    ],
                ))
                .alternative(Alternative::pipeline(
                    "direct",
                    vec![
                        stage_fn(|task: &MatmulTask| task.prepare_identity()),
                        stage_fn(|task: &MatmulTask| task.multiply_direct()),
                    ],
                ))
                .build(&runtime)?;

            for &n in &sizes {
                let (lhs, rhs) = square_inputs(n);
                for _ in 0..calls {
                    let task = MatmulTask::new(lhs.clone(), rhs.clone())?;
                    pipeline.invoke_stage(call_site!(), 0, &task)?;
                    pipeline.invoke_stage(call_site!(), 1, &task)?;
                    let _ = task.take_output();
                }
            }

            println!("{}", runtime.tree_report());
            println!("{}", pipeline.table());
            if let Some(path) = output {
                runtime.snapshot().save(&path)?;
                info!(path = %path.display(), "learned state written");
            }
        }
    }

    Ok(())
}

fn square_inputs(n: usize) -> MatmulArgs {
    let lhs = Array2::from_shape_fn((n, n), |(i, j)| (i + j) as f32 * 0.01);
    let rhs = Array2::from_shape_fn((n, n), |(i, j)| (i * j + 1) as f32 * 0.002);
    (lhs, rhs)
}

fn report_selection(gemm: &Tuned<MatmulArgs, Array2<f32>>, args: &MatmulArgs) {
    let size = gemm.problem_size(args);
    match gemm.selected_name(&size) {
        Some(winner) => info!(size = %size, winner = %winner, "selection converged"),
        None => info!(size = %size, "still exploring"),
    }
}

fn print_reports(
    runtime: &Runtime,
    gemm: &Tuned<MatmulArgs, Array2<f32>>,
    output: Option<PathBuf>,
) -> Result<()> {
    println!("{}", runtime.tree_report());
    println!("{}", runtime.table_report());
    println!("{}", gemm.table());
    if let Some(path) = output {
        runtime.snapshot().save(&path)?;
        info!(path = %path.display(), "learned state written");
    }
    Ok(())
}
