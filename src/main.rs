use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use vekta_filter::config::{State, DEFAULT_SEED, DEFAULT_SEGMENT_DELIMITER};
use vekta_filter::{
    filter_lists, logging, FilterError, FilterJob, FilterPlan, LinePolicy, SamplingStrategy,
    SegmentDedup,
};

#[derive(Parser)]
#[command(name = "filter_list")]
#[command(version = "0.1")]
#[command(
    about = "Keep only the manifest lines whose key has a vector in the vector store",
    long_about = None
)]
struct Cli {
    /// Vector store (e.g. xvector.scp); first field of each line is the key
    #[arg(long)]
    vector_file: Option<PathBuf>,

    /// Label manifest to filter; pairs with the --output at the same position
    #[arg(long = "manifest")]
    manifests: Vec<PathBuf>,

    #[arg(long = "output")]
    outputs: Vec<PathBuf>,

    /// JSON plan listing the vector file and manifest/output pairs
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Fail on manifest lines without a label instead of writing an empty one
    #[arg(long)]
    strict: bool,

    #[arg(long)]
    create_dirs: bool,

    /// Filter manifests one at a time
    #[arg(long)]
    sequential: bool,

    /// Randomly keep at most this many matching lines per manifest
    #[arg(long)]
    sample_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Keep at most one sampled line per segment name
    #[arg(long)]
    dedup_segments: bool,

    #[arg(long)]
    segment_delimiter: Option<char>,

    /// Print a JSON summary to stdout
    #[arg(long)]
    json: bool,

    #[arg(long)]
    print_config: bool,
}

fn apply_args(mut state: State, args: &Cli) -> Result<State> {
    if let Some(vector_file) = &args.vector_file {
        state.vector_file = Some(vector_file.clone());
    }
    if args.strict {
        state.line_policy = LinePolicy::Strict;
    }
    if args.create_dirs {
        state.create_dirs = true;
    }
    if args.sequential {
        state.parallel = false;
    }

    let (sample_size, seed, dedup) = match &state.sampling {
        SamplingStrategy::All => (None, DEFAULT_SEED, None),
        SamplingStrategy::Random {
            sample_size,
            seed,
            dedup,
        } => (Some(*sample_size), *seed, *dedup),
    };
    if let Some(sample_size) = args.sample_size.or(sample_size) {
        let dedup = if args.dedup_segments || args.segment_delimiter.is_some() {
            Some(SegmentDedup {
                delimiter: args
                    .segment_delimiter
                    .or(dedup.map(|d| d.delimiter))
                    .unwrap_or(DEFAULT_SEGMENT_DELIMITER),
            })
        } else {
            dedup
        };
        state.sampling = SamplingStrategy::Random {
            sample_size,
            seed: args.seed.unwrap_or(seed),
            dedup,
        };
    } else if args.seed.is_some() || args.dedup_segments || args.segment_delimiter.is_some() {
        anyhow::bail!(
            "--seed, --dedup-segments and --segment-delimiter need a sample size \
             (--sample-size or sample_size in config)"
        );
    }

    Ok(state)
}

fn collect_jobs(args: &Cli, plan: Option<&FilterPlan>) -> Result<Vec<FilterJob>> {
    if args.manifests.len() != args.outputs.len() {
        return Err(FilterError::JobMismatch {
            manifests: args.manifests.len(),
            outputs: args.outputs.len(),
        }
        .into());
    }

    let mut jobs: Vec<FilterJob> = plan.map(|p| p.jobs.clone()).unwrap_or_default();
    jobs.extend(
        args.manifests
            .iter()
            .zip(&args.outputs)
            .map(|(manifest, output)| FilterJob::new(manifest, output)),
    );
    Ok(jobs)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let state = apply_args(State::new()?, &args)?;
    logging::init(&state.log_level)?;

    if args.print_config {
        state.print_config();
        return Ok(());
    }

    let plan = args
        .plan
        .as_deref()
        .map(FilterPlan::load)
        .transpose()
        .context("Failed to load plan")?;

    let vector_file = args
        .vector_file
        .clone()
        .or_else(|| plan.as_ref().and_then(|p| p.vector_file.clone()))
        .or_else(|| state.vector_file.clone())
        .context("--vector-file not set in arguments, plan, or config")?;

    let jobs = collect_jobs(&args, plan.as_ref())?;
    if jobs.is_empty() {
        anyhow::bail!("No manifests to filter: pass --manifest/--output pairs or --plan");
    }

    let stats = filter_lists(&vector_file, &jobs, &state)
        .with_context(|| format!("Failed to filter lists against '{}'", vector_file.display()))?;

    if args.json {
        let output = serde_json::json!({
            "vector_file": vector_file,
            "jobs": stats,
            "total_emitted": stats.iter().map(|s| s.emitted).sum::<usize>(),
            "total_dropped": stats.iter().map(|s| s.dropped).sum::<usize>(),
        });
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}
