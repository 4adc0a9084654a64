use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vinecorrupt::batch;
use vinecorrupt::codec::{self, CodecError, CodecId};
use vinecorrupt::dispatch::{self, DispatchOptions};
use vinecorrupt::job::{save_atomic, CorruptionJob, JobReport};
use vinecorrupt::mutation::{ConfigError, MutationConfig, Operation};

#[derive(Parser)]
#[command(name = "vinecorrupt", version, about = "Structure-aware corrupter for GameCube/Wii assets")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Corrupt one file
    Corrupt {
        #[command(flatten)]
        job: JobArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one job per line of a batch file
    Batch {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the entries or sub-blocks of a file as JSON
    List {
        input: PathBuf,
    },
    /// Yaz0 encode / decode (decode also accepts Yay0)
    Yaz0 {
        #[command(subcommand)]
        action: Yaz0Action,
    },
}

#[derive(Subcommand)]
enum Yaz0Action {
    Encode { input: PathBuf, output: PathBuf },
    Decode { input: PathBuf, output: PathBuf },
}

/// Everything one corruption job needs; shared by `corrupt` and batch lines.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("op").required(true).multiple(false)))]
struct JobArgs {
    input: PathBuf,

    /// Visit every Nth byte
    #[arg(short, long, default_value = "1", value_parser = parse_offset)]
    step: usize,
    /// First offset (inclusive)
    #[arg(short = 'b', long, default_value = "0", value_parser = parse_offset)]
    start: usize,
    /// Last offset (exclusive); defaults to the end of each buffer
    #[arg(short, long, alias = "stop", value_parser = parse_offset)]
    end: Option<usize>,

    /// buf[i] = buf[i + N]
    #[arg(short = 'H', long, group = "op", value_parser = parse_int, allow_hyphen_values = true)]
    shift: Option<i64>,
    /// Swap buf[i] and buf[i + N]
    #[arg(short = 'w', long, group = "op", value_parser = parse_int, allow_hyphen_values = true)]
    swap: Option<i64>,
    /// buf[i] += N
    #[arg(short, long, group = "op", value_parser = parse_int, allow_hyphen_values = true)]
    add: Option<i64>,
    /// buf[i] = N
    #[arg(short = 't', long, group = "op", value_parser = parse_int)]
    set: Option<i64>,
    /// buf[i] = random byte
    #[arg(short, long, group = "op")]
    random: bool,
    #[arg(long, group = "op", value_parser = parse_int)]
    rotate_left: Option<i64>,
    #[arg(long, group = "op", value_parser = parse_int)]
    rotate_right: Option<i64>,
    #[arg(long, group = "op", value_parser = parse_int)]
    logical_and: Option<i64>,
    #[arg(long, group = "op", value_parser = parse_int)]
    logical_or: Option<i64>,
    #[arg(long, group = "op", value_parser = parse_int)]
    logical_xor: Option<i64>,
    #[arg(long, group = "op")]
    logical_complement: bool,
    /// Operation by name, e.g. "rotate-left" (operand from --value)
    #[arg(long, group = "op")]
    operation: Option<String>,
    #[arg(long, default_value = "0", value_parser = parse_int, allow_hyphen_values = true)]
    value: i64,

    /// Save path (defaults to overwriting the input)
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Re-encode Yaz0 input after corruption
    #[arg(long)]
    recompress: bool,
}

impl JobArgs {
    fn config(&self) -> Result<MutationConfig, ConfigError> {
        let (operation, value) = match &self.operation {
            Some(name) => (Operation::from_name(name)?, self.value),
            None => [
                (Operation::Shift,             self.shift),
                (Operation::Swap,              self.swap),
                (Operation::Add,               self.add),
                (Operation::Set,               self.set),
                (Operation::Random,            self.random.then_some(0)),
                (Operation::RotateLeft,        self.rotate_left),
                (Operation::RotateRight,       self.rotate_right),
                (Operation::LogicalAnd,        self.logical_and),
                (Operation::LogicalOr,         self.logical_or),
                (Operation::LogicalXor,        self.logical_xor),
                (Operation::LogicalComplement, self.logical_complement.then_some(0)),
            ]
            .into_iter()
            .find_map(|(op, v)| v.map(|v| (op, v)))
            .unwrap_or((Operation::None, 0)),
        };

        MutationConfig::new(operation, value)
            .with_step(self.step)?
            .with_range(self.start, self.end.unwrap_or(usize::MAX))
    }

    fn into_job(self) -> Result<CorruptionJob, ConfigError> {
        let config = self.config()?;
        let mut job = CorruptionJob::new(&self.input, config)
            .options(DispatchOptions { recompress: self.recompress });
        if let Some(out) = self.out {
            job = job.output(out);
        }
        Ok(job)
    }
}

/// A batch-file line: the same flags as `corrupt`, without a binary name.
#[derive(Parser)]
#[command(no_binary_name = true)]
struct BatchLineCli {
    #[command(flatten)]
    job: JobArgs,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {

        // ── Corrupt ──────────────────────────────────────────────────────────
        Commands::Corrupt { job, json } => {
            let report = job.into_job()?.run()?;
            print_report(&report, json)?;
        }

        // ── Batch ────────────────────────────────────────────────────────────
        Commands::Batch { file, json } => {
            let text = std::fs::read_to_string(&file)?;
            let mut jobs = Vec::new();
            let mut failed = 0usize;

            for line in batch::parse_batch(&text) {
                let parsed = BatchLineCli::try_parse_from(&line.words)
                    .map_err(|e| e.to_string())
                    .and_then(|cli| cli.job.into_job().map_err(|e| e.to_string()));
                match parsed {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        eprintln!("{}:{}: {}", file.display(), line.line, e.trim_end());
                        failed += 1;
                    }
                }
            }

            let total = jobs.len() + failed;
            for outcome in batch::run_all(&jobs) {
                match outcome {
                    Ok(report) => print_report(&report, json)?,
                    Err(e) => {
                        eprintln!("failed: {e}");
                        failed += 1;
                    }
                }
            }

            if failed > 0 {
                return Err(format!("{failed} of {total} job(s) failed").into());
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let data = std::fs::read(&input)?;
            let listing = dispatch::inspect(&data)?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }

        // ── Yaz0 ─────────────────────────────────────────────────────────────
        Commands::Yaz0 { action: Yaz0Action::Encode { input, output } } => {
            let data = std::fs::read(&input)?;
            let packed = codec::yaz0::encode(&data);
            save_atomic(&output, &packed)?;
            println!("{} → {} ({} → {} bytes)", input.display(), output.display(), data.len(), packed.len());
        }
        Commands::Yaz0 { action: Yaz0Action::Decode { input, output } } => {
            let data = std::fs::read(&input)?;
            let (id, plain) = codec::decompress(&data)?;
            if id == CodecId::None {
                return Err(CodecError::BadMagic.into());
            }
            save_atomic(&output, &plain)?;
            println!("{} → {} ({}, {} bytes)", input.display(), output.display(), id.name(), plain.len());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_report(report: &JobReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

/// Decimal or `0x` hex, optionally negative.
fn parse_int(s: &str) -> Result<i64, String> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None       => (false, s),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None      => digits.parse::<i64>(),
    }
    .map_err(|e| format!("invalid number '{s}': {e}"))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_offset(s: &str) -> Result<usize, String> {
    let n = parse_int(s)?;
    usize::try_from(n).map_err(|_| format!("offset '{s}' must not be negative"))
}
