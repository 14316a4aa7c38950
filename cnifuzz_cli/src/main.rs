use anyhow::Context;
use clap::Parser;
use cnifuzz_core::config::HarnessConfig;
use cnifuzz_core::error::{EXIT_CONFIG, HarnessError};
use cnifuzz_core::executor::CommandInvoker;
use cnifuzz_core::mutator;
use cnifuzz_core::namespace::{ExistingNamespace, NamespaceProvider, PinnedNamespaceProvider};
use cnifuzz_core::oracle::{MarkerDetector, OutcomeClassifier};
use cnifuzz_core::report::summarize;
use cnifuzz_core::seed;
use cnifuzz_core::session::{SessionOrchestrator, SessionSettings, SessionTally};
use cnifuzz_core::transcript::{Transcript, TranscriptVerbosity};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SETTINGS_FILE: &str = "cnifuzz.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Fuzz CNI plugins with malformed network configurations", long_about = None)]
struct Cli {
    /// Harness settings file (TOML)
    #[clap(short, long, value_parser)]
    settings: Option<PathBuf>,
    /// Network configuration to mutate (device value is ignored if specified)
    #[clap(long)]
    config: Option<PathBuf>,
    /// PCI address of the device under test
    #[clap(long)]
    device: Option<String>,
    /// Path to the CNI plugin executable
    #[clap(long)]
    cni: Option<PathBuf>,
    /// Number of tests to conduct
    #[clap(short, long)]
    tests: Option<u64>,
    /// Transcript log path
    #[clap(short, long)]
    out: Option<PathBuf>,
    /// Log only invocations whose output carries a crash marker
    #[clap(long)]
    panic_only: bool,
    /// Mutation engine: external (radamsa), bytes or json
    #[clap(long)]
    mutator: Option<String>,
    /// Reuse an existing network namespace instead of creating one
    #[clap(long)]
    netns: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = match &cli.settings {
        Some(path) => {
            info!(path = %path.display(), "loading settings");
            HarnessConfig::load_from_file(path)?
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if default_path.exists() {
                info!(path = %default_path.display(), "loading default settings file");
                HarnessConfig::load_from_file(&default_path)?
            } else {
                HarnessConfig::default()
            }
        }
    };

    if let Some(config_path) = &cli.config {
        config.seed.config_path = Some(config_path.clone());
    }
    if let Some(device) = &cli.device {
        config.seed.device_id = Some(device.clone());
    }
    if let Some(cni) = &cli.cni {
        config.plugin.path = cni.clone();
    }
    if let Some(tests) = cli.tests {
        config.fuzzer.iterations = tests;
    }
    if let Some(out) = &cli.out {
        config.transcript.path = Some(out.clone());
    }
    if cli.panic_only {
        config.fuzzer.panic_only = true;
    }
    if let Some(name) = &cli.mutator {
        config.mutator = name.parse()?;
    }
    if let Some(netns) = &cli.netns {
        config.namespace.path = Some(netns.clone());
    }
    Ok(config)
}

fn default_transcript_path() -> PathBuf {
    let mut name = std::env::args_os()
        .next()
        .unwrap_or_else(|| "cnifuzz".into());
    name.push(".log");
    PathBuf::from(name)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    config.validate()?;

    let transcript_path = config
        .transcript
        .path
        .clone()
        .unwrap_or_else(default_transcript_path);
    let mut transcript = Transcript::create(
        &transcript_path,
        TranscriptVerbosity::from_panic_only(config.fuzzer.panic_only),
    )?;

    let seed = seed::load_seed(&config.seed)?;

    let mut provider: Box<dyn NamespaceProvider> = match &config.namespace.path {
        Some(path) => Box::new(ExistingNamespace::new(path)),
        None => Box::new(PinnedNamespaceProvider::new(&config.namespace.run_dir)),
    };
    let netns = provider
        .create()
        .map_err(HarnessError::NamespaceSetup)
        .context("cannot prepare an isolated namespace for the plugin")?;

    let classifier =
        OutcomeClassifier::new(Box::new(MarkerDetector::new(&config.fuzzer.crash_markers)));
    let mut session = SessionOrchestrator::new(
        mutator::from_settings(&config.mutator),
        CommandInvoker::new(&config.plugin.path),
        classifier,
        SessionSettings::from_config(&config, &netns),
    );
    let mut tally = SessionTally::new();

    let outcome = session
        .run(&seed, &mut tally, &mut transcript)
        .and_then(|()| transcript.flush());
    let teardown = provider
        .destroy(netns)
        .map_err(HarnessError::NamespaceTeardown);

    if let Err(e) = outcome {
        if let Err(teardown_err) = teardown {
            warn!(error = %teardown_err, "namespace teardown after abort failed");
        }
        // Keep whatever was recorded before the abort.
        if let Err(flush_err) = transcript.flush() {
            warn!(error = %flush_err, "flushing transcript after abort failed");
        }
        warn!(
            succeeded = tally.successes().len(),
            failed = tally.failures().len(),
            "session aborted"
        );
        return Err(e.into());
    }
    teardown?;

    println!("{}", summarize(&tally));
    println!("\nMore details can be found in {}", transcript_path.display());
    Ok(())
}

/// `--help` and `--version` exit cleanly; usage errors count as configuration errors.
fn parse_failure_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() { EXIT_CONFIG } else { 0 }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Nothing left to report to if stderr itself is gone.
            let _ = err.print();
            return ExitCode::from(parse_failure_exit_code(&err));
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<HarnessError>()
                .map_or(EXIT_CONFIG, HarnessError::exit_code);
            ExitCode::from(code)
        }
    }
}
