use crate::config::types::StoreSettings;
use crate::config::FactoryConfig;
use crate::factory::{CreateArg, Factory};
use crate::harness::{body, Suite, TestArg, TestFactory};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Factory options shared by every command
#[derive(Args)]
struct FactoryArgs {
    /// Location template; `*` is replaced by a unique token
    #[arg(long)]
    template: Option<String>,
    /// JSON factory configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Use the in-memory engine
    #[arg(long)]
    mem: bool,
    /// Backend name
    #[arg(long)]
    db: Option<String>,
    /// Delete stores once they close
    #[arg(long)]
    clean: bool,
    /// Remove the template root at exit even if not empty
    #[arg(long)]
    always: bool,
    /// Name generator (monotonic, random, alpha)
    #[arg(long)]
    gen: Option<String>,
    /// Wrapper names, applied in order
    #[arg(long = "wrap")]
    wrappers: Vec<String>,
    /// Value encoding (utf8, json, binary)
    #[arg(long)]
    value_encoding: Option<String>,
}

impl FactoryArgs {
    fn config(&self) -> Result<FactoryConfig> {
        let mut config = match &self.config {
            Some(path) => FactoryConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => FactoryConfig::default(),
        };
        if self.template.is_some() {
            config.name = self.template.clone();
        }
        config.mem |= self.mem;
        config.clean |= self.clean;
        config.always |= self.always;
        if self.db.is_some() {
            config.db = self.db.clone();
        }
        if self.gen.is_some() {
            config.gen = self.gen.clone();
        }
        if !self.wrappers.is_empty() {
            config.wrap = Some(Value::from(self.wrappers.clone()));
        }
        if self.value_encoding.is_some() {
            config.value_encoding = self.value_encoding.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a store, optionally write entries, then close it
    Create {
        #[command(flatten)]
        factory: FactoryArgs,
        /// Sub-name appended to the generated location
        #[arg(long)]
        name: Option<String>,
        /// Entries to write, as key=value
        #[arg(long = "put", value_parser = parse_entry)]
        entries: Vec<(String, String)>,
    },
    /// Run a small coordinated test suite and print TAP output
    Demo {
        #[command(flatten)]
        factory: FactoryArgs,
        /// Start test bodies before the store is open
        #[arg(long)]
        no_wait: bool,
    },
}

fn parse_entry(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Create { factory, name, entries } => create(&factory, name, &entries),
        Commands::Demo { factory, no_wait } => demo(&factory, no_wait),
    }
}

fn create(args: &FactoryArgs, name: Option<String>, entries: &[(String, String)]) -> Result<()> {
    let config = args.config()?;
    let factory = Factory::from_config(&config)?;

    let mut call = vec![CreateArg::options(StoreSettings::new())];
    if let Some(name) = name {
        call.push(CreateArg::Name(name));
    }
    let handle = factory.create(call)?;
    println!("{}", handle.location());

    for (key, value) in entries {
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));
        handle
            .put(key, &value)
            .with_context(|| format!("writing {}", key))?;
    }
    if !entries.is_empty() {
        eprintln!("Wrote {} entries", entries.len());
    }

    handle.close()?;
    if factory.clean() {
        eprintln!("Store closed and removed");
    } else {
        eprintln!("Store closed; kept at {}", handle.location());
    }
    Ok(())
}

fn demo(args: &FactoryArgs, no_wait: bool) -> Result<()> {
    let config = args.config()?;
    let harness = TestFactory::from_config(&config)?;
    let harness = if no_wait { harness.wait(false) } else { harness };

    let mut suite = Suite::new();
    harness.test(
        &mut suite,
        vec![
            TestArg::name("put then get"),
            body(|t, db| {
                t.plan(1);
                let value = Value::from("world");
                match db.put("hello", &value).and_then(|_| db.get("hello")) {
                    Ok(found) => t.equal(found, Some(value), "value round-trips"),
                    Err(e) => t.fail(&format!("store error: {}", e)),
                }
            }),
        ],
    )?;
    harness.test(
        &mut suite,
        vec![
            TestArg::name("explicit end"),
            body(|t, db| {
                t.ok(db.is_open(), "store is open");
                t.end();
            }),
        ],
    )?;

    let report = suite.run();
    print!("{}", report.to_tap());
    if !report.passed() {
        anyhow::bail!("demo suite failed");
    }
    Ok(())
}

