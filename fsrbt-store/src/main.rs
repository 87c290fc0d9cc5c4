use std::env;
use std::fs::metadata;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use fsrbt::io::registry;
use fsrbt::io::shm::ShmError;
use fsrbt::io::{file, Location, Segment};
use fsrbt::rbtree::{Direction, KeyKind, RbTree};
use fsrbt::record::{self, RecordFormat};
use fsrbt::search::{Query, SearchOptions, Searcher, SizeFilter, MAX_THREADS_CEILING};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Record file to index into shared memory
    source: Option<PathBuf>,

    #[command(flatten)]
    index: IndexOptions,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Args, Clone, Debug)]
struct IndexOptions {
    /// Key to order the index by (name, size or path)
    #[arg(short, long, default_value_t = KeyKind::Name)]
    key: KeyKind,

    /// Segment name prefix (defaults to one derived from the key)
    #[arg(short, long)]
    prefix: Option<String>,

    /// Field delimiter in the record file
    #[arg(short, long, default_value = "|")]
    delimiter: String,
}

impl IndexOptions {
    fn prefix(&self, key: KeyKind) -> &str {
        self.prefix
            .as_deref()
            .unwrap_or_else(|| key.segment_prefix())
    }

    fn build(&self, source: &Path) -> Result<RbTree> {
        let format = RecordFormat::with_delimiter(self.delimiter.clone());
        let mut tree = RbTree::new(self.key);
        let report = record::ingest_file(source, &format, &mut tree)?;
        if report.skipped > 0 {
            eprintln!(
                "skipped {} malformed line(s) in {}",
                report.skipped,
                source.display()
            );
        }
        tree.info();
        Ok(tree)
    }
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Index a record file into shared memory
    Build {
        /// Record file
        source: PathBuf,
        #[command(flatten)]
        index: IndexOptions,
    },
    /// Index a record file into a tree file
    Save {
        /// Record file
        source: PathBuf,
        /// Output file (defaults to <source>.rbt)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        index: IndexOptions,
    },
    /// Copy a tree file into shared memory
    Load {
        /// Tree file
        file: PathBuf,
        /// Segment name prefix (defaults to one derived from the tree's key)
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Remove a shared memory segment
    Remove {
        /// Segment name
        name: String,
    },
    /// Remove every segment with this prefix
    Purge {
        /// Segment name prefix
        prefix: String,
    },
    /// List shared memory segments
    List {
        /// Segment name prefix
        #[arg(default_value = "rbt_")]
        prefix: String,
    },
    /// Check a stored tree
    Verify {
        #[command(flatten)]
        target: Target,
    },
    /// Print every record of a stored tree
    Dump {
        #[command(flatten)]
        target: Target,
        /// Direction (Descending or Ascending)
        #[arg(long, default_value = "Ascending")]
        direction: Direction,
    },
    /// Search a stored tree. Without filters, open an interactive prompt
    Search {
        #[command(flatten)]
        target: Target,
        /// Maximum number of search threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,
        #[command(flatten)]
        filters: Filters,
    },
}

#[derive(Args, Clone, Debug)]
struct Target {
    /// Segment name
    #[arg(required_unless_present = "file")]
    segment: Option<String>,

    /// Read a tree file instead of a segment
    #[arg(short, long, conflicts_with = "segment")]
    file: Option<PathBuf>,
}

impl Target {
    fn location(&self) -> Result<Location> {
        match (&self.file, &self.segment) {
            (Some(path), _) => Ok(Location::File(path.clone())),
            (None, Some(name)) => Ok(Location::Segment(Segment::new(name.clone()))),
            (None, None) => bail!("a segment name or --file is required"),
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
struct Filters {
    /// Exact name (repeatable)
    #[arg(short, long = "name")]
    names: Vec<String>,

    /// Name glob pattern
    #[arg(short, long, conflicts_with = "names")]
    glob: Option<String>,

    /// Exact size
    #[arg(short, long, conflicts_with_all = ["min_size", "max_size"])]
    size: Option<u64>,

    /// Minimum size
    #[arg(long)]
    min_size: Option<u64>,

    /// Maximum size
    #[arg(long)]
    max_size: Option<u64>,

    /// Exact path (repeatable)
    #[arg(short = 'P', long = "path")]
    paths: Vec<String>,

    /// Type tag
    #[arg(short = 't', long = "type")]
    kind: Option<String>,

    /// Content digest
    #[arg(long)]
    hash: Option<String>,
}

impl Filters {
    fn query(&self) -> Query {
        let mut query = Query::new();
        if !self.names.is_empty() {
            query = query.with_names(self.names.iter().cloned());
        }
        if let Some(glob) = &self.glob {
            query = query.with_glob(glob.clone());
        }
        query.size = match self.size {
            Some(size) => Some(SizeFilter::Exact(size)),
            None => SizeFilter::from_bounds(self.min_size, self.max_size),
        };
        if !self.paths.is_empty() {
            query = query.with_paths(self.paths.iter().cloned());
        }
        query.kind = self.kind.clone();
        query.hash = self.hash.clone();
        query
    }
}

/// One line typed at the interactive prompt.
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct Shell {
    #[command(flatten)]
    filters: Filters,
}

fn get_history_file() -> Option<PathBuf> {
    dirs::preference_dir()
        .and_then(|mut base| {
            base.push("fsrbt");
            // Note: Not create_dir_all(), because we don't want to create preference
            // dirs if they don't exist.
            if metadata(base.clone()).ok().is_none() {
                std::fs::create_dir(base.clone()).ok()?
            }
            Some(base)
        })
        .map(|mut base| {
            base.push("history.txt");
            base
        })
}

fn stdin_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

fn interactive(tree: &RbTree, searcher: &Searcher) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.load_history(&file_location) {
            println!("error loading history: {e}");
        }
    }
    println!("enter filters, e.g. --name y.txt --min-size 10 (--help for more)");
    println!("terminate with ctrl-c or ctrl-d");
    loop {
        let readline = rl.readline("search: ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match Shell::try_parse_from(line.split_whitespace()) {
                    Ok(shell) => run_query(tree, searcher, &shell.filters.query()),
                    Err(e) => println!("{e}"),
                }
                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("terminating...");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.save_history(&file_location) {
            println!("error saving history: {e}");
        }
    }
    Ok(())
}

fn run_query(tree: &RbTree, searcher: &Searcher, query: &Query) {
    let format = RecordFormat::default();
    if query.is_multi_value() {
        let mut results = searcher.collect(tree, query);
        results.sort_by_key(tree.key());
        for record in &results.matches {
            println!("{}", record.to_line(&format));
        }
        println!(
            "matches: {}, visited: {}, workers: {}",
            results.len(),
            results.stats.visited,
            results.stats.spawned
        );
    } else {
        let count = AtomicUsize::new(0);
        let predicate = query.compile();
        let stats = searcher.for_each_match(tree, &predicate, |record| {
            count.fetch_add(1, Ordering::Relaxed);
            println!("{}", record.to_line(&format));
        });
        println!(
            "matches: {}, visited: {}, workers: {}",
            count.into_inner(),
            stats.visited,
            stats.spawned
        );
    }
}

fn build_segment(source: &Path, index: &IndexOptions) -> Result<()> {
    let tree = index.build(source)?;
    let segment = Segment::for_source(index.prefix(tree.key()), source);
    let mapped = segment.write(&tree)?;
    println!(
        "created segment {} ({} records, {mapped} bytes)",
        segment.name(),
        tree.len()
    );
    Ok(())
}

fn process_action(action: Action) -> Result<()> {
    match action {
        Action::Build { source, index } => build_segment(&source, &index)?,
        Action::Save {
            source,
            output,
            index,
        } => {
            let output = output.unwrap_or_else(|| {
                let mut name = source.clone().into_os_string();
                name.push(".");
                name.push(file::TREE_EXTENSION);
                PathBuf::from(name)
            });
            let tree = index.build(&source)?;
            let written = file::save(&tree, &output)?;
            println!(
                "saved {} records to {} ({written} bytes)",
                tree.len(),
                output.display()
            );
        }
        Action::Load { file, prefix } => {
            let tree = file::load(&file)?;
            let prefix = prefix.as_deref().unwrap_or_else(|| tree.key().segment_prefix());
            let segment = Segment::for_source(prefix, &file);
            let mapped = segment.write(&tree)?;
            println!(
                "loaded {} records into segment {} ({mapped} bytes)",
                tree.len(),
                segment.name()
            );
        }
        Action::Remove { name } => match registry::remove(&name) {
            Ok(()) => println!("removed segment {name}"),
            Err(ShmError::NotFound(name)) => println!("no such segment: {name}"),
            Err(e) => return Err(e.into()),
        },
        Action::Purge { prefix } => {
            let removed = registry::remove_all(&prefix)?;
            println!("removed {removed} segment(s)");
        }
        Action::List { prefix } => {
            for info in registry::list(&prefix)? {
                println!("{}\t{}", info.name, info.size);
            }
        }
        Action::Verify { target } => {
            let location = target.location()?;
            let tree = location.load()?;
            tree.info();
            tree.verify()
                .with_context(|| format!("verification failed for {location}"))?;
            println!(
                "Ok: {location}: {} records, height {}",
                tree.len(),
                tree.height()
            );
        }
        Action::Dump { target, direction } => {
            let tree = target.location()?.load()?;
            let format = RecordFormat::default();
            for record in tree.iter_direction(direction) {
                println!("{}", record.to_line(&format));
            }
        }
        Action::Search {
            target,
            threads,
            filters,
        } => {
            let location = target.location()?;
            let tree = location
                .load()
                .with_context(|| format!("loading {location}"))?;
            let local;
            let searcher = match threads {
                Some(threads) => {
                    local = Searcher::new(SearchOptions {
                        max_threads: threads.min(MAX_THREADS_CEILING),
                    });
                    &local
                }
                None => Searcher::global(),
            };
            let query = filters.query();
            if query.is_empty() && stdin_is_tty() {
                interactive(&tree, searcher)?;
            } else {
                run_query(&tree, searcher, &query);
            }
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match (cli.action, cli.source) {
        (Some(action), _) => process_action(action),
        (None, Some(source)) => build_segment(&source, &cli.index),
        (None, None) => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match env::var("TMPDIR") {
        Ok(d) => d,
        Err(_e) => ".".to_string(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "fsrbt.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
