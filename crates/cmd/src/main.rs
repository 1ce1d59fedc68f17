// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use diskq_common_storage_queue::{Blocking, Queue, QueueBuilder, QueueError, path::scan_chunk_files};
use diskq_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use snafu::{ResultExt, Whatever, whatever};
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
name = "diskq",
about = "Inspect and drive a disk-backed FIFO queue",
author = env!("CARGO_PKG_AUTHORS"),
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    queue: QueueArgs,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct QueueArgs {
    /// Parent directory holding one sub-directory per queue.
    #[arg(long, global = true, default_value = "./queue_data")]
    dir: PathBuf,

    /// Queue name (sub-directory of --dir).
    #[arg(long, global = true, default_value = "default")]
    name: String,

    /// Items per in-memory buffer and per chunk file.
    #[arg(long, global = true, default_value_t = 1024)]
    cache_size: usize,

    /// Upper bound on the queue length. Unbounded when omitted.
    #[arg(long, global = true)]
    max_size: Option<usize>,
}

impl QueueArgs {
    /// Every command syncs on close, so items loaded into the get buffer by
    /// the open are given back to disk when the command finishes.
    fn open(&self) -> Result<Queue<String>, Whatever> {
        let mut builder = QueueBuilder::new(&self.dir, self.name.as_str())
            .cache_size(self.cache_size)
            .sync_on_close(true);
        if let Some(max_size) = self.max_size {
            builder = builder.max_size(max_size);
        }
        builder.build().with_whatever_context(|_| {
            format!("failed to open queue {:?}", self.dir.join(&self.name))
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct LoggingArgs {
    /// Level filter, e.g. "info" or "warn,diskq_common_storage_queue=debug".
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Also write hourly rotated log files to this directory.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormatArg,
}

impl LoggingArgs {
    fn options(&self) -> LoggingOptions {
        LoggingOptions::builder()
            .dir(self.log_dir.clone().unwrap_or_default())
            .level(self.log_level.clone())
            .log_format(self.log_format.into())
            .build()
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Put(PutArgs),
    Get(GetArgs),
    Peek(PeekArgs),
    Len,
    Info,
    Demo(DemoArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Append items to the back of the queue.
Examples:

diskq put first second third

")]
struct PutArgs {
    #[arg(required = true)]
    items: Vec<String>,

    /// Wait at most this long for room when --max-size is reached.
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,
}

impl PutArgs {
    fn run(&self, queue: &Queue<String>) -> Result<(), Whatever> {
        for item in &self.items {
            queue
                .put(item.clone(), wait_mode(self.timeout_ms))
                .with_whatever_context(|_| format!("failed to put {item:?}"))?;
        }
        println!("put {} item(s), length now {}", self.items.len(), queue.len());
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove items from the front of the queue and print one per line.
Stops early when the queue runs empty.
Examples:

diskq get -n 10
diskq get --timeout-ms 5000

")]
struct GetArgs {
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Wait at most this long for each item.
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,
}

impl GetArgs {
    fn run(&self, queue: &Queue<String>) -> Result<(), Whatever> {
        for _ in 0..self.count {
            match queue.get(wait_mode(self.timeout_ms)) {
                Ok(item) => {
                    println!("{item}");
                    queue.task_done().whatever_context("failed to acknowledge item")?;
                }
                Err(QueueError::Empty) => break,
                Err(e) => return Err(e).whatever_context("failed to get item"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the next items without removing them.
Examples:

diskq peek -n 5

")]
struct PeekArgs {
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
}

impl PeekArgs {
    fn run(&self, queue: &Queue<String>) -> Result<(), Whatever> {
        let items = match queue.peek(self.count) {
            Ok(items) => items,
            Err(QueueError::OutOfRange { available: 0, .. }) => Vec::new(),
            Err(QueueError::OutOfRange { available, .. }) => queue
                .peek(available)
                .whatever_context("failed to peek")?,
            Err(e) => return Err(e).whatever_context("failed to peek"),
        };
        for item in items {
            println!("{item}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Run producer and consumer threads against one queue and report how many
items each thread handled.
Examples:

diskq demo --producers 4 --consumers 2 --items 10000

")]
struct DemoArgs {
    #[arg(long, default_value_t = 2)]
    producers: usize,

    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// Items put by each producer.
    #[arg(long, default_value_t = 1000)]
    items: usize,
}

impl DemoArgs {
    fn run(&self, queue: Queue<String>) -> Result<(), Whatever> {
        if self.consumers == 0 {
            whatever!("demo needs at least one consumer");
        }
        let queue = Arc::new(queue);
        {
            let queue = Arc::clone(&queue);
            ctrlc::set_handler(move || {
                if let Err(e) = queue.close() {
                    eprintln!("failed to close queue: {e}");
                }
            })
            .whatever_context("failed to install Ctrl-C handler")?;
        }

        let start = Instant::now();
        let consumers: Vec<_> = (0..self.consumers)
            .map(|id| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut handled = 0_usize;
                    while queue.get(Blocking::Forever).is_ok() {
                        handled += 1;
                        // Items recovered from an earlier run were never
                        // counted as unfinished by this process.
                        let _ = queue.task_done();
                    }
                    info!(consumer = id, handled, "Consumer finished");
                    (id, handled)
                })
            })
            .collect();

        let producers: Vec<_> = (0..self.producers)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let items = self.items;
                thread::spawn(move || {
                    let mut produced = 0_usize;
                    for seq in 0..items {
                        if queue.put(format!("p{id}-{seq}"), Blocking::Forever).is_err() {
                            break;
                        }
                        produced += 1;
                    }
                    info!(producer = id, produced, "Producer finished");
                    (id, produced)
                })
            })
            .collect();

        let mut total_produced = 0;
        for producer in producers {
            let Ok((id, produced)) = producer.join() else {
                whatever!("producer thread panicked");
            };
            println!("producer {id}: {produced} item(s)");
            total_produced += produced;
        }

        // Closed early by Ctrl-C is fine; the consumers stop either way.
        if !queue.is_closed() {
            let _ = queue.join();
        }
        queue.close().whatever_context("failed to close queue")?;

        let mut total_consumed = 0;
        for consumer in consumers {
            let Ok((id, handled)) = consumer.join() else {
                whatever!("consumer thread panicked");
            };
            println!("consumer {id}: {handled} item(s)");
            total_consumed += handled;
        }

        println!(
            "produced {total_produced}, consumed {total_consumed}, {} left, in {:?}",
            queue.len(),
            start.elapsed()
        );
        Ok(())
    }
}

fn run_info(queue: &Queue<String>) -> Result<(), Whatever> {
    let recovery = queue.recovery_info();
    let stats = queue.stats();
    println!("path:          {}", queue.path().display());
    println!("stored index:  {}", recovery.stored);
    println!("open index:    {}", stats.pointers);
    println!("length:        {}", stats.len);
    println!("get buffered:  {}", stats.get_buffered);
    println!("put buffered:  {}", stats.put_buffered);

    queue.sync().whatever_context("failed to sync queue")?;
    let chunks = scan_chunk_files(queue.path()).whatever_context("failed to list chunk files")?;
    println!("synced index:  {}", queue.pointers());
    println!("chunk files:   {chunks:?}");
    Ok(())
}

const fn wait_mode(timeout_ms: u64) -> Blocking {
    if timeout_ms == 0 {
        Blocking::NoWait
    } else {
        Blocking::Timeout(Duration::from_millis(timeout_ms))
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let _guards = init_global_logging("diskq", &cli.logging.options())
        .whatever_context("failed to initialize logging")?;
    set_panic_hook();

    let queue = cli.queue.open()?;
    match &cli.commands {
        Commands::Put(args) => args.run(&queue)?,
        Commands::Get(args) => args.run(&queue)?,
        Commands::Peek(args) => args.run(&queue)?,
        Commands::Len => println!("{}", queue.len()),
        Commands::Info => run_info(&queue)?,
        Commands::Demo(args) => return args.run(queue),
    }
    queue.close().whatever_context("failed to close queue")
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() { Cli::command().debug_assert(); }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "diskq",
            "get",
            "-n",
            "3",
            "--dir",
            "/tmp/q",
            "--cache-size",
            "8",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.queue.dir, PathBuf::from("/tmp/q"));
        assert_eq!(cli.queue.cache_size, 8);
        assert_eq!(cli.queue.max_size, None);
        assert!(matches!(cli.logging.log_format, LogFormatArg::Json));
        assert!(matches!(cli.commands, Commands::Get(GetArgs { count: 3, .. })));
    }

    #[test]
    fn test_put_then_get_across_invocations() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let args = QueueArgs {
            dir:        temp_dir.path().to_path_buf(),
            name:       "cli".to_string(),
            cache_size: 2,
            max_size:   None,
        };

        let queue = args.open().unwrap();
        PutArgs {
            items:      vec!["a".into(), "b".into(), "c".into()],
            timeout_ms: 0,
        }
        .run(&queue)
        .unwrap();
        queue.close().unwrap();
        drop(queue);

        let queue = args.open().unwrap();
        assert_eq!(queue.peek(3).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(queue.get_nowait().unwrap(), "a");
        queue.close().unwrap();
        drop(queue);

        let queue = args.open().unwrap();
        assert_eq!(queue.peek(2).unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_wait_mode() {
        assert!(matches!(wait_mode(0), Blocking::NoWait));
        assert!(matches!(
            wait_mode(250),
            Blocking::Timeout(d) if d == Duration::from_millis(250)
        ));
    }
}
