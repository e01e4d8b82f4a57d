use clap::Parser;
use context_log_fields::{Config, Context, Fields, Logger, TracingEmitter};
use serde_json::Value;

/// Layer field lists the way nested calls would and print the merged result.
///
/// Settings start from LOGFIELDS_DEDUP, LOGFIELDS_LEVEL and LOGFIELDS_CALLER;
/// flags given here take precedence.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Field layers, outermost first. Each is a flat JSON list: '["key", value, ...]'.
    layers: Vec<String>,
    /// Drop older same-named keys when a newer layer supplies them
    #[arg(long)]
    dedup: bool,
    /// Remove the first occurrence of a key from the merged set (repeatable)
    #[arg(long = "delete", value_name = "KEY")]
    delete: Vec<String>,
    /// Also log the merged set with this message
    #[arg(long, value_name = "MSG")]
    emit: Option<String>,
    /// Level used for --emit and for the log output filter
    #[arg(long)]
    level: Option<String>,
    /// Attach the call site to the logged line
    #[arg(long)]
    caller: bool,
}

fn main() {
    // Parse CLI arguments.
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config.overridden(
            args.dedup.then_some(true),
            args.level.as_deref(),
            args.caller.then_some(true),
        ),
        Err(e) => {
            eprintln!("Invalid environment: {e}");
            std::process::exit(1);
        }
    };
    let level = match config.max_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    config.apply();

    // Inject each layer over the previous ones.
    let mut ctx = Logger::new(TracingEmitter, level).to_context(&Context::background());
    for (i, layer) in args.layers.iter().enumerate() {
        match parse_layer(layer) {
            Ok(fields) => ctx = ctx.inject(fields),
            Err(e) => {
                eprintln!("Invalid layer #{}: {e}", i + 1);
                std::process::exit(1);
            }
        }
    }

    let mut merged = ctx.fields();
    for key in &args.delete {
        merged = merged.delete(key);
    }

    if let Some(msg) = args.emit.as_deref() {
        let logger = Logger::from_context(&ctx);
        logger.log(level, &Context::background(), msg, &merged);
    }

    // Output result.
    match serde_json::to_string_pretty(&merged.to_flat()) {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("Cannot render fields: {e}");
            std::process::exit(1);
        }
    }
}

fn parse_layer(raw: &str) -> Result<Fields, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Fields::from_flat(items).map_err(|e| e.to_string()),
        Ok(other) => Err(format!("expected a JSON array, got {other}")),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}
