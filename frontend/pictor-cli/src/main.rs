mod cli;

use pictor_core::config::{ConfigStore, ConfigStoreOptions, DirCacheStorage};
use pictor_core::media::Resizer;
use pictor_core::ConfigValue;

fn main() {
    if let Err(error) = run() {
        eprintln!("pictor-cli failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> pictor_core::Result<()> {
    pictor_core::logging::init_tracing("info");

    let args = cli::Cli::parse_args();
    let cache = DirCacheStorage::new(&args.cache_dir);
    let options = ConfigStoreOptions {
        skip_missing_sources: !args.strict_sources,
    };
    let store = ConfigStore::open_with(&args.config, &cache, options)?;

    match args.command {
        cli::Command::Get { key, default } => {
            let fallback = default.map(|raw| ConfigValue::coerce(&raw));
            let value = match &fallback {
                Some(fallback) => Some(store.get_or(&key, fallback)),
                None => store.get(&key),
            };
            match value {
                Some(value) => println!("{value}"),
                None => {
                    return Err(pictor_core::Error::NotFound(format!(
                        "config key '{key}' is not set"
                    )))
                }
            }
        }
        cli::Command::Dump => {
            println!("{}", serde_json::to_string_pretty(store.get_all())?);
        }
        cli::Command::Resize { filename, size } => {
            let resizer = Resizer::new(&store)?;
            let path = resizer.resize(&filename, &size)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}
