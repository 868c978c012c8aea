use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::LevelFilter;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use uptane::datatype::{Error, KeyKind, RepositoryType, RoleName};
use uptane::repo_builder::RepoBuilder;

/// Offline tooling for generating and re-signing an Uptane Director and
/// Image repository pair.
#[derive(Parser)]
#[clap(name = "uptane-repo", version)]
struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    #[clap(short, long, global = true, default_value = "info")]
    level: String,

    /// Overrides the expiry timestamp newly-signed metadata carries.
    #[clap(long, global = true)]
    expires: Option<String>,

    /// Overrides the correlation id attached to a Director Targets entry.
    #[clap(long, global = true)]
    correlationid: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emits a fresh, empty pair of Director/Image repositories.
    Generate {
        path: PathBuf,
        #[clap(long, default_value = "ED25519")]
        keytype: KeyKind,
    },
    /// Adds a file as a Target in the Image repository.
    Image { path: PathBuf, file: PathBuf },
    /// Copies an existing Image Target into the Director Targets.
    Addtarget {
        path: PathBuf,
        name: String,
        #[clap(long)]
        hwid: String,
        #[clap(long)]
        serial: String,
    },
    /// Re-signs the Director Targets, Snapshot and Timestamp.
    Signtargets { path: PathBuf },
    /// Signs an arbitrary role body read from stdin, writing the signed
    /// envelope to stdout.
    Sign {
        path: PathBuf,
        #[clap(long)]
        repotype: RepositoryType,
        #[clap(long)]
        keyname: RoleName,
    },
}

fn main() {
    let cli = Cli::parse();
    start_logging(&cli.level);

    if let Err(err) = run(cli) {
        eprintln!("ERROR: {}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::Generate { path, keytype } => {
            let builder = RepoBuilder::new(path);
            builder.generate(keytype, cli.expires)
        }

        Command::Image { path, file } => {
            let builder = RepoBuilder::new(path);
            let name = file
                .file_name()
                .ok_or_else(|| Error::RepoBuilder("target file has no file name".to_string()))?
                .to_string_lossy()
                .into_owned();
            let uri = format!("file://{}", file.display());
            builder.add_image(&file, &name, &uri)
        }

        Command::Addtarget { path, name, hwid, serial } => {
            let builder = RepoBuilder::new(path);
            builder.add_target(&name, &hwid, &serial, cli.correlationid.as_deref())
        }

        Command::Signtargets { path } => {
            let builder = RepoBuilder::new(path);
            builder.sign_targets()
        }

        Command::Sign { path, repotype, keyname } => {
            let builder = RepoBuilder::new(path);
            let mut input = String::new();
            io::stdin().read_to_string(&mut input)?;
            let body: serde_json::Value = serde_json::from_str(&input)?;
            let envelope = builder.sign_raw(repotype, keyname, body)?;
            let rendered = serde_json::to_string_pretty(&envelope)?;
            io::stdout().write_all(rendered.as_bytes())?;
            io::stdout().write_all(b"\n")?;
            Ok(())
        }
    }
}

fn start_logging(level: &str) {
    let mut builder = Builder::new();
    builder.format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()));
    builder.parse_filters(level);
    if !level.eq_ignore_ascii_case("trace") {
        builder.filter(Some("hyper"), LevelFilter::Info);
    }
    let _ = builder.try_init();
}
