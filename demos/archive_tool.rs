use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rezip::{Archive, OpenMode};

#[derive(Parser)]
#[command(about, long_about = None)]
struct Args {
    /// Path of the zip archive to operate on
    archive: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the entries of the archive
    List,
    /// Add a file or a directory tree to the archive
    Add {
        source: PathBuf,
        /// Entry name (or prefix, for directories); defaults to the source name
        #[arg(long)]
        name: Option<String>,
    },
    /// Extract one entry to disk
    Extract { entry: String, output: PathBuf },
    /// Delete one entry
    Delete { entry: String },
}

fn main() -> rezip::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    match args.command {
        Command::List => {
            let archive = Archive::open(&args.archive, OpenMode::Read)?;
            for entry in archive.entries() {
                println!(
                    "{:>10} B  {:08x}  {}",
                    entry.uncompressed_size(),
                    entry.crc32(),
                    entry.name()
                );
            }
        }
        Command::Add { source, name } => {
            let mut archive = open_for_update(&args.archive)?;
            let prefix = name.unwrap_or_else(|| {
                source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            if source.is_dir() {
                for file in walkdir::WalkDir::new(&source) {
                    let file = file.map_err(std::io::Error::from)?;
                    if !file.file_type().is_file() {
                        continue;
                    }
                    let path = file.into_path();
                    let relative = path
                        .strip_prefix(&source)
                        .expect("walkdir yields paths under its root")
                        .to_string_lossy()
                        .into_owned();
                    archive.add_file(&path, &format!("{prefix}/{relative}"), true)?;
                }
            } else {
                archive.add_file(&source, &prefix, true)?;
            }
            archive.close()?;
        }
        Command::Extract { entry, output } => {
            let mut archive = Archive::open(&args.archive, OpenMode::Read)?;
            let crc_ok = archive.extract_file(&entry, &output)?;
            if !crc_ok {
                eprintln!("warning: CRC mismatch, the extracted data may be damaged");
            }
        }
        Command::Delete { entry } => {
            let mut archive = Archive::open(&args.archive, OpenMode::ReadWrite)?;
            archive.delete_file(&entry)?;
            archive.close()?;
        }
    }

    Ok(())
}

/// Opens an existing archive for update, or creates a fresh one.
fn open_for_update(path: &PathBuf) -> rezip::Result<Archive> {
    if path.exists() {
        Archive::open(path, OpenMode::ReadWrite)
    } else {
        Archive::open(path, OpenMode::Write)
    }
}
