//! A thin command-line front-end over `pbo_archive`, adapted from
//! `dayz_dev_tools/unpbo.py`'s argument shape. Demonstrates `open`,
//! listing, and extraction end to end; not part of the library's public
//! API.

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;

use pbo_archive::bytewindow::FileSource;
use pbo_archive::extractor;
use pbo_archive::{reader, Result};

/// View or extract a PBO file.
#[derive(Parser)]
#[command(name = "pbo-cli", version, about)]
struct Args {
    /// List the archive's contents instead of extracting it.
    #[arg(short, long)]
    list: bool,

    /// Attempt to deobfuscate extracted files.
    #[arg(short, long)]
    deobfuscate: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// The PBO file to read.
    pbofile: PathBuf,

    /// Files to extract from the PBO; if empty, extracts everything.
    files: Vec<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let file = File::open(&args.pbofile)?;
    let source = FileSource::new(file)?;
    let archive = reader::open(source)?;

    if args.list {
        list(&archive, args.verbose);
        return Ok(());
    }

    let output_dir = PathBuf::from(".");
    if args.files.is_empty() {
        extractor::extract_all(&archive, &output_dir, args.verbose, args.deobfuscate, None)
    } else {
        let names: Vec<&[u8]> = args.files.iter().map(|s| s.as_bytes()).collect();
        extractor::extract_selected(&archive, names, &output_dir, args.verbose, args.deobfuscate, None)
    }
}

fn list(archive: &reader::Archive, verbose: bool) {
    if verbose {
        println!("Headers:");
        println!("--------");
        for (key, value) in archive.headers() {
            println!(
                "{} = {}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
        }
        println!();
        println!(" Original  Type    Size        Time   Name");
        println!("---------  ----  ---------  -----  ----");
    } else {
        println!(" Original    Time   Name");
        println!("---------  -----  ----");
    }

    let mut total_unpacked: u64 = 0;
    let mut total_size: u64 = 0;

    for entry in archive.entries() {
        total_unpacked += entry.unpacked_size() as u64;
        total_size += entry.data_size as u64;

        if verbose {
            println!(
                "{:9}  {}  {:9}  {:5}  {}",
                entry.unpacked_size(),
                entry.type_string(),
                entry.data_size,
                entry.timestamp,
                entry.normalized_filename()
            );
        } else {
            println!(
                "{:9}  {:5}  {}",
                entry.unpacked_size(),
                entry.timestamp,
                entry.normalized_filename()
            );
        }
    }

    if verbose {
        println!("---------        ---------            ---------");
        println!(
            "{:9}        {:9}            {} Files",
            total_unpacked,
            total_size,
            archive.entries().len()
        );
    } else {
        println!("---------            ---------");
        println!("{:9}            {} Files", total_unpacked, archive.entries().len());
    }
}
