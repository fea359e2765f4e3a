use std::io::Write;

use clap::{Parser, Subcommand};
use relic_filesystems::{dispatch, DiskImage, Filesystem, Ntfs};

#[derive(Parser)]
#[command(name = "relic")]
#[command(about = "Read-only forensic inspector for raw disk images", long_about = None)]
struct Cli {
    /// Path to the raw disk image
    image: String,

    /// Which partition to operate on for `ls`/`cat`, 1-based as reported
    /// by `partitions`. Defaults to the first NTFS partition found.
    #[arg(short, long)]
    partition: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the partition table (and any nested extended partitions)
    Partitions,
    /// List a directory's contents
    Ls {
        /// Absolute path within the volume, e.g. "/Windows/System32"
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print a file's contents to stdout
    Cat { path: String },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> relic_core::Result<()> {
    let image = DiskImage::open_path(&cli.image)?;

    match cli.command {
        Commands::Partitions => {
            print_mbr(&image.volume, 0);
            Ok(())
        }
        Commands::Ls { path, recursive } => {
            let ntfs = open_target_ntfs(&image, cli.partition)?;
            let Some(file) = ntfs.find_path(&path)? else {
                eprintln!("no such path: {}", path);
                std::process::exit(1);
            };
            for entry in file.list(recursive, None)? {
                let marker = if entry.is_dir() { "/" } else { "" };
                println!("{}{}", entry.fullpath()?, marker);
            }
            Ok(())
        }
        Commands::Cat { path } => {
            let ntfs = open_target_ntfs(&image, cli.partition)?;
            let Some(file) = ntfs.find_path(&path)? else {
                eprintln!("no such path: {}", path);
                std::process::exit(1);
            };
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            for chunk in file.read(file.size(), 0, 1)? {
                handle.write_all(&chunk?).ok();
            }
            Ok(())
        }
    }
}

fn open_target_ntfs(image: &DiskImage, partition: Option<u32>) -> relic_core::Result<Ntfs> {
    let partitions = flatten_partitions(&image.volume);
    let chosen = match partition {
        Some(n) => partitions.into_iter().find(|p| p.index == n),
        None => partitions.into_iter().find(|p| !p.is_extended()),
    };
    let Some(chosen) = chosen else {
        return Err(relic_core::RelicError::Other("no suitable partition found".into()));
    };
    let window = image.device()?.sub_window(
        chosen.first_sector * relic_filesystems::mbr::SECTOR_SIZE,
        chosen.sector_count as u64 * relic_filesystems::mbr::SECTOR_SIZE,
    )?;
    match dispatch(&window)? {
        Filesystem::Ntfs(ntfs) => Ok(ntfs),
        Filesystem::Fat(stub) => Err(relic_core::RelicError::UnsupportedFeature(format!(
            "partition {} is FAT ({:?}), not supported for ls/cat",
            chosen.index, stub.variant
        ))),
        Filesystem::Unrecognized => Err(relic_core::RelicError::UnsupportedFeature(format!(
            "partition {} filesystem not recognised",
            chosen.index
        ))),
    }
}

fn flatten_partitions(mbr: &relic_filesystems::MBR) -> Vec<relic_filesystems::Partition> {
    let mut out = Vec::new();
    for p in &mbr.partitions {
        out.push(p.clone());
        if let Some(ebr) = &p.ebr {
            out.extend(flatten_partitions(ebr));
        }
    }
    out
}

fn print_mbr(mbr: &relic_filesystems::MBR, depth: usize) {
    let indent = "  ".repeat(depth);
    for p in &mbr.partitions {
        println!(
            "{}#{} {} type={:#04x} start={} sectors={}{}",
            indent,
            p.index,
            p.type_name(),
            p.partition_type,
            p.first_sector,
            p.sector_count,
            if p.bootable { " [boot]" } else { "" },
        );
        if let Some(ebr) = &p.ebr {
            print_mbr(ebr, depth + 1);
        }
    }
    for u in &mbr.unallocated {
        println!(
            "{}#{} unallocated [{}, {}]",
            indent, u.index, u.first_sector, u.last_sector
        );
    }
}
