#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::env;
use std::fs::OpenOptions;
use std::path::Path;
use vsfs::{
    ByteBlockDevice, FileByteDevice, Filesystem, FormatOptions, FsOps, VSFS_BLOCK_SIZE, format,
};

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "mkfs" => {
            let Some(image) = args.next() else {
                bail!("mkfs requires <image-path> <blocks> <inodes>");
            };
            let blocks: u32 = args
                .next()
                .context("mkfs requires <blocks>")?
                .parse()
                .context("blocks must be an integer")?;
            let inodes: u32 = args
                .next()
                .context("mkfs requires <inodes>")?
                .parse()
                .context("inodes must be an integer")?;
            mkfs(Path::new(&image), blocks, inodes)
        }
        "inspect" => {
            let Some(image) = args.next() else {
                bail!("inspect requires a path argument");
            };
            let json = args.any(|arg| arg == "--json");
            inspect(Path::new(&image), json)
        }
        "ls" => {
            let Some(image) = args.next() else {
                bail!("ls requires a path argument");
            };
            ls(Path::new(&image))
        }
        "stat" => {
            let Some(image) = args.next() else {
                bail!("stat requires <image-path> <path>");
            };
            let Some(path) = args.next() else {
                bail!("stat requires <image-path> <path>");
            };
            let json = args.any(|arg| arg == "--json");
            stat(Path::new(&image), &path, json)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("vsfs-cli\n");
    println!("USAGE:");
    println!("  vsfs-cli mkfs <image-path> <blocks> <inodes>");
    println!("  vsfs-cli inspect <image-path> [--json]");
    println!("  vsfs-cli ls <image-path>");
    println!("  vsfs-cli stat <image-path> <path> [--json]");
}

fn open_fs(image: &Path) -> Result<Filesystem> {
    let file_dev = FileByteDevice::open(image)
        .with_context(|| format!("failed to open image {}", image.display()))?;
    let dev = ByteBlockDevice::new(file_dev)
        .with_context(|| format!("{} is not a block-aligned image", image.display()))?;
    Filesystem::open(Box::new(dev))
        .with_context(|| format!("{} does not hold a valid vsfs image", image.display()))
}

fn mkfs(image: &Path, blocks: u32, inodes: u32) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)
        .with_context(|| format!("failed to create {}", image.display()))?;
    file.set_len(u64::from(blocks) * u64::from(VSFS_BLOCK_SIZE))
        .context("failed to size the image file")?;
    drop(file);

    let file_dev = FileByteDevice::open(image)?;
    let dev = ByteBlockDevice::new(file_dev)?;
    format(&dev, &FormatOptions { num_inodes: inodes })
        .with_context(|| format!("failed to format {}", image.display()))?;

    println!(
        "formatted {}: {blocks} blocks, {inodes} inodes",
        image.display()
    );
    Ok(())
}

fn inspect(image: &Path, json: bool) -> Result<()> {
    let fs = open_fs(image)?;
    let stats = fs.get_stats();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("serialize output")?
        );
    } else {
        println!("vsfs image: {}", image.display());
        println!("block_size: {}", stats.block_size);
        println!("num_blocks: {}", stats.num_blocks);
        println!("free_blocks: {}", stats.free_blocks);
        println!("num_inodes: {}", stats.num_inodes);
        println!("free_inodes: {}", stats.free_inodes);
        println!("name_max: {}", stats.name_max);
    }
    Ok(())
}

fn ls(image: &Path) -> Result<()> {
    let fs = open_fs(image)?;
    for name in fs.list_names("/")? {
        println!("{name}");
    }
    Ok(())
}

fn stat(image: &Path, path: &str, json: bool) -> Result<()> {
    let fs = open_fs(image)?;
    let attr = fs
        .get_attributes(path)
        .with_context(|| format!("failed to stat {path}"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&attr).context("serialize output")?
        );
    } else {
        println!("path: {path}");
        println!("ino: {}", attr.ino);
        println!("mode: {:o}", attr.mode);
        println!("kind: {:?}", attr.kind);
        println!("nlink: {}", attr.nlink);
        println!("size: {}", attr.size);
        println!("blocks(512B): {}", attr.blocks);
        println!("mtime: {:?}", attr.mtime);
    }
    Ok(())
}
