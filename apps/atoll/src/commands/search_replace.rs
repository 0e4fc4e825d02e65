//! `search-replace`: rewrite a string in a SQL dump before importing it.
//! Purely local; streams line by line so large dumps never sit in memory.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::cli::SearchReplaceArgs;
use crate::error::CliError;

pub fn run(args: &SearchReplaceArgs) -> Result<i32, CliError> {
    if args.from.is_empty() {
        return Err(CliError::InvalidArgument(
            "the search string cannot be empty".into(),
        ));
    }

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.file));
    if output_path == args.file {
        return Err(CliError::InvalidArgument(
            "the output path must differ from the input file".into(),
        ));
    }

    let input = File::open(&args.file)?;
    let output = File::create(&output_path)?;
    let replaced = rewrite(
        BufReader::new(input),
        BufWriter::new(output),
        &args.from,
        &args.to,
    )?;

    println!(
        "Replaced {replaced} occurrence{} of '{}'; wrote {}.",
        if replaced == 1 { "" } else { "s" },
        args.from,
        output_path.display()
    );
    Ok(0)
}

fn default_output_path(input: &PathBuf) -> PathBuf {
    let mut path = input.clone().into_os_string();
    path.push(".out");
    PathBuf::from(path)
}

fn rewrite<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    from: &str,
    to: &str,
) -> io::Result<u64> {
    let mut replaced = 0u64;
    for line in reader.lines() {
        let line = line?;
        replaced += line.matches(from).count() as u64;
        writer.write_all(line.replace(from, to).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(replaced)
}
