use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::exit;

use anyhow::{ensure, Context, Result};
use clap::{App, Arg, ArgMatches};
use log::info;

use bindex::{BTree, SECTOR_SIZE};
use bindex_tools::{init_logger, pad_key};

pub fn main() {
    init_logger();

    let matches = App::new("treebuild")
        .version("1.0")
        .about("Creates a bindex device and bulk loads key/value pairs")
        .arg(
            Arg::with_name("device")
                .value_name("DEVICE")
                .required(true)
                .index(1)
                .help("Path of the device file to create"),
        )
        .arg(
            Arg::with_name("size")
                .value_name("BYTES")
                .required(true)
                .index(2)
                .help("Device size in bytes, a multiple of the sector size"),
        )
        .arg(
            Arg::with_name("key-size")
                .value_name("BYTES")
                .required(true)
                .index(3)
                .help("Fixed key size of the index"),
        )
        .arg(
            Arg::with_name("input")
                .value_name("FILE")
                .takes_value(true)
                .short("i")
                .long("input")
                .help("Tab-separated key/value lines to load (defaults to stdin)"),
        )
        .get_matches();

    match build(&matches) {
        Ok(count) => println!("loaded {} records", count),
        Err(err) => {
            println!("fatal error: {:#}", err);
            exit(1);
        }
    }
}

fn build(matches: &ArgMatches) -> Result<u64> {
    let device = matches.value_of("device").unwrap();
    let size: u64 = matches
        .value_of("size")
        .unwrap()
        .parse()
        .context("device size is not a number")?;
    let key_size: u32 = matches
        .value_of("key-size")
        .unwrap()
        .parse()
        .context("key size is not a number")?;

    let mut tree = BTree::create(device, size, key_size)
        .with_context(|| format!("could not create index device {}", device))?;

    let reader: Box<dyn BufRead> = match matches.value_of("input") {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("could not open {}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut count = 0u64;
    let mut record = vec![0u8; SECTOR_SIZE];
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let mut fields = line.splitn(2, '\t');
        let key_text = fields.next().unwrap();
        let value = fields
            .next()
            .with_context(|| format!("line {}: expected key<TAB>value", lineno + 1))?;
        ensure!(
            value.len() <= SECTOR_SIZE,
            "line {}: record is larger than one sector",
            lineno + 1
        );

        let key = pad_key(key_text, tree.key_size())?;
        for byte in record.iter_mut() {
            *byte = 0;
        }
        record[..value.len()].copy_from_slice(value.as_bytes());

        let lba = tree.insert(&key, &record)?;
        info!("{} -> lba {}", key_text, lba);
        count += 1;
    }

    Ok(count)
}
