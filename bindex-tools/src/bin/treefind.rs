use std::process::exit;

use anyhow::{Context, Result};
use clap::{App, Arg, ArgMatches};

use bindex::{BTree, SECTOR_SIZE};
use bindex_tools::{init_logger, pad_key};

pub fn main() {
    init_logger();

    let matches = App::new("treefind")
        .version("1.0")
        .about("Looks up a key in a bindex device")
        .arg(
            Arg::with_name("device")
                .value_name("DEVICE")
                .required(true)
                .index(1)
                .help("Path of the device file"),
        )
        .arg(
            Arg::with_name("key")
                .value_name("KEY")
                .required(true)
                .index(2)
                .help("Key to look up, zero-padded to the configured key size"),
        )
        .arg(
            Arg::with_name("record")
                .short("r")
                .long("record")
                .help("Also hex dump the record block"),
        )
        .get_matches();

    match find(&matches) {
        Ok(true) => {}
        Ok(false) => {
            println!("not found");
            exit(1);
        }
        Err(err) => {
            println!("fatal error: {:#}", err);
            exit(1);
        }
    }
}

fn find(matches: &ArgMatches) -> Result<bool> {
    let device = matches.value_of("device").unwrap();
    let mut tree =
        BTree::attach(device).with_context(|| format!("could not attach {}", device))?;

    let key = pad_key(matches.value_of("key").unwrap(), tree.key_size())?;
    let lba = match tree.find(&key)? {
        Some(lba) => lba,
        None => return Ok(false),
    };
    println!("lba 0x{:08x}", lba);

    if matches.is_present("record") {
        let mut record = vec![0u8; SECTOR_SIZE];
        tree.disk().read(lba, &mut record)?;
        for (i, chunk) in record.chunks(32).enumerate() {
            println!("{:04x}: {}", i * 32, hex::encode(chunk));
        }
    }

    Ok(true)
}
