use std::io;
use std::process::exit;

use anyhow::{Context, Result};
use clap::{App, Arg, ArgMatches};

use bindex::BTree;
use bindex_tools::init_logger;

pub fn main() {
    init_logger();

    let matches = App::new("treeprint")
        .version("1.0")
        .about("Dumps a bindex device breadth-first")
        .arg(
            Arg::with_name("device")
                .value_name("DEVICE")
                .required(true)
                .index(1)
                .help("Path of the device file"),
        )
        .arg(
            Arg::with_name("stats")
                .short("s")
                .long("stats")
                .help("Print a JSON shape summary instead of the node dump"),
        )
        .get_matches();

    if let Err(err) = print(&matches) {
        println!("fatal error: {:#}", err);
        exit(1);
    }
}

fn print(matches: &ArgMatches) -> Result<()> {
    let device = matches.value_of("device").unwrap();
    let mut tree =
        BTree::attach(device).with_context(|| format!("could not attach {}", device))?;

    if matches.is_present("stats") {
        let stats = tree.stats()?;
        let stdout = io::stdout();
        serde_json::to_writer_pretty(stdout.lock(), &stats)?;
        println!();
    } else {
        tree.print()?;
    }

    Ok(())
}
