use std::{fs::File, io::Write, path::PathBuf};

use alloy::hex::encode_prefixed;
use clap::Parser;

use dac_node::bls::random_bls_secret;

#[derive(Debug, Parser)]
struct CliOpts {
    /// Number of member keys to generate.
    #[clap(long, default_value = "1")]
    pub count: usize,
    /// File to write `index,secret_key,public_key` lines to.
    #[clap(long, default_value = "committee-keys.csv")]
    pub out: PathBuf,
}

fn main() -> eyre::Result<()> {
    let opts = CliOpts::parse();
    let mut f = File::create(&opts.out)?;

    for i in 0..opts.count {
        let secret_key = random_bls_secret();
        let public_key = encode_prefixed(secret_key.sk_to_pk().to_bytes());
        let secret_key = encode_prefixed(secret_key.to_bytes());

        f.write_all(format!("{i},{secret_key},{public_key}\n").as_bytes())?;
    }

    f.sync_all()?;
    println!("Wrote {} keys to {}", opts.count, opts.out.display());

    Ok(())
}
