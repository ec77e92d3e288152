use alloy::primitives::{Bytes, B256};
use blst::min_pk::PublicKey as BlsPublicKey;
use clap::Parser;
use eyre::{bail, eyre};

use dac_node::{bls::verify_sequence_signature, MemberClient, OffChainData, PeerClient, Sequence};

#[derive(Debug, Parser)]
struct CliOpts {
    /// Base URL of the committee member.
    #[clap(long, env = "DAC_MEMBER_URL", default_value = "http://127.0.0.1:8444")]
    pub url: String,
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, Parser)]
enum SubCommand {
    /// Fetch the off-chain data stored under a hash.
    GetData {
        #[clap(long)]
        hash: B256,
    },
    /// Ask the member to store and sign a sequence.
    Sign {
        #[clap(long)]
        batch_number: u64,
        /// Hex encoded batch payloads, in order.
        #[clap(long = "payload", required = true)]
        payloads: Vec<Bytes>,
        /// Hex encoded BLS public key of the member, to verify the signature.
        #[clap(long)]
        public_key: Option<String>,
    },
    /// Print the member status.
    Status,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let opts = CliOpts::parse();
    let client = MemberClient::new()?;

    match opts.cmd {
        SubCommand::GetData { hash } => {
            let value = client.get_offchain_data(&opts.url, hash).await?;
            println!("{value}");
        }
        SubCommand::Sign { batch_number, payloads, public_key } => {
            let sequence = Sequence {
                batch_number,
                batches: payloads.into_iter().map(OffChainData::new).collect(),
            };
            let signature = client.sign_sequence(&opts.url, &sequence).await?;

            if let Some(public_key) = public_key {
                let bytes = hex::decode(public_key.trim_start_matches("0x"))?;
                let public_key = BlsPublicKey::from_bytes(&bytes)
                    .map_err(|e| eyre!("Invalid public key: {:?}", e))?;
                if !verify_sequence_signature(&signature, &public_key, &sequence) {
                    bail!("Signature does not verify against the given public key");
                }
            }

            println!("digest:    {}", sequence.hash_to_sign());
            println!("signature: 0x{}", hex::encode(signature.to_bytes()));
        }
        SubCommand::Status => {
            let status = client.status(&opts.url).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
