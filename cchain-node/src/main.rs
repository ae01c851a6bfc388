use std::path::PathBuf;
use std::sync::Arc;

use cchain_config::ChainConfig;
use cchain_node::{init_logging, Node};
use cchain_wallet::WalletStore;

#[tokio::main]
async fn main() {
    let config_path = std::env::var("CCHAIN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/cchain.toml"));
    let config = match ChainConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config: {e:?}");
            std::process::exit(2);
        }
    };

    init_logging(&config.node.log_level.clone());

    let wallets = match WalletStore::new(PathBuf::from(&config.node.wallet_dir)) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("failed to open wallet store: {e:?}");
            std::process::exit(2);
        }
    };
    let password = std::env::var("CCHAIN_VALIDATOR_PASSWORD").unwrap_or_default();
    let wallet = match wallets.load("validator").or_else(|_| wallets.create("validator", &password)) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("failed to load validator wallet: {e:?}");
            std::process::exit(1);
        }
    };
    let secret_key = match wallets.unlock_secret(&wallet, &password) {
        Ok(sk) => sk,
        Err(e) => {
            eprintln!("failed to unlock validator wallet: {e:?}");
            std::process::exit(1);
        }
    };

    let node = match Node::bootstrap(config.clone(), wallet.public_key.clone(), secret_key) {
        Ok(n) => Arc::new(n),
        Err(e) => {
            eprintln!("failed to bootstrap node: {e:?}");
            std::process::exit(1);
        }
    };

    let api_node = node.clone();
    let api_addr = config.node.api_addr.clone();
    let rpc_task = tokio::spawn(async move { cchain_rpc::serve(api_addr, api_node).await });

    let block_task = tokio::spawn(node.clone().run());

    if let Err(e) = rpc_task.await {
        eprintln!("rpc task panicked: {e:?}");
    }
    node.stop();
    if let Err(e) = block_task.await {
        eprintln!("block production task panicked: {e:?}");
    }
}
