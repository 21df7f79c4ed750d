//! `/balances`: free balance of every local coldkey wallet.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mirror_core::{FetchError, QueryRequest};
use mirror_storage::Fetcher;

use super::btcli::BtcliRunner;
use super::table::csv_record;

pub const PATH: &str = "/balances";

const TABLE_BANNER: &str = "Wallet Coldkey Balance";
const WALLET_PREFIX: &str = "coldkey-";
const HEADER: [&str; 5] = [
    "Wallet_Name",
    "Coldkey_Address",
    "Free_Balance",
    "Staked_Balance",
    "Total_Balance",
];

#[derive(Debug, Clone)]
pub struct BalancesSource {
    runner: Arc<BtcliRunner>,
    wallet_path: PathBuf,
}

impl BalancesSource {
    pub fn new(runner: Arc<BtcliRunner>, wallet_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            wallet_path: wallet_path.into(),
        }
    }
}

/// Convert `btcli w balance --all` output to CSV.
///
/// Only rows after the balance banner that name a `coldkey-` wallet and
/// carry at least three fields are kept. The last field is the free
/// balance; staked is reported as zero. Rows whose balance does not parse
/// are skipped. Returns an empty string when no wallet rows are found.
pub fn parse_balances(output: &str) -> String {
    let Some(start) = output
        .lines()
        .position(|line| line.trim_start().starts_with(TABLE_BANNER))
    else {
        return String::new();
    };

    let mut rows = Vec::new();
    for line in output.lines().skip(start) {
        let line = line.trim();
        if !line.starts_with(WALLET_PREFIX) {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let raw_balance = parts[parts.len() - 1].replace('τ', "");
        let Ok(free) = raw_balance.trim().parse::<f64>() else {
            tracing::debug!(line = %line, "Skipping wallet row with unparsable balance");
            continue;
        };
        rows.push(csv_record(&[
            parts[0].to_string(),
            parts[1].to_string(),
            free.to_string(),
            0.0_f64.to_string(),
            free.to_string(),
        ]));
    }

    if rows.is_empty() {
        return String::new();
    }
    let mut csv = csv_record(&HEADER);
    csv.extend(rows);
    csv
}

#[async_trait]
impl Fetcher for BalancesSource {
    async fn fetch(&self, _request: &QueryRequest) -> Result<String, FetchError> {
        let wallet_path = self.wallet_path.to_string_lossy();
        let output = self
            .runner
            .run(&["w", "balance", "--all", "--wallet-path", &wallet_path])
            .await?;
        Ok(parse_balances(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Using the specified network finney
                Wallet Coldkey Balance
                Network: finney
    Wallet Name    Coldkey Address                                    Free Balance
 ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    coldkey-01     5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX    τ1.2500
    coldkey-02     5DAAnrj7VHTznn2AWBemMuyBwZWs6FNFjdyVXUeYum3PTXFy    τ0.0000
    coldkey-bad    5Grw
    miner-hot      5HGjWAeFDfFCWPsjFQdVV2Msvz2XtMktvgocEZcCj68kUMaw    τ9.0
                   Total Balance                                      τ1.2500
";

    #[test]
    fn test_parse_balances() {
        assert_eq!(
            parse_balances(SAMPLE),
            "Wallet_Name,Coldkey_Address,Free_Balance,Staked_Balance,Total_Balance\n\
             coldkey-01,5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX,1.25,0,1.25\n\
             coldkey-02,5DAAnrj7VHTznn2AWBemMuyBwZWs6FNFjdyVXUeYum3PTXFy,0,0,0\n"
        );
    }

    #[test]
    fn test_rows_before_banner_are_ignored() {
        let output = "coldkey-early 5Abc τ3.0\nWallet Coldkey Balance\ncoldkey-late 5Def τ4.0\n";
        assert_eq!(
            parse_balances(output),
            "Wallet_Name,Coldkey_Address,Free_Balance,Staked_Balance,Total_Balance\n\
             coldkey-late,5Def,4,0,4\n"
        );
    }

    #[test]
    fn test_no_banner_or_no_wallets_is_empty() {
        assert_eq!(parse_balances("Error: wallet path not found\n"), "");
        assert_eq!(parse_balances("Wallet Coldkey Balance\nNetwork: finney\n"), "");
    }
}
