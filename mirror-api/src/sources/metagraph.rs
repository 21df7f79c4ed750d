//! `/metagraph`: per-subnet neuron tables, optionally filtered.
//!
//! `netuid` is a comma-separated list; every entry must be all digits.
//! Each `egrep` parameter is a filter key; keys that are not alphanumeric
//! are discarded. When a key survives, only lines containing one of the
//! keys are kept. Kept lines are prefixed with their netuid, and each
//! subnet's table is converted separately and appended.

use std::sync::Arc;

use async_trait::async_trait;
use mirror_core::{FetchError, QueryRequest};
use mirror_storage::Fetcher;

use super::btcli::BtcliRunner;
use super::table::fixed_width_to_csv;

pub const PATH: &str = "/metagraph";

/// Query parameters this source reads.
pub const PARAMS: &[&str] = &["netuid", "egrep"];

#[derive(Debug, Clone)]
pub struct MetagraphSource {
    runner: Arc<BtcliRunner>,
}

impl MetagraphSource {
    pub fn new(runner: Arc<BtcliRunner>) -> Self {
        Self { runner }
    }
}

/// Validate the `netuid` parameter into a list of subnet ids.
pub fn parse_netuids(request: &QueryRequest) -> Result<Vec<String>, FetchError> {
    let raw = request.params().first("netuid").unwrap_or("");
    raw.split(',')
        .map(|netuid| {
            if !netuid.is_empty() && netuid.bytes().all(|b| b.is_ascii_digit()) {
                Ok(netuid.to_string())
            } else {
                Err(FetchError::InvalidParameter {
                    param: "netuid".to_string(),
                    value: netuid.to_string(),
                })
            }
        })
        .collect()
}

/// Alphanumeric filter keys from every `egrep` parameter.
pub fn filter_keys(request: &QueryRequest) -> Vec<String> {
    request
        .params()
        .get_all("egrep")
        .iter()
        .map(String::as_str)
        .filter(|key| !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
        .collect()
}

/// Filter and prefix one subnet's output, then convert it to CSV.
pub fn render_subnet(netuid: &str, output: &str, keys: &[String]) -> String {
    let lines: Vec<String> = output
        .lines()
        .filter(|line| keys.is_empty() || keys.iter().any(|k| line.contains(k.as_str())))
        .map(|line| format!("{}  {}", netuid, line))
        .collect();
    fixed_width_to_csv(lines.iter().map(String::as_str))
}

#[async_trait]
impl Fetcher for MetagraphSource {
    async fn fetch(&self, request: &QueryRequest) -> Result<String, FetchError> {
        let netuids = parse_netuids(request)?;
        let keys = filter_keys(request);

        let mut csv = String::new();
        for netuid in &netuids {
            let arg = format!("--netuid={}", netuid);
            let output = self.runner.run(&["s", "metagraph", &arg]).await?;
            csv.push_str(&render_subnet(netuid, &output, &keys));
        }
        Ok(csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::QueryParams;

    fn request(pairs: &[(&str, &str)]) -> QueryRequest {
        QueryRequest::new(PATH, QueryParams::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn test_parse_netuids() {
        assert_eq!(
            parse_netuids(&request(&[("netuid", "1,12")])).expect("valid"),
            vec!["1".to_string(), "12".to_string()]
        );
    }

    #[test]
    fn test_invalid_netuid_is_rejected() {
        for bad in ["abc", "1,x", "", "1,,2", "-1"] {
            let err = parse_netuids(&request(&[("netuid", bad)])).expect_err(bad);
            assert!(matches!(err, FetchError::InvalidParameter { ref param, .. } if param == "netuid"));
        }
        assert!(parse_netuids(&request(&[])).is_err());
    }

    #[test]
    fn test_filter_keys_drop_non_alphanumeric() {
        let req = request(&[("egrep", "5Hot"), ("egrep", "a|b"), ("egrep", "uid"), ("egrep", "")]);
        assert_eq!(filter_keys(&req), vec!["5Hot".to_string(), "uid".to_string()]);
    }

    #[test]
    fn test_render_subnet_without_filter_prefixes_every_line() {
        let output = "UID  STAKE\n0    10\n1    20\n";
        assert_eq!(
            render_subnet("3", output, &[]),
            "3,UID,STAKE\n3,0,10\n3,1,20\n"
        );
    }

    #[test]
    fn test_render_subnet_with_filter_keeps_matching_lines() {
        let output = "UID  STAKE  HOTKEY\n0    10     5Abc\n1    20     5Def\n";
        let keys = vec!["UID".to_string(), "5Def".to_string()];
        assert_eq!(
            render_subnet("7", output, &keys),
            "7,UID,STAKE,HOTKEY\n7,1,20,5Def\n"
        );
    }
}
