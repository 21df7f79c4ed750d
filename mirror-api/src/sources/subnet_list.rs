//! `/subnet-list`: the subnet overview table as CSV.

use std::sync::Arc;

use async_trait::async_trait;
use mirror_core::{FetchError, QueryRequest};
use mirror_storage::Fetcher;

use super::btcli::BtcliRunner;
use super::table::fixed_width_to_csv;

pub const PATH: &str = "/subnet-list";

#[derive(Debug, Clone)]
pub struct SubnetListSource {
    runner: Arc<BtcliRunner>,
}

impl SubnetListSource {
    pub fn new(runner: Arc<BtcliRunner>) -> Self {
        Self { runner }
    }
}

/// Drop the banner line and the trailing summary line, then convert the
/// table between them.
pub fn parse_subnet_list(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= 2 {
        return String::new();
    }
    fixed_width_to_csv(lines[1..lines.len() - 1].iter().copied())
}

#[async_trait]
impl Fetcher for SubnetListSource {
    async fn fetch(&self, _request: &QueryRequest) -> Result<String, FetchError> {
        let output = self.runner.run(&["s", "list"]).await?;
        Ok(parse_subnet_list(&output))
    }
}
