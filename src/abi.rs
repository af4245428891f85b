use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ethers::abi::Abi;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{json, Value};

/// Default Etherscan-compatible API endpoint for `fetch-abi`.
pub const ETHERSCAN_API: &str = "https://api.etherscan.io/api";

/// Load an ABI file. Accepts both the `{"abi": [...]}` wrapper written by
/// `fetch-abi` and a bare ABI array.
pub fn load_abi(path: &Path) -> Result<Abi> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read ABI file {}", path.display()))?;
    parse_abi(&raw).with_context(|| format!("invalid ABI in {}", path.display()))
}

pub fn parse_abi(raw: &str) -> Result<Abi> {
    let value: Value = serde_json::from_str(raw)?;
    let inner = match value {
        Value::Object(mut map) => map
            .remove("abi")
            .ok_or_else(|| anyhow!("object has no `abi` field"))?,
        array @ Value::Array(_) => array,
        _ => bail!("expected an ABI array or an object with an `abi` field"),
    };
    Ok(serde_json::from_value(inner)?)
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: String,
}

/// Download a verified contract ABI from an Etherscan-style explorer and
/// write it to `output` as `{"abi": [...]}`.
pub async fn fetch_abi(api_url: &str, address: &str, api_key: &str, output: &Path) -> Result<()> {
    info!("Fetching ABI for {address} from {api_url}");
    let response: ExplorerResponse = reqwest::Client::new()
        .get(api_url)
        .query(&[
            ("module", "contract"),
            ("action", "getabi"),
            ("address", address),
            ("apikey", api_key),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("explorer returned a non-JSON body")?;

    let wrapped = wrap_explorer_result(&response)?;
    fs::write(output, render_abi_file(&wrapped)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote ABI to {}", output.display());
    Ok(())
}

/// The explorer returns the ABI as a JSON string inside `result`.
fn wrap_explorer_result(response: &ExplorerResponse) -> Result<Value> {
    if response.status != "1" {
        bail!(
            "explorer refused the request: {} ({})",
            response.message,
            response.result
        );
    }
    let abi: Value =
        serde_json::from_str(&response.result).context("explorer `result` is not an ABI")?;
    Ok(json!({ "abi": abi }))
}

/// Pretty-print with four-space indentation and every object's keys sorted.
fn render_abi_file(value: &Value) -> Result<String> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut out, formatter);
    sort_keys(value).serialize(&mut serializer)?;
    Ok(String::from_utf8(out)?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER_OF: &str = r#"[{"type":"function","name":"ownerOf","stateMutability":"view",
        "inputs":[{"name":"tokenId","type":"uint256"}],
        "outputs":[{"name":"","type":"address"}]}]"#;

    #[test]
    fn parses_wrapped_and_bare_abis() {
        let bare = parse_abi(OWNER_OF).unwrap();
        let wrapped = parse_abi(&format!(r#"{{"abi": {OWNER_OF}}}"#)).unwrap();
        assert!(bare.function("ownerOf").is_ok());
        assert_eq!(
            bare.function("ownerOf").unwrap().signature(),
            wrapped.function("ownerOf").unwrap().signature()
        );
    }

    #[test]
    fn rejects_objects_without_abi() {
        assert!(parse_abi(r#"{"result": []}"#).is_err());
        assert!(parse_abi("42").is_err());
    }

    #[test]
    fn unwraps_explorer_result() {
        let response = ExplorerResponse {
            status: "1".into(),
            message: "OK".into(),
            result: OWNER_OF.to_string(),
        };
        let wrapped = wrap_explorer_result(&response).unwrap();
        assert!(parse_abi(&wrapped.to_string()).unwrap().function("ownerOf").is_ok());

        let refused = ExplorerResponse {
            status: "0".into(),
            message: "NOTOK".into(),
            result: "Invalid API Key".into(),
        };
        assert!(wrap_explorer_result(&refused).is_err());
    }

    #[test]
    fn abi_file_uses_four_space_indent_and_sorted_keys() {
        let response = ExplorerResponse {
            status: "1".into(),
            message: "OK".into(),
            result: r#"[{"type":"event","name":"ClaimRewards","anonymous":false,"inputs":[]}]"#
                .to_string(),
        };
        let rendered = render_abi_file(&wrap_explorer_result(&response).unwrap()).unwrap();

        let expected = r#"{
    "abi": [
        {
            "anonymous": false,
            "inputs": [],
            "name": "ClaimRewards",
            "type": "event"
        }
    ]
}"#;
        assert_eq!(rendered, expected);
        assert!(parse_abi(&rendered).unwrap().event("ClaimRewards").is_ok());
    }
}
