use anyhow::{Context, Result};
use serde_json::Value;

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn parse_quantity_u64(v: Value) -> Result<u64> {
    match v {
        Value::String(s) => parse_quantity_u64_str(&s),
        Value::Number(n) => n.as_u64().context("quantity number not representable as u64"),
        other => anyhow::bail!("unexpected quantity json type: {other}"),
    }
}

pub fn parse_quantity_u64_str(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let Some(hex) = trimmed.strip_prefix("0x") else {
        return trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid decimal u64: {trimmed}"));
    };
    if hex.is_empty() {
        anyhow::bail!("invalid hex quantity: {trimmed}");
    }
    u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex quantity: {trimmed}"))
}

pub fn looks_like_transient(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline")
        || msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("bad gateway")
        || msg.contains("gateway")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection refused")
        || msg.contains("broken pipe")
        || msg.contains("temporarily unavailable")
}

/// True for the error shapes public RPC providers return when
/// `debug_traceCall` isn't supported, distinct from a transient failure.
pub fn looks_like_unsupported_method(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("method not found")
        || msg.contains("method not supported")
        || msg.contains("does not exist")
        || msg.contains("not available")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_quantity_u64_str("0x2a").unwrap(), 42);
        assert_eq!(parse_quantity_u64_str("42").unwrap(), 42);
    }

    #[test]
    fn rejects_bare_0x() {
        assert!(parse_quantity_u64_str("0x").is_err());
    }

    #[test]
    fn classifies_rate_limit_as_transient() {
        let err = anyhow::anyhow!("429 Too Many Requests");
        assert!(looks_like_transient(&err));
    }
}
