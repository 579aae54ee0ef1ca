// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn default_policy_retries_three_times() {
    let policy = ErrorPolicy::default();
    assert_eq!(policy.strategy, ErrorStrategy::Retry);
    assert_eq!(policy.max_retries, 3);
}

#[test]
fn max_retries_defaults_when_absent_in_json() {
    let policy: ErrorPolicy = serde_json::from_str(r#"{"strategy":"skip"}"#).unwrap();
    assert_eq!(policy.strategy, ErrorStrategy::Skip);
    assert_eq!(policy.max_retries, ErrorPolicy::DEFAULT_MAX_RETRIES);
}

#[test]
fn strategy_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorStrategy::Continue).unwrap(),
        "\"continue\""
    );
}
